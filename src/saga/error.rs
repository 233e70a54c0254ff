use crate::cloud_storage::CloudStorageError;
use crate::db::MetadataStoreError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a step did not commit
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("invalid saga plan: {0}")]
    InvalidPlan(String),
    #[error("object store error: {0}")]
    ObjectStore(#[from] CloudStorageError),
    #[error("metadata store error: {0}")]
    MetadataStore(#[from] MetadataStoreError),
    #[error("step exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
    #[error("saga cancelled")]
    Cancelled,
}

impl StepFailure {
    /// The step may have landed remotely even though we saw no result
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            StepFailure::DeadlineExceeded(_) | StepFailure::Cancelled
        )
    }
}

/// Action that undoes a committed (or possibly committed) step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteObject {
        step_index: usize,
        bucket: String,
        key: String,
    },
    DeleteRecord {
        step_index: usize,
        table: String,
        id: String,
    },
}

impl Compensation {
    pub fn step_index(&self) -> usize {
        match self {
            Compensation::DeleteObject { step_index, .. }
            | Compensation::DeleteRecord { step_index, .. } => *step_index,
        }
    }
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::DeleteObject { bucket, key, .. } => {
                write!(f, "delete object {}/{}", bucket, key)
            }
            Compensation::DeleteRecord { table, id, .. } => {
                write!(f, "delete {} row {}", table, id)
            }
        }
    }
}

/// A compensation that was attempted and failed. The target is left
/// behind and needs out-of-band cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCompensation {
    pub compensation: Compensation,
    pub error: String,
}

/// Outcome of rolling back a failed saga, in the order compensations ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub compensated: Vec<Compensation>,
    pub failed: Vec<FailedCompensation>,
    /// Object deletes skipped because a row that could not be deleted
    /// still holds the object's URL
    pub retained: Vec<Compensation>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.retained.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.compensated.len() + self.failed.len()
    }
}

impl fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rolled back {} step(s)", self.compensated.len())?;
        if !self.failed.is_empty() {
            write!(f, ", {} compensation(s) failed:", self.failed.len())?;
            for failed in &self.failed {
                write!(f, " [{}: {}]", failed.compensation, failed.error)?;
            }
        }
        if !self.retained.is_empty() {
            write!(f, ", kept {} object(s) still referenced:", self.retained.len())?;
            for retained in &self.retained {
                write!(f, " [{}]", retained)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaErrorKind {
    /// A step failed and every compensation succeeded
    StepFailed,
    /// A step failed and at least one compensation failed too
    RollbackPartiallyFailed,
}

/// A saga that did not commit. Everything it committed has been
/// compensated, except what `rollback.failed` and `rollback.retained` list.
#[derive(Debug)]
pub struct SagaError {
    pub saga_id: String,
    /// 0-based index of the step that failed
    pub failed_step: usize,
    pub total_steps: usize,
    pub description: String,
    pub cause: StepFailure,
    pub rollback: RollbackReport,
}

impl fmt::Display for SagaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A rejected plan never ran, so there is no step to name
        if let StepFailure::InvalidPlan(reason) = &self.cause {
            return write!(f, "upload plan rejected: {}", reason);
        }
        write!(
            f,
            "upload step {} of {} ({}) failed: {} ({})",
            self.failed_step + 1,
            self.total_steps,
            self.description,
            self.cause,
            self.rollback
        )
    }
}

impl std::error::Error for SagaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl SagaError {
    pub fn kind(&self) -> SagaErrorKind {
        if self.rollback.is_clean() {
            SagaErrorKind::StepFailed
        } else {
            SagaErrorKind::RollbackPartiallyFailed
        }
    }

    pub fn failed_compensations(&self) -> &[FailedCompensation] {
        &self.rollback.failed
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, StepFailure::Cancelled)
    }
}
