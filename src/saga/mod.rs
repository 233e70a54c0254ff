//! Multi-store upload saga
//!
//! An upload is a declarative list of [`UploadStep`]s. The coordinator runs
//! them in order and, when one fails, undoes every committed step in
//! reverse so neither store is left holding half an upload.

mod coordinator;
mod error;
mod state;
mod step;

pub use coordinator::{
    InsertedRecord, MediaRecord, SagaCoordinator, SagaOptions, StepCallback, UploadedObject,
};
pub use error::{
    Compensation, FailedCompensation, RollbackReport, SagaError, SagaErrorKind, StepFailure,
};
pub use state::SagaState;
pub use step::{MetadataInsert, ObjectUpload, UploadStep};
