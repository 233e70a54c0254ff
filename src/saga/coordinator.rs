use super::error::{Compensation, FailedCompensation, RollbackReport, SagaError, StepFailure};
use super::state::SagaState;
use super::step::{MetadataInsert, ObjectUpload, UploadStep};
use crate::cloud_storage::ObjectStore;
use crate::db::{MetadataStore, Record};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Progress callback: `(completed_step_index, total_steps)`
pub type StepCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Per-run knobs for [`SagaCoordinator::run_saga_with`]
#[derive(Clone, Default)]
pub struct SagaOptions {
    pub on_step_complete: Option<StepCallback>,
    pub cancel: Option<CancellationToken>,
    /// Deadline for each step and each compensation
    pub step_timeout: Option<Duration>,
}

impl SagaOptions {
    pub fn on_step_complete(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_step_complete = Some(Arc::new(callback));
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| token.is_cancelled())
    }
}

impl fmt::Debug for SagaOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaOptions")
            .field("on_step_complete", &self.on_step_complete.is_some())
            .field("cancel", &self.cancel)
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertedRecord {
    pub table: String,
    pub id: String,
    pub record: Record,
}

/// Everything a committed saga produced, in step order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRecord {
    pub saga_id: String,
    pub objects: Vec<UploadedObject>,
    pub records: Vec<InsertedRecord>,
}

impl MediaRecord {
    /// The first inserted row, which carries the media metadata
    pub fn primary_record(&self) -> Option<&InsertedRecord> {
        self.records.first()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.primary_record().map(|record| record.id.as_str())
    }

    /// Public URL of the first object uploaded to `bucket`
    pub fn url_for(&self, bucket: &str) -> Option<&str> {
        self.objects
            .iter()
            .find(|object| object.bucket == bucket)
            .map(|object| object.url.as_str())
    }

    pub fn url_of(&self, bucket: &str, key: &str) -> Option<&str> {
        self.objects
            .iter()
            .find(|object| object.bucket == bucket && object.key == key)
            .map(|object| object.url.as_str())
    }
}

/// Runs upload plans against an object store and a metadata store,
/// compensating committed steps in reverse order when any step fails.
///
/// The coordinator holds no per-run state, so one instance can drive any
/// number of concurrent sagas.
#[derive(Clone)]
pub struct SagaCoordinator {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl SagaCoordinator {
    pub fn new(objects: Arc<dyn ObjectStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        SagaCoordinator { objects, metadata }
    }

    pub async fn run_saga(&self, steps: Vec<UploadStep>) -> Result<MediaRecord, SagaError> {
        self.run_saga_with(steps, SagaOptions::default()).await
    }

    pub async fn run_saga_with(
        &self,
        steps: Vec<UploadStep>,
        options: SagaOptions,
    ) -> Result<MediaRecord, SagaError> {
        let saga_id = Uuid::new_v4().to_string();
        let span = info_span!("saga", saga_id = %saga_id);
        self.execute(saga_id, steps, options).instrument(span).await
    }

    async fn execute(
        &self,
        saga_id: String,
        steps: Vec<UploadStep>,
        options: SagaOptions,
    ) -> Result<MediaRecord, SagaError> {
        let total_steps = steps.len();
        if let Err(reason) = validate_plan(&steps) {
            warn!(%reason, "Rejected upload plan");
            return Err(SagaError {
                saga_id,
                failed_step: 0,
                total_steps,
                description: "validate plan".to_string(),
                cause: StepFailure::InvalidPlan(reason),
                rollback: RollbackReport::default(),
            });
        }

        info!(total_steps, "Starting upload saga");
        let mut run = SagaRun::new(saga_id, total_steps);

        for (index, step) in steps.into_iter().enumerate() {
            let description = step.describe();

            if options.is_cancelled() {
                let failure = StepError::before_start(StepFailure::Cancelled);
                return Err(self.roll_back(run, index, description, failure, &options).await);
            }

            debug!(step = index + 1, total_steps, %description, "Running step");
            let outcome = match step {
                UploadStep::ObjectUpload(upload) => {
                    self.upload_object(&mut run, index, upload, &options).await
                }
                UploadStep::MetadataInsert(insert) => {
                    self.insert_record(&mut run, index, insert, &options).await
                }
            };

            if let Err(failure) = outcome {
                return Err(self.roll_back(run, index, description, failure, &options).await);
            }

            run.advance(SagaState::StepSucceeded(index));
            if let Some(callback) = &options.on_step_complete {
                callback(index, total_steps);
            }
        }

        run.advance(SagaState::Committed);
        info!(
            objects = run.objects.len(),
            records = run.records.len(),
            "Upload saga committed"
        );
        Ok(run.into_media_record())
    }

    async fn upload_object(
        &self,
        run: &mut SagaRun,
        index: usize,
        upload: ObjectUpload,
        options: &SagaOptions,
    ) -> Result<(), StepError> {
        let ObjectUpload {
            bucket,
            key,
            bytes,
            content_type,
            bind_url_as,
        } = upload;
        let compensation = Compensation::DeleteObject {
            step_index: index,
            bucket: bucket.clone(),
            key: key.clone(),
        };

        let url = guarded(
            options,
            self.objects.put(&bucket, &key, &bytes, &content_type),
        )
        .await
        .map_err(|cause| StepError::during(cause, compensation.clone()))?;

        debug!(%bucket, %key, %url, size = bytes.len(), "Uploaded object");
        run.log.push(compensation);
        if let Some(name) = bind_url_as {
            run.bindings.insert(name.clone(), Value::String(url.clone()));
            run.url_sources.insert(name, index);
        }
        run.objects.push(UploadedObject { bucket, key, url });
        Ok(())
    }

    async fn insert_record(
        &self,
        run: &mut SagaRun,
        index: usize,
        insert: MetadataInsert,
        options: &SagaOptions,
    ) -> Result<(), StepError> {
        let MetadataInsert {
            table,
            mut record,
            fill_from,
            bind_id_as,
        } = insert;

        let referenced: Vec<usize> = fill_from
            .iter()
            .filter_map(|name| run.url_sources.get(name).copied())
            .collect();
        run.references.insert(index, referenced);

        for name in fill_from {
            let value = run.bindings.get(&name).cloned().unwrap_or(Value::Null);
            record.insert(name, value);
        }

        // Known before the call so an interrupted insert can still be undone
        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                let id = Uuid::new_v4().to_string();
                record.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };
        let compensation = Compensation::DeleteRecord {
            step_index: index,
            table: table.clone(),
            id,
        };

        let stored = guarded(options, self.metadata.insert(&table, record))
            .await
            .map_err(|cause| StepError::during(cause, compensation.clone()))?;

        debug!(%table, id = %stored.id, "Inserted record");
        run.log.push(Compensation::DeleteRecord {
            step_index: index,
            table: table.clone(),
            id: stored.id.clone(),
        });
        if let Some(name) = bind_id_as {
            run.bindings.insert(name, Value::String(stored.id.clone()));
        }
        run.records.push(InsertedRecord {
            table,
            id: stored.id,
            record: stored.record,
        });
        Ok(())
    }

    async fn roll_back(
        &self,
        mut run: SagaRun,
        failed_step: usize,
        description: String,
        failure: StepError,
        options: &SagaOptions,
    ) -> SagaError {
        run.advance(SagaState::RollingBack);
        let StepError { cause, in_flight } = failure;
        warn!(
            step = failed_step + 1,
            total_steps = run.total_steps,
            %description,
            %cause,
            committed = run.log.len(),
            "Upload step failed, rolling back"
        );

        let committed = std::mem::take(&mut run.log);
        let mut report = RollbackReport::default();
        // Upload steps whose URL lives on in a row we failed to delete
        let mut pinned: HashSet<usize> = HashSet::new();
        for compensation in in_flight.into_iter().chain(committed.into_iter().rev()) {
            if let Compensation::DeleteObject { step_index, .. } = &compensation {
                if pinned.contains(step_index) {
                    warn!(%compensation, "Keeping object, a surviving record still references it");
                    report.retained.push(compensation);
                    continue;
                }
            }

            match self.compensate(&compensation, options.step_timeout).await {
                Ok(()) => {
                    debug!(%compensation, "Compensated step {}", compensation.step_index() + 1);
                    report.compensated.push(compensation);
                }
                Err(error) => {
                    error!(%compensation, %error, "Compensation failed, leaving artifact behind");
                    if let Compensation::DeleteRecord { step_index, .. } = &compensation {
                        if let Some(uploads) = run.references.get(step_index) {
                            pinned.extend(uploads.iter().copied());
                        }
                    }
                    report.failed.push(FailedCompensation {
                        compensation,
                        error,
                    });
                }
            }
        }

        run.advance(SagaState::RolledBack);
        info!(
            compensated = report.compensated.len(),
            failed = report.failed.len(),
            retained = report.retained.len(),
            "Upload saga rolled back"
        );

        SagaError {
            saga_id: run.saga_id,
            failed_step,
            total_steps: run.total_steps,
            description,
            cause,
            rollback: report,
        }
    }

    /// One attempt, no retries. Cancellation does not apply here.
    async fn compensate(
        &self,
        compensation: &Compensation,
        limit: Option<Duration>,
    ) -> Result<(), String> {
        let attempt = async {
            match compensation {
                Compensation::DeleteObject { bucket, key, .. } => self
                    .objects
                    .delete(bucket, key)
                    .await
                    .map_err(|e| e.to_string()),
                Compensation::DeleteRecord { table, id, .. } => self
                    .metadata
                    .delete(table, id)
                    .await
                    .map_err(|e| e.to_string()),
            }
        };

        match limit {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err(format!("compensation exceeded its {:?} deadline", limit))),
            None => attempt.await,
        }
    }
}

/// Mutable state of one run; never shared between runs
struct SagaRun {
    saga_id: String,
    total_steps: usize,
    state: SagaState,
    log: Vec<Compensation>,
    bindings: HashMap<String, Value>,
    /// Binding name -> index of the upload step that produced the URL
    url_sources: HashMap<String, usize>,
    /// Insert step index -> upload steps whose URLs the row holds
    references: HashMap<usize, Vec<usize>>,
    objects: Vec<UploadedObject>,
    records: Vec<InsertedRecord>,
}

impl SagaRun {
    fn new(saga_id: String, total_steps: usize) -> Self {
        SagaRun {
            saga_id,
            total_steps,
            state: SagaState::Pending,
            log: Vec::new(),
            bindings: HashMap::new(),
            url_sources: HashMap::new(),
            references: HashMap::new(),
            objects: Vec::new(),
            records: Vec::new(),
        }
    }

    fn advance(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid saga transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    fn into_media_record(self) -> MediaRecord {
        MediaRecord {
            saga_id: self.saga_id,
            objects: self.objects,
            records: self.records,
        }
    }
}

struct StepError {
    cause: StepFailure,
    /// Set when the step may have landed even though it did not report success
    in_flight: Option<Compensation>,
}

impl StepError {
    fn before_start(cause: StepFailure) -> Self {
        StepError {
            cause,
            in_flight: None,
        }
    }

    fn during(cause: StepFailure, compensation: Compensation) -> Self {
        let in_flight = cause.outcome_unknown().then_some(compensation);
        StepError { cause, in_flight }
    }
}

/// Await a store call under the run's deadline and cancellation token
async fn guarded<T, E>(
    options: &SagaOptions,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, StepFailure>
where
    E: Into<StepFailure>,
{
    let timed = async {
        match options.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(StepFailure::DeadlineExceeded(limit)),
            },
            None => call.await.map_err(Into::into),
        }
    };

    match &options.cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(StepFailure::Cancelled),
                result = timed => result,
            }
        }
        None => timed.await,
    }
}

fn validate_plan(steps: &[UploadStep]) -> Result<(), String> {
    if steps.is_empty() {
        return Err("plan has no steps".to_string());
    }

    let mut targets = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        match step {
            UploadStep::ObjectUpload(upload) => {
                if !targets.insert((upload.bucket.as_str(), upload.key.as_str())) {
                    return Err(format!(
                        "step {} uploads {}/{} a second time",
                        index + 1,
                        upload.bucket,
                        upload.key
                    ));
                }
            }
            UploadStep::MetadataInsert(insert) => match insert.record.get("id") {
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(format!(
                        "step {} has a non-string id {} for {}",
                        index + 1,
                        other,
                        insert.table
                    ))
                }
            },
        }
    }
    Ok(())
}
