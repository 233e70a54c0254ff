mod support;

use beatvault::audio_codec::{SymphoniaCodec, TargetFormat};
use beatvault::cloud_storage::{LocalObjectStore, ObjectStore};
use beatvault::db::{Database, MetadataStore, Record, TRACKS_TABLE, TRACK_TAGS_TABLE, TUTORIALS_TABLE};
use beatvault::identity::{StaticIdentity, UserId};
use beatvault::saga::{
    Compensation, MetadataInsert, ObjectUpload, SagaCoordinator, SagaErrorKind, StepFailure,
};
use beatvault::test_support::{FlakyMetadataStore, FlakyObjectStore};
use beatvault::uploads::{MediaFile, TrackUpload, TutorialUpload, UploadError, UploadService};
use serde_json::json;
use std::sync::Arc;
use support::{cover_image, files_under, test_tone, tracing_init};
use tempfile::TempDir;

struct Env {
    _dir: TempDir,
    local: Arc<LocalObjectStore>,
    objects: Arc<FlakyObjectStore>,
    database: Arc<Database>,
    metadata: Arc<FlakyMetadataStore>,
}

impl Env {
    fn service(&self) -> UploadService {
        UploadService::new(
            self.objects.clone(),
            self.metadata.clone(),
            Arc::new(StaticIdentity::signed_in(UserId::new("u1").unwrap())),
            Arc::new(SymphoniaCodec::new()),
        )
    }

    fn coordinator(&self) -> SagaCoordinator {
        SagaCoordinator::new(self.objects.clone(), self.metadata.clone())
    }

    fn stored_files(&self) -> usize {
        files_under(self.local.root()).len()
    }

    async fn total_rows(&self) -> i64 {
        let mut total = 0;
        for table in [TRACKS_TABLE, TRACK_TAGS_TABLE, TUTORIALS_TABLE] {
            total += self.database.count_rows(table).await.unwrap();
        }
        total
    }
}

async fn env() -> Env {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let local = Arc::new(LocalObjectStore::new(dir.path().join("storage"), None));
    let database = Arc::new(
        Database::new(dir.path().join("db.sqlite").to_str().unwrap())
            .await
            .unwrap(),
    );
    Env {
        objects: Arc::new(FlakyObjectStore::new(local.clone() as Arc<dyn ObjectStore>)),
        metadata: Arc::new(FlakyMetadataStore::new(
            database.clone() as Arc<dyn MetadataStore>
        )),
        _dir: dir,
        local,
        database,
    }
}

fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_failed_thumbnail_upload_removes_audio_file() {
    let env = env().await;
    env.objects.fail_puts_to("thumbnails");

    let err = env
        .coordinator()
        .run_saga(vec![
            ObjectUpload::new("tracks", "u1/1-a.flac", vec![1; 64]).into(),
            ObjectUpload::new("thumbnails", "u1/1-t.png", vec![2; 16]).into(),
        ])
        .await
        .unwrap_err();

    assert_eq!(err.failed_step, 1);
    assert!(err.to_string().starts_with("upload step 2 of 2"));
    assert_eq!(err.kind(), SagaErrorKind::StepFailed);
    assert!(err.failed_compensations().is_empty());
    assert_eq!(env.stored_files(), 0);
}

#[tokio::test]
async fn test_failed_tutorial_insert_removes_both_files() {
    let env = env().await;
    env.metadata.fail_inserts_into(TUTORIALS_TABLE);

    let err = env
        .service()
        .publish_tutorial(
            TutorialUpload::new("Compression", "mixing", MediaFile::new("v.mp4", "video/mp4", vec![0; 512]))
                .thumbnail(cover_image()),
        )
        .await
        .unwrap_err();

    let UploadError::Saga(saga) = &err else {
        panic!("expected saga error, got {err:?}");
    };
    assert_eq!(saga.failed_step, 2);
    assert_eq!(saga.rollback.compensated.len(), 2);
    assert_eq!(env.stored_files(), 0);
    assert_eq!(env.total_rows().await, 0);
}

#[tokio::test]
async fn test_failed_tag_insert_removes_track_row_and_audio() {
    let env = env().await;
    env.metadata.fail_inserts_into(TRACK_TAGS_TABLE);

    let err = env
        .service()
        .publish_track(
            TrackUpload::new("Tagged", test_tone(TargetFormat::Wav))
                .cover(cover_image())
                .tags("ambient"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Saga(_)));
    assert_eq!(env.stored_files(), 0);
    assert_eq!(env.total_rows().await, 0);
}

#[tokio::test]
async fn test_rejected_insert_is_not_compensated() {
    let env = env().await;

    // Unknown column: SQLite rejects the row, so only the upload is undone
    let err = env
        .coordinator()
        .run_saga(vec![
            ObjectUpload::new("tracks", "u1/2-a.wav", vec![1; 8])
                .bind_url_as("audio_url")
                .into(),
            MetadataInsert::new(TRACKS_TABLE, record(json!({"title": "x", "tempo": 120})))
                .fill_from("audio_url")
                .into(),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err.cause, StepFailure::MetadataStore(_)));
    assert_eq!(
        err.rollback.compensated,
        vec![Compensation::DeleteObject {
            step_index: 0,
            bucket: "tracks".to_string(),
            key: "u1/2-a.wav".to_string(),
        }]
    );
    assert_eq!(env.stored_files(), 0);
}

#[tokio::test]
async fn test_undeletable_object_is_reported_and_left_behind() {
    let env = env().await;
    env.objects.fail_deletes_in("covers");
    env.metadata.fail_inserts_into(TRACKS_TABLE);

    let err = env
        .service()
        .publish_track(TrackUpload::new("Stuck", test_tone(TargetFormat::Wav)).cover(cover_image()))
        .await
        .unwrap_err();

    let UploadError::Saga(saga) = &err else {
        panic!("expected saga error, got {err:?}");
    };
    assert_eq!(saga.kind(), SagaErrorKind::RollbackPartiallyFailed);
    assert_eq!(saga.failed_compensations().len(), 1);
    assert!(matches!(
        saga.failed_compensations()[0].compensation,
        Compensation::DeleteObject { ref bucket, .. } if bucket == "covers"
    ));

    // Audio was still removed; only the cover remains for manual cleanup
    let remaining = files_under(env.local.root());
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].starts_with(env.local.root().join("covers")));
    assert_eq!(env.total_rows().await, 0);
}

#[tokio::test]
async fn test_undeletable_track_row_keeps_its_files() {
    let env = env().await;
    env.metadata.fail_inserts_into(TRACK_TAGS_TABLE);
    env.metadata.fail_deletes_in(TRACKS_TABLE);

    let err = env
        .service()
        .publish_track(
            TrackUpload::new("Orphan", test_tone(TargetFormat::Wav))
                .cover(cover_image())
                .tags("dub"),
        )
        .await
        .unwrap_err();

    let UploadError::Saga(saga) = &err else {
        panic!("expected saga error, got {err:?}");
    };
    assert_eq!(saga.kind(), SagaErrorKind::RollbackPartiallyFailed);
    assert_eq!(saga.failed_compensations().len(), 1);
    assert_eq!(saga.rollback.retained.len(), 2);

    // The row that survived still points at files that exist
    let track_id = match &saga.failed_compensations()[0].compensation {
        Compensation::DeleteRecord { id, .. } => id.clone(),
        other => panic!("expected a row delete, got {other:?}"),
    };
    let track = env
        .database
        .get_track_by_id(&track_id)
        .await
        .unwrap()
        .expect("track row left behind");
    assert!(track.cover_url.is_some());
    assert_eq!(env.stored_files(), 2);
    for compensation in &saga.rollback.retained {
        let Compensation::DeleteObject { bucket, key, .. } = compensation else {
            panic!("expected object deletes, got {compensation:?}");
        };
        assert!(env.local.object_path(bucket, key).unwrap().exists());
    }
}

#[tokio::test]
async fn test_concurrent_publishes_do_not_interfere() {
    let env = env().await;
    env.objects.fail_puts_to("covers");
    let service = env.service();

    let ok = service.publish_track(TrackUpload::new("Ok", test_tone(TargetFormat::Wav)));
    let failing = service.publish_track(
        TrackUpload::new("Fails", test_tone(TargetFormat::Wav)).cover(cover_image()),
    );
    let (ok, failing) = tokio::join!(ok, failing);

    let published = ok.unwrap();
    assert!(failing.is_err());
    assert_eq!(env.stored_files(), 1);
    assert_eq!(env.database.count_rows(TRACKS_TABLE).await.unwrap(), 1);
    assert!(env
        .database
        .get_track_by_id(&published.track_id)
        .await
        .unwrap()
        .is_some());
}
