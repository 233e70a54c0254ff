use crate::audio_codec::AudioCodec;
use crate::cloud_storage::ObjectStore;
use crate::db::MetadataStore;
use crate::identity::IdentityProvider;
use crate::saga::{SagaCoordinator, SagaOptions};
use crate::watermark::WatermarkParameters;
use std::sync::Arc;

/// Bucket names for each kind of uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBuckets {
    pub tracks: String,
    pub covers: String,
    pub tutorial_videos: String,
    pub tutorial_thumbnails: String,
}

impl Default for UploadBuckets {
    fn default() -> Self {
        UploadBuckets {
            tracks: "tracks".to_string(),
            covers: "covers".to_string(),
            tutorial_videos: "tutorial_videos".to_string(),
            tutorial_thumbnails: "tutorial_thumbnails".to_string(),
        }
    }
}

/// Entry point for publishing media
///
/// Cheap to clone; every collaborator is shared behind an `Arc`.
#[derive(Clone)]
pub struct UploadService {
    pub(super) coordinator: SagaCoordinator,
    pub(super) identity: Arc<dyn IdentityProvider>,
    pub(super) codec: Arc<dyn AudioCodec>,
    pub(super) buckets: UploadBuckets,
    pub(super) watermark: WatermarkParameters,
    pub(super) options: SagaOptions,
}

impl UploadService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        identity: Arc<dyn IdentityProvider>,
        codec: Arc<dyn AudioCodec>,
    ) -> Self {
        UploadService {
            coordinator: SagaCoordinator::new(objects, metadata),
            identity,
            codec,
            buckets: UploadBuckets::default(),
            watermark: WatermarkParameters::default(),
            options: SagaOptions::default(),
        }
    }

    pub fn with_buckets(mut self, buckets: UploadBuckets) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_watermark(mut self, watermark: WatermarkParameters) -> Self {
        self.watermark = watermark;
        self
    }

    /// Options used by `publish_track`/`publish_tutorial`; the `_with`
    /// variants take their own.
    pub fn with_saga_options(mut self, options: SagaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn buckets(&self) -> &UploadBuckets {
        &self.buckets
    }

    pub fn watermark(&self) -> WatermarkParameters {
        self.watermark
    }
}
