use super::keys::{key_with_extension, object_key};
use super::media::MediaFile;
use super::service::UploadService;
use super::{optional, required, UploadError};
use crate::audio_codec::{AudioCodec, TargetFormat};
use crate::db::{to_record, NewTrack, Record, TRACKS_TABLE, TRACK_TAGS_TABLE};
use crate::saga::{MediaRecord, MetadataInsert, ObjectUpload, SagaOptions, UploadStep};
use crate::watermark::{embed_watermark, WatermarkParameters};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// Form input for publishing a track
#[derive(Debug, Clone)]
pub struct TrackUpload {
    pub title: String,
    pub description: Option<String>,
    pub audio: MediaFile,
    pub cover: Option<MediaFile>,
    /// Comma-separated, as typed by the uploader
    pub tags: Option<String>,
    pub is_public: bool,
}

impl TrackUpload {
    pub fn new(title: impl Into<String>, audio: MediaFile) -> Self {
        TrackUpload {
            title: title.into(),
            description: None,
            audio,
            cover: None,
            tags: None,
            is_public: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn cover(mut self, cover: MediaFile) -> Self {
        self.cover = Some(cover);
        self
    }

    pub fn tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PublishedTrack {
    pub track_id: String,
    pub audio_url: String,
    pub cover_url: Option<String>,
    pub tags: Vec<String>,
    pub media: MediaRecord,
}

/// Split a comma-separated tag list. Blank entries are dropped and
/// duplicates keep their first position.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_string()))
        .map(str::to_string)
        .collect()
}

impl UploadService {
    pub async fn publish_track(&self, upload: TrackUpload) -> Result<PublishedTrack, UploadError> {
        self.publish_track_with(upload, self.options.clone()).await
    }

    /// Watermark the audio and publish it with its cover, track row and tags.
    /// Either all of it lands or none of it does.
    pub async fn publish_track_with(
        &self,
        upload: TrackUpload,
        options: SagaOptions,
    ) -> Result<PublishedTrack, UploadError> {
        let title = required("title", &upload.title)?;
        upload.audio.check("audio", "audio")?;
        if let Some(cover) = &upload.cover {
            cover.check("cover", "image")?;
        }

        let user = self.identity.current_user_id().await?;
        info!(user_id = %user, %title, "Publishing track");

        let TrackUpload {
            description,
            audio,
            cover,
            tags,
            is_public,
            ..
        } = upload;
        let tags = tags.as_deref().map(parse_tags).unwrap_or_default();

        // Decode/encode is CPU-bound
        let codec = self.codec.clone();
        let params = self.watermark;
        let (encoded, format) =
            tokio::task::spawn_blocking(move || watermark_audio(codec.as_ref(), &audio, params))
                .await??;
        debug!(size = encoded.len(), format = format.extension(), "Watermarked audio");

        let audio_key = key_with_extension(&user, format.extension());
        let cover_key = cover.as_ref().map(|c| object_key(&user, &c.file_name));

        let mut steps: Vec<UploadStep> = vec![ObjectUpload::new(
            &self.buckets.tracks,
            &audio_key,
            encoded,
        )
        .content_type(format.content_type())
        .bind_url_as("audio_url")
        .into()];

        if let (Some(cover), Some(key)) = (cover, &cover_key) {
            steps.push(
                ObjectUpload::new(&self.buckets.covers, key, cover.bytes)
                    .content_type(cover.content_type)
                    .bind_url_as("cover_url")
                    .into(),
            );
        }

        let track = NewTrack {
            title,
            description: optional(description),
            user_id: user.to_string(),
            is_public,
        };
        steps.push(
            MetadataInsert::new(TRACKS_TABLE, to_record(&track)?)
                .fill_from("audio_url")
                .fill_from("cover_url")
                .bind_id_as("track_id")
                .into(),
        );
        steps.extend(tag_steps(&tags));

        let media = self.coordinator.run_saga_with(steps, options).await?;

        let track_id = media
            .record_id()
            .ok_or(UploadError::IncompleteRecord("track id"))?
            .to_string();
        let audio_url = media
            .url_of(&self.buckets.tracks, &audio_key)
            .ok_or(UploadError::IncompleteRecord("audio url"))?
            .to_string();
        let cover_url = cover_key
            .and_then(|key| media.url_of(&self.buckets.covers, &key))
            .map(str::to_string);

        info!(%track_id, %audio_url, tags = tags.len(), "Published track");
        Ok(PublishedTrack {
            track_id,
            audio_url,
            cover_url,
            tags,
            media,
        })
    }
}

fn watermark_audio(
    codec: &dyn AudioCodec,
    audio: &MediaFile,
    params: WatermarkParameters,
) -> Result<(Vec<u8>, TargetFormat), UploadError> {
    let format = TargetFormat::for_source(&audio.file_name, &audio.content_type);
    let buffer = codec.decode(&audio.bytes, &audio.extension_hint())?;
    let marked = embed_watermark(buffer, params)?;
    let encoded = codec.encode(&marked, format)?;
    Ok((encoded, format))
}

fn tag_steps(tags: &[String]) -> Vec<UploadStep> {
    tags.iter()
        .map(|tag| {
            let mut record = Record::new();
            record.insert("tag".to_string(), Value::String(tag.clone()));
            MetadataInsert::new(TRACK_TAGS_TABLE, record)
                .fill_from("track_id")
                .into()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_codec::SymphoniaCodec;
    use crate::identity::{StaticIdentity, UserId};
    use crate::saga::StepFailure;
    use crate::test_support::{MemoryMetadataStore, MemoryObjectStore};
    use crate::watermark::AudioBuffer;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        objects: Arc<MemoryObjectStore>,
        metadata: Arc<MemoryMetadataStore>,
        service: UploadService,
    }

    fn harness(identity: StaticIdentity) -> Harness {
        let objects = Arc::new(MemoryObjectStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let service = UploadService::new(
            objects.clone(),
            metadata.clone(),
            Arc::new(identity),
            Arc::new(SymphoniaCodec::new()),
        );
        Harness {
            objects,
            metadata,
            service,
        }
    }

    fn signed_in() -> Harness {
        harness(StaticIdentity::signed_in(UserId::new("user-1").unwrap()))
    }

    fn silent_wav() -> MediaFile {
        let buffer = AudioBuffer::new(vec![vec![0.0; 8000]], 8000).unwrap();
        let bytes = SymphoniaCodec::new()
            .encode(&buffer, TargetFormat::Wav)
            .unwrap();
        MediaFile::new("beat.wav", "audio/wav", bytes)
    }

    fn cover() -> MediaFile {
        MediaFile::new("cover.png", "image/png", vec![0x89, b'P', b'N', b'G'])
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            parse_tags(" lofi, chill ,, lofi,  ,Chill"),
            vec!["lofi", "chill", "Chill"]
        );
        assert!(parse_tags(" , ").is_empty());
    }

    #[tokio::test]
    async fn test_publish_track_commits_everything() {
        let h = signed_in();
        let upload = TrackUpload::new("  Night Drive ", silent_wav())
            .description("late")
            .cover(cover())
            .tags("lofi, chill, lofi");

        let published = h.service.publish_track(upload).await.unwrap();

        assert_eq!(published.tags, vec!["lofi", "chill"]);
        assert!(published.audio_url.starts_with("memory://tracks/user-1/"));
        assert!(published.audio_url.ends_with(".wav"));
        assert!(published.cover_url.as_deref().unwrap().ends_with(".png"));

        let rows = h.metadata.rows(TRACKS_TABLE);
        assert_eq!(rows.len(), 1);
        let row = &rows[0].record;
        assert_eq!(rows[0].id, published.track_id);
        assert_eq!(row["title"], json!("Night Drive"));
        assert_eq!(row["user_id"], json!("user-1"));
        assert_eq!(row["is_public"], json!(true));
        assert_eq!(row["audio_url"], json!(published.audio_url));
        assert_eq!(row["cover_url"], json!(published.cover_url));

        let tags = h.metadata.rows(TRACK_TAGS_TABLE);
        assert_eq!(tags.len(), 2);
        assert!(tags
            .iter()
            .all(|t| t.record["track_id"] == json!(published.track_id)));
    }

    #[tokio::test]
    async fn test_uploaded_audio_carries_watermark() {
        let h = signed_in();
        let published = h
            .service
            .publish_track(TrackUpload::new("Tone", silent_wav()))
            .await
            .unwrap();

        let key = published.media.objects[0].key.clone();
        let stored = h.objects.get("tracks", &key).unwrap();
        let decoded = SymphoniaCodec::new().decode(&stored, "wav").unwrap();

        // 20 Hz at 8 kHz peaks at frame 100
        assert!((decoded.channels[0][100] - 0.1).abs() < 1e-3);
        assert!(decoded.channels[0][0].abs() < 1e-3);
        assert_eq!(decoded.frames(), 8000);
    }

    #[tokio::test]
    async fn test_track_without_cover_stores_null() {
        let h = signed_in();
        let published = h
            .service
            .publish_track(TrackUpload::new("Solo", silent_wav()).private())
            .await
            .unwrap();

        assert!(published.cover_url.is_none());
        let row = &h.metadata.rows(TRACKS_TABLE)[0].record;
        assert_eq!(row["cover_url"], Value::Null);
        assert_eq!(row["is_public"], json!(false));
        assert!(h.metadata.rows(TRACK_TAGS_TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_upload() {
        let h = signed_in();

        let err = h
            .service
            .publish_track(TrackUpload::new("   ", silent_wav()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingField("title")));

        let err = h
            .service
            .publish_track(TrackUpload::new("x", cover()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidFileType { field: "audio", .. }));

        let err = h
            .service
            .publish_track(TrackUpload::new("x", silent_wav()).cover(silent_wav()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidFileType { field: "cover", .. }));

        assert!(h.objects.is_empty());
        assert_eq!(h.metadata.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_user_cannot_publish() {
        let h = harness(StaticIdentity::signed_out());
        let err = h
            .service
            .publish_track(TrackUpload::new("x", silent_wav()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Identity(_)));
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_audio_uploads_nothing() {
        let h = signed_in();
        let garbage = MediaFile::new("beat.mp3", "audio/mpeg", vec![7; 512]);
        let err = h
            .service
            .publish_track(TrackUpload::new("x", garbage))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Codec(_)));
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn test_failed_cover_upload_removes_audio() {
        let h = signed_in();
        h.objects.fail_puts_to("covers");

        let err = h
            .service
            .publish_track(TrackUpload::new("x", silent_wav()).cover(cover()))
            .await
            .unwrap_err();

        let saga = match err {
            UploadError::Saga(saga) => saga,
            other => panic!("expected saga error, got {other:?}"),
        };
        assert_eq!(saga.failed_step, 1);
        assert!(matches!(saga.cause, StepFailure::ObjectStore(_)));
        assert!(saga.rollback.is_clean());
        assert!(h.objects.is_empty());
        assert_eq!(h.metadata.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_failed_tag_insert_removes_track_and_objects() {
        let h = signed_in();
        h.metadata.fail_inserts_into(TRACK_TAGS_TABLE);

        let err = h
            .service
            .publish_track(TrackUpload::new("x", silent_wav()).tags("a,b"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Saga(_)));
        assert!(h.objects.is_empty());
        assert_eq!(h.metadata.total_rows(), 0);
    }
}
