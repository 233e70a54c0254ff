use super::keys::object_key;
use super::media::MediaFile;
use super::service::UploadService;
use super::{optional, required, UploadError};
use crate::db::{to_record, NewTutorial, TUTORIALS_TABLE};
use crate::saga::{MediaRecord, MetadataInsert, ObjectUpload, SagaOptions, UploadStep};
use tracing::info;

/// Form input for publishing a tutorial video
#[derive(Debug, Clone)]
pub struct TutorialUpload {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub video: MediaFile,
    pub thumbnail: Option<MediaFile>,
}

impl TutorialUpload {
    pub fn new(title: impl Into<String>, category: impl Into<String>, video: MediaFile) -> Self {
        TutorialUpload {
            title: title.into(),
            description: None,
            category: category.into(),
            video,
            thumbnail: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn thumbnail(mut self, thumbnail: MediaFile) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }
}

#[derive(Debug, Clone)]
pub struct PublishedTutorial {
    pub tutorial_id: String,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub media: MediaRecord,
}

impl UploadService {
    pub async fn publish_tutorial(
        &self,
        upload: TutorialUpload,
    ) -> Result<PublishedTutorial, UploadError> {
        self.publish_tutorial_with(upload, self.options.clone()).await
    }

    /// Publish a video with its optional thumbnail and tutorial row.
    /// Videos are stored as uploaded.
    pub async fn publish_tutorial_with(
        &self,
        upload: TutorialUpload,
        options: SagaOptions,
    ) -> Result<PublishedTutorial, UploadError> {
        let title = required("title", &upload.title)?;
        let category = required("category", &upload.category)?;
        upload.video.check("video", "video")?;
        if let Some(thumbnail) = &upload.thumbnail {
            thumbnail.check("thumbnail", "image")?;
        }

        let user = self.identity.current_user_id().await?;
        info!(user_id = %user, %title, %category, "Publishing tutorial");

        let TutorialUpload {
            description,
            video,
            thumbnail,
            ..
        } = upload;

        let video_key = object_key(&user, &video.file_name);
        let thumbnail_key = thumbnail
            .as_ref()
            .map(|t| object_key(&user, &t.file_name));

        let mut steps: Vec<UploadStep> = vec![ObjectUpload::new(
            &self.buckets.tutorial_videos,
            &video_key,
            video.bytes,
        )
        .content_type(video.content_type)
        .bind_url_as("video_url")
        .into()];

        if let (Some(thumbnail), Some(key)) = (thumbnail, &thumbnail_key) {
            steps.push(
                ObjectUpload::new(&self.buckets.tutorial_thumbnails, key, thumbnail.bytes)
                    .content_type(thumbnail.content_type)
                    .bind_url_as("thumbnail_url")
                    .into(),
            );
        }

        let tutorial = NewTutorial {
            title,
            description: optional(description),
            category,
            user_id: user.to_string(),
            duration: 0,
        };
        steps.push(
            MetadataInsert::new(TUTORIALS_TABLE, to_record(&tutorial)?)
                .fill_from("video_url")
                .fill_from("thumbnail_url")
                .into(),
        );

        let media = self.coordinator.run_saga_with(steps, options).await?;

        let tutorial_id = media
            .record_id()
            .ok_or(UploadError::IncompleteRecord("tutorial id"))?
            .to_string();
        let video_url = media
            .url_of(&self.buckets.tutorial_videos, &video_key)
            .ok_or(UploadError::IncompleteRecord("video url"))?
            .to_string();
        let thumbnail_url = thumbnail_key
            .and_then(|key| media.url_of(&self.buckets.tutorial_thumbnails, &key))
            .map(str::to_string);

        info!(%tutorial_id, %video_url, "Published tutorial");
        Ok(PublishedTutorial {
            tutorial_id,
            video_url,
            thumbnail_url,
            media,
        })
    }
}
