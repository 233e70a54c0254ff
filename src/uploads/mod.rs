//! Publishing flows for tracks and tutorials
//!
//! Each flow validates the form input, resolves the uploader, prepares the
//! media (tracks are watermarked) and hands a step plan to the saga
//! coordinator.

mod keys;
mod media;
mod service;
mod track;
mod tutorial;

pub use keys::object_key;
pub use media::{content_type_for, MediaFile};
pub use service::{UploadBuckets, UploadService};
pub use track::{parse_tags, PublishedTrack, TrackUpload};
pub use tutorial::{PublishedTutorial, TutorialUpload};

use crate::audio_codec::CodecError;
use crate::identity::IdentityError;
use crate::saga::SagaError;
use crate::watermark::WatermarkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("File for {0} is empty")]
    EmptyFile(&'static str),
    #[error("Invalid file type for {field}: expected {expected}/*, got {actual}")]
    InvalidFileType {
        field: &'static str,
        expected: &'static str,
        actual: String,
    },
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Audio codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Watermark error: {0}")]
    Watermark(#[from] WatermarkError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Audio processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Upload committed without {0}")]
    IncompleteRecord(&'static str),
    #[error(transparent)]
    Saga(#[from] SagaError),
}

/// Trimmed value of a required text field
fn required(field: &'static str, value: &str) -> Result<String, UploadError> {
    let value = value.trim();
    if value.is_empty() {
        Err(UploadError::MissingField(field))
    } else {
        Ok(value.to_string())
    }
}

/// Blank optional text is stored as null
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
