use super::keys::sanitized_extension;
use super::UploadError;
use std::path::Path;

/// A file as handed over by the upload form
#[derive(Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        MediaFile {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its content type from the extension
    pub async fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = content_type_for(&file_name);
        Ok(MediaFile::new(file_name, content_type, bytes))
    }

    /// Probe hint for the decoder; empty when the name has no extension
    pub fn extension_hint(&self) -> String {
        sanitized_extension(&self.file_name).unwrap_or_default()
    }

    /// Reject empty files and files whose content type is not `{kind}/*`
    pub(crate) fn check(&self, field: &'static str, kind: &'static str) -> Result<(), UploadError> {
        if self.bytes.is_empty() {
            return Err(UploadError::EmptyFile(field));
        }
        let matches = self
            .content_type
            .split_once('/')
            .is_some_and(|(top, _)| top.eq_ignore_ascii_case(kind));
        if !matches {
            return Err(UploadError::InvalidFileType {
                field,
                expected: kind,
                actual: self.content_type.clone(),
            });
        }
        Ok(())
    }
}

// Bytes are left out; uploads can be hundreds of megabytes
impl std::fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match sanitized_extension(file_name).as_deref() {
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("aif" | "aiff") => "audio/aiff",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}
