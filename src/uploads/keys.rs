use crate::identity::UserId;
use chrono::Utc;
use std::path::Path;
use uuid::Uuid;

const FALLBACK_EXTENSION: &str = "bin";

/// Object key for a user's upload: `{user_id}/{unix_millis}-{uuid}.{ext}`
///
/// The uuid suffix keeps keys unique even for uploads started in the same
/// millisecond, so concurrent uploads never touch each other's objects.
pub fn object_key(user_id: &UserId, file_name: &str) -> String {
    let extension = sanitized_extension(file_name);
    key_with_extension(
        user_id,
        extension.as_deref().unwrap_or(FALLBACK_EXTENSION),
    )
}

pub(crate) fn key_with_extension(user_id: &UserId, extension: &str) -> String {
    format!(
        "{}/{}-{}.{}",
        user_segment(user_id),
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        extension
    )
}

/// Lowercase alphanumeric extension of `file_name`, if it has one
pub(crate) fn sanitized_extension(file_name: &str) -> Option<String> {
    let extension: String = Path::new(file_name)
        .extension()?
        .to_str()?
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    if extension.is_empty() {
        None
    } else {
        Some(extension)
    }
}

// User ids come from the identity provider; keep them to one path segment
fn user_segment(user_id: &UserId) -> String {
    user_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
