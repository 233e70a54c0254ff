use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Database models for published media
///
/// Binary media lives in the object store; these rows hold the public URLs
/// plus the descriptive metadata entered at upload time.
pub const TRACKS_TABLE: &str = "tracks";
pub const TRACK_TAGS_TABLE: &str = "track_tags";
pub const TUTORIALS_TABLE: &str = "tutorials";

/// A metadata row as column name -> JSON value
pub type Record = Map<String, Value>;

/// Result of a metadata insert: the assigned primary key and the row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub record: Record,
}

/// Serialize a struct into a `Record`. Non-object values yield an empty record.
pub fn to_record<T: Serialize>(value: &T) -> Result<Record, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Record::new()),
    }
}

/// Columns supplied by the uploader for a new track. URLs are filled in
/// by the upload saga once the objects exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrack {
    pub title: String,
    pub description: Option<String>,
    pub user_id: String,
    pub is_public: bool,
}

/// Columns supplied by the uploader for a new tutorial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTutorial {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub user_id: String,
    /// Seconds; not measured at upload time
    pub duration: i64,
}

/// A published audio track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbTrack {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: String,
    pub cover_url: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbTrackTag {
    pub id: String,
    pub track_id: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// A published video tutorial
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbTutorial {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub duration: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
