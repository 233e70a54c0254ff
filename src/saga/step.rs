use crate::db::Record;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Put one object into the object store. Compensated by deleting the same
/// bucket/key.
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    pub bucket: String,
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Publish the returned URL under this name for later inserts
    pub bind_url_as: Option<String>,
}

impl ObjectUpload {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        ObjectUpload {
            bucket: bucket.into(),
            key: key.into(),
            bytes,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            bind_url_as: None,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn bind_url_as(mut self, name: impl Into<String>) -> Self {
        self.bind_url_as = Some(name.into());
        self
    }
}

/// Insert one row into the metadata store. Compensated by deleting the
/// row by id, but only once the insert has committed.
#[derive(Debug, Clone)]
pub struct MetadataInsert {
    pub table: String,
    pub record: Record,
    /// Bound values copied into the record (as `null` when never bound)
    pub fill_from: Vec<String>,
    /// Publish the assigned id under this name for later inserts
    pub bind_id_as: Option<String>,
}

impl MetadataInsert {
    pub fn new(table: impl Into<String>, record: Record) -> Self {
        MetadataInsert {
            table: table.into(),
            record,
            fill_from: Vec::new(),
            bind_id_as: None,
        }
    }

    pub fn fill_from(mut self, name: impl Into<String>) -> Self {
        self.fill_from.push(name.into());
        self
    }

    pub fn bind_id_as(mut self, name: impl Into<String>) -> Self {
        self.bind_id_as = Some(name.into());
        self
    }
}

/// One action of an upload saga
#[derive(Debug, Clone)]
pub enum UploadStep {
    ObjectUpload(ObjectUpload),
    MetadataInsert(MetadataInsert),
}

impl UploadStep {
    /// Short human-readable label for logs and errors
    pub fn describe(&self) -> String {
        match self {
            UploadStep::ObjectUpload(upload) => {
                format!("upload {}/{}", upload.bucket, upload.key)
            }
            UploadStep::MetadataInsert(insert) => format!("insert into {}", insert.table),
        }
    }
}

impl From<ObjectUpload> for UploadStep {
    fn from(upload: ObjectUpload) -> Self {
        UploadStep::ObjectUpload(upload)
    }
}

impl From<MetadataInsert> for UploadStep {
    fn from(insert: MetadataInsert) -> Self {
        UploadStep::MetadataInsert(insert)
    }
}
