// Test support utilities for both unit and integration tests

use crate::cloud_storage::{validate_key, CloudStorageError, ObjectStore};
use crate::db::{MetadataStore, MetadataStoreError, Record, StoredRecord};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Buckets or tables a fake store should misbehave for
#[derive(Default)]
struct Faults(Mutex<HashSet<String>>);

impl Faults {
    fn add(&self, name: &str) {
        self.0.lock().unwrap().insert(name.to_string());
    }

    fn hits(&self, name: &str) -> bool {
        self.0.lock().unwrap().contains(name)
    }
}

fn object_outage(action: &str, bucket: &str) -> CloudStorageError {
    CloudStorageError::SdkError(format!("injected {} failure for bucket {}", action, bucket))
}

fn metadata_outage(action: &str, table: &str) -> MetadataStoreError {
    MetadataStoreError::Unavailable(format!("injected {} failure for table {}", action, table))
}

/// In-memory object store with per-bucket failure injection
///
/// Objects are keyed by `(bucket, key)`. URLs look like
/// `memory://{bucket}/{key}`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_puts: Faults,
    failing_deletes: Faults,
    stalling_puts: Faults,
    delete_calls: Mutex<Vec<(String, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every put into `bucket` fails without storing anything
    pub fn fail_puts_to(&self, bucket: &str) {
        self.failing_puts.add(bucket);
    }

    /// Every delete in `bucket` fails and leaves the object in place
    pub fn fail_deletes_in(&self, bucket: &str) {
        self.failing_deletes.add(bucket);
    }

    /// Puts into `bucket` store the object and then never return, like a
    /// request whose response is lost.
    pub fn stall_puts_to(&self, bucket: &str) {
        self.stalling_puts.add(bucket);
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored in `bucket`
    pub fn keys_in(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every delete attempted, in call order
    pub fn delete_calls(&self) -> Vec<(String, String)> {
        self.delete_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<String, CloudStorageError> {
        validate_key(key)?;
        if self.failing_puts.hits(bucket) {
            return Err(object_outage("put", bucket));
        }

        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());

        if self.stalling_puts.hits(bucket) {
            std::future::pending::<()>().await;
        }

        Ok(format!("memory://{}/{}", bucket, key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError> {
        self.delete_calls
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));

        if self.failing_deletes.hits(bucket) {
            return Err(object_outage("delete", bucket));
        }

        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// In-memory metadata store with per-table failure injection
#[derive(Default)]
pub struct MemoryMetadataStore {
    rows: Mutex<HashMap<String, Vec<StoredRecord>>>,
    failing_inserts: Faults,
    failing_deletes: Faults,
    stalling_inserts: Faults,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts_into(&self, table: &str) {
        self.failing_inserts.add(table);
    }

    /// Every delete in `table` fails and leaves the row in place
    pub fn fail_deletes_in(&self, table: &str) {
        self.failing_deletes.add(table);
    }

    /// Inserts into `table` write the row and then never return
    pub fn stall_inserts_into(&self, table: &str) {
        self.stalling_inserts.add(table);
    }

    /// Rows currently in `table`, in insert order
    pub fn rows(&self, table: &str) -> Vec<StoredRecord> {
        self.rows
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.rows(table).iter().any(|row| row.id == id)
    }

    pub fn total_rows(&self) -> usize {
        self.rows.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(
        &self,
        table: &str,
        mut record: Record,
    ) -> Result<StoredRecord, MetadataStoreError> {
        if self.failing_inserts.hits(table) {
            return Err(metadata_outage("insert", table));
        }

        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                let id = Uuid::new_v4().to_string();
                record.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let stored = StoredRecord { id, record };
        self.rows
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(stored.clone());

        if self.stalling_inserts.hits(table) {
            std::future::pending::<()>().await;
        }

        Ok(stored)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), MetadataStoreError> {
        if self.failing_deletes.hits(table) {
            return Err(metadata_outage("delete", table));
        }

        if let Some(rows) = self.rows.lock().unwrap().get_mut(table) {
            rows.retain(|row| row.id != id);
        }
        Ok(())
    }
}

/// Wraps a real object store and fails calls for chosen buckets
pub struct FlakyObjectStore {
    inner: Arc<dyn ObjectStore>,
    failing_puts: Faults,
    failing_deletes: Faults,
}

impl FlakyObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        FlakyObjectStore {
            inner,
            failing_puts: Faults::default(),
            failing_deletes: Faults::default(),
        }
    }

    pub fn fail_puts_to(&self, bucket: &str) {
        self.failing_puts.add(bucket);
    }

    pub fn fail_deletes_in(&self, bucket: &str) {
        self.failing_deletes.add(bucket);
    }
}

#[async_trait::async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, CloudStorageError> {
        if self.failing_puts.hits(bucket) {
            return Err(object_outage("put", bucket));
        }
        self.inner.put(bucket, key, data, content_type).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError> {
        if self.failing_deletes.hits(bucket) {
            return Err(object_outage("delete", bucket));
        }
        self.inner.delete(bucket, key).await
    }
}

/// Wraps a real metadata store and fails calls for chosen tables
pub struct FlakyMetadataStore {
    inner: Arc<dyn MetadataStore>,
    failing_inserts: Faults,
    failing_deletes: Faults,
}

impl FlakyMetadataStore {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        FlakyMetadataStore {
            inner,
            failing_inserts: Faults::default(),
            failing_deletes: Faults::default(),
        }
    }

    pub fn fail_inserts_into(&self, table: &str) {
        self.failing_inserts.add(table);
    }

    pub fn fail_deletes_in(&self, table: &str) {
        self.failing_deletes.add(table);
    }
}

#[async_trait::async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn insert(
        &self,
        table: &str,
        record: Record,
    ) -> Result<StoredRecord, MetadataStoreError> {
        if self.failing_inserts.hits(table) {
            return Err(metadata_outage("insert", table));
        }
        self.inner.insert(table, record).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), MetadataStoreError> {
        if self.failing_deletes.hits(table) {
            return Err(metadata_outage("delete", table));
        }
        self.inner.delete(table, id).await
    }
}
