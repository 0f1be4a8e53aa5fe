//! In-process object store.
//!
//! Follows the S3 multipart rules that matter to callers: parts are only
//! visible after completion, completion needs parts in ascending order with
//! matching etags, and aborting discards everything uploaded so far.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::store::{ObjectStore, StorageError, UploadedPart};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<i32, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    part_sizes: Mutex<Vec<usize>>,
    next_upload: AtomicU64,
    fail_complete: AtomicBool,
    fail_parts: AtomicBool,
}

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|_| StorageError::Backend("memory store lock poisoned".into()))
}

impl MemoryStore {
    /// `name` plays the role of the bucket in [`uri`](ObjectStore::uri).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Seed an object.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.into(),
                StoredObject {
                    body: body.into(),
                    content_type: "application/octet-stream".into(),
                },
            );
        }
    }

    /// Body of a committed object.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()?
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// Number of multipart sessions neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().map(|u| u.len()).unwrap_or(0)
    }

    /// Sizes of every part uploaded so far, in upload order.
    pub fn part_sizes(&self) -> Vec<usize> {
        self.part_sizes
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent `complete_multipart` fail.
    pub fn fail_completions(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `upload_part` fail.
    pub fn fail_part_uploads(&self, fail: bool) {
        self.fail_parts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        guard(&self.objects)?
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::Relaxed));
        guard(&self.uploads)?.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        if self.fail_parts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected part upload failure".into()));
        }

        let mut uploads = guard(&self.uploads)?;
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::UnknownUpload {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            })?;

        guard(&self.part_sizes)?.push(body.len());
        upload.parts.insert(part_number, body);
        Ok(UploadedPart {
            part_number,
            etag: format!("\"{upload_id}-{part_number}\""),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), StorageError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected completion failure".into()));
        }

        let mut uploads = guard(&self.uploads)?;
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::UnknownUpload {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            })?;

        if parts.is_empty() {
            return Err(StorageError::Backend("multipart upload has no parts".into()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StorageError::Backend("parts must be in ascending order".into()));
        }

        let mut body = Vec::new();
        for part in parts {
            let expected = format!("\"{upload_id}-{}\"", part.part_number);
            match upload.parts.get(&part.part_number) {
                Some(bytes) if part.etag == expected => body.extend_from_slice(bytes),
                _ => {
                    return Err(StorageError::Backend(format!(
                        "part {} missing or etag mismatch",
                        part.part_number
                    )))
                }
            }
        }

        let content_type = upload.content_type.clone();
        uploads.remove(upload_id);
        guard(&self.objects)?.insert(key.to_string(), StoredObject { body, content_type });
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StorageError> {
        guard(&self.uploads)?.remove(upload_id);
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://{}/{key}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let store = MemoryStore::new("in");
        assert_matches!(store.get("nope").await, Err(StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn seeded_object_is_readable() {
        let store = MemoryStore::new("in");
        store.insert("a.jpg", vec![1, 2, 3]);
        assert_eq!(store.get("a.jpg").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn multipart_parts_are_invisible_until_completed() {
        let store = MemoryStore::new("out");
        let id = store.create_multipart("k", "text/plain").await.unwrap();
        let p1 = store.upload_part("k", &id, 1, b"hello ".to_vec()).await.unwrap();
        let p2 = store.upload_part("k", &id, 2, b"world".to_vec()).await.unwrap();
        assert!(store.object("k").is_none());

        store.complete_multipart("k", &id, &[p1, p2]).await.unwrap();
        assert_eq!(store.object("k").unwrap(), b"hello world");
        assert_eq!(store.content_type("k").as_deref(), Some("text/plain"));
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn out_of_order_parts_are_rejected() {
        let store = MemoryStore::new("out");
        let id = store.create_multipart("k", "text/plain").await.unwrap();
        let p1 = store.upload_part("k", &id, 1, b"a".to_vec()).await.unwrap();
        let p2 = store.upload_part("k", &id, 2, b"b".to_vec()).await.unwrap();
        assert!(store.complete_multipart("k", &id, &[p2, p1]).await.is_err());
    }

    #[tokio::test]
    async fn abort_discards_the_session() {
        let store = MemoryStore::new("out");
        let id = store.create_multipart("k", "text/plain").await.unwrap();
        store.upload_part("k", &id, 1, b"a".to_vec()).await.unwrap();
        store.abort_multipart("k", &id).await.unwrap();
        assert_eq!(store.open_uploads(), 0);
        assert_matches!(
            store.upload_part("k", &id, 2, b"b".to_vec()).await,
            Err(StorageError::UnknownUpload { .. })
        );
    }

    #[test]
    fn uri_uses_store_name() {
        assert_eq!(MemoryStore::new("out").uri("jobs/j/m.jsonl"), "memory://out/jobs/j/m.jsonl");
    }
}
