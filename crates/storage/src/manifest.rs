//! Chunked JSONL manifest writer.
//!
//! [`ManifestWriter`] buffers one JSON line per [`NameResult`] and ships the
//! buffer as a multipart part each time it reaches the part size. The
//! multipart session is opened lazily with the first part. [`seal`] uploads
//! whatever is left and commits every part in order; the object exists only
//! after a successful seal.
//!
//! [`seal`]: ManifestWriter::seal

use std::sync::Arc;

use renamer_core::job::NameResult;

use crate::store::{ObjectStore, StorageError, UploadedPart};

/// Default part size (5 MiB, the S3 minimum for non-final parts).
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Content type of the sealed manifest object.
pub const MANIFEST_CONTENT_TYPE: &str = "application/jsonl";

/// Job-scoped manifest key, e.g. `demo/jobs/jr_ab12/manifest.jsonl`.
pub fn manifest_key(prefix: &str, job_id: &str) -> String {
    format!("{prefix}jobs/{job_id}/manifest.jsonl")
}

/// Description of a committed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedManifest {
    pub key: String,
    pub uri: String,
    pub lines: usize,
    pub bytes: u64,
    pub parts: usize,
}

pub struct ManifestWriter {
    store: Arc<dyn ObjectStore>,
    key: String,
    part_size: usize,
    buffer: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<UploadedPart>,
    lines: usize,
    bytes: u64,
}

impl ManifestWriter {
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>, part_size: usize) -> Self {
        Self {
            store,
            key: key.into(),
            part_size: part_size.max(1),
            buffer: Vec::new(),
            upload_id: None,
            parts: Vec::new(),
            lines: 0,
            bytes: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records appended so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Append records, uploading a part whenever the buffer is full.
    pub async fn append(&mut self, results: &[NameResult]) -> Result<(), StorageError> {
        for result in results {
            serde_json::to_writer(&mut self.buffer, result)?;
            self.buffer.push(b'\n');
            self.lines += 1;

            if self.buffer.len() >= self.part_size {
                self.flush_part().await?;
            }
        }
        Ok(())
    }

    /// Upload the remainder and commit the manifest.
    ///
    /// An empty manifest is still committed, as a single empty part. On
    /// failure the session is aborted best-effort and nothing is retried.
    pub async fn seal(mut self) -> Result<SealedManifest, StorageError> {
        if !self.buffer.is_empty() || self.parts.is_empty() {
            if let Err(e) = self.flush_part().await {
                self.abort().await;
                return Err(e);
            }
        }

        let Some(upload_id) = self.upload_id.clone() else {
            return Err(StorageError::Backend(format!(
                "manifest {} has no open upload",
                self.key
            )));
        };

        if let Err(e) = self
            .store
            .complete_multipart(&self.key, &upload_id, &self.parts)
            .await
        {
            tracing::error!(key = %self.key, error = %e, "Failed to finalize manifest");
            self.abort().await;
            return Err(e);
        }

        let sealed = SealedManifest {
            uri: self.store.uri(&self.key),
            key: self.key,
            lines: self.lines,
            bytes: self.bytes,
            parts: self.parts.len(),
        };
        tracing::info!(
            key = %sealed.key,
            lines = sealed.lines,
            bytes = sealed.bytes,
            parts = sealed.parts,
            "Manifest sealed",
        );
        Ok(sealed)
    }

    /// Discard the open multipart session, if any. Failures are logged.
    pub async fn abort(mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self.store.abort_multipart(&self.key, &upload_id).await {
                tracing::warn!(key = %self.key, error = %e, "Failed to abort manifest upload");
            }
        }
    }

    async fn flush_part(&mut self) -> Result<(), StorageError> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .store
                    .create_multipart(&self.key, MANIFEST_CONTENT_TYPE)
                    .await?;
                self.upload_id = Some(id.clone());
                id
            }
        };

        let part_number = self.parts.len() as i32 + 1;
        let body = std::mem::take(&mut self.buffer);
        let size = body.len() as u64;

        let part = self
            .store
            .upload_part(&self.key, &upload_id, part_number, body)
            .await?;
        self.parts.push(part);
        self.bytes += size;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use renamer_core::job::WorkItem;

    use super::*;
    use crate::memory::MemoryStore;

    fn result(index: usize) -> NameResult {
        let item = WorkItem {
            index,
            input_ref: format!("in/{index:03}.jpg"),
            original_name: format!("{index:03}.jpg"),
        };
        let mut result = NameResult::completed(&item, format!("name-{index}.jpg"), 1);
        // Fixed so every line has the same length.
        result.timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        result
    }

    fn lines_of(body: &[u8]) -> Vec<NameResult> {
        std::str::from_utf8(body)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn key_is_job_scoped() {
        assert_eq!(manifest_key("demo/", "jr_1"), "demo/jobs/jr_1/manifest.jsonl");
        assert_eq!(manifest_key("", "jr_1"), "jobs/jr_1/manifest.jsonl");
    }

    #[tokio::test]
    async fn small_manifest_is_a_single_part() {
        let store = Arc::new(MemoryStore::new("out"));
        let mut writer = ManifestWriter::new(store.clone(), "m.jsonl", DEFAULT_PART_SIZE);
        writer.append(&[result(0), result(1)]).await.unwrap();
        assert!(store.object("m.jsonl").is_none(), "nothing visible before seal");

        let sealed = writer.seal().await.unwrap();
        assert_eq!(sealed.lines, 2);
        assert_eq!(sealed.parts, 1);
        assert_eq!(sealed.uri, "memory://out/m.jsonl");

        let body = store.object("m.jsonl").unwrap();
        assert!(body.ends_with(b"\n"));
        assert_eq!(lines_of(&body), vec![result(0), result(1)]);
        assert_eq!(store.content_type("m.jsonl").as_deref(), Some(MANIFEST_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn buffer_is_flushed_each_time_it_reaches_part_size() {
        let store = Arc::new(MemoryStore::new("out"));
        let line_len = serde_json::to_vec(&result(0)).unwrap().len() + 1;
        // Two lines per part.
        let mut writer = ManifestWriter::new(store.clone(), "m.jsonl", line_len * 2);

        for i in 0..5 {
            writer.append(&[result(i)]).await.unwrap();
        }
        assert_eq!(store.part_sizes().len(), 2, "two full parts uploaded during append");
        assert_eq!(store.open_uploads(), 1);

        let sealed = writer.seal().await.unwrap();
        assert_eq!(sealed.parts, 3);
        assert_eq!(sealed.lines, 5);

        let body = store.object("m.jsonl").unwrap();
        assert_eq!(sealed.bytes, body.len() as u64);
        let indices: Vec<usize> = lines_of(&body).iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_manifest_is_still_committed() {
        let store = Arc::new(MemoryStore::new("out"));
        let writer = ManifestWriter::new(store.clone(), "m.jsonl", DEFAULT_PART_SIZE);
        let sealed = writer.seal().await.unwrap();
        assert_eq!(sealed.lines, 0);
        assert_eq!(store.object("m.jsonl").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn finalize_failure_aborts_the_upload() {
        let store = Arc::new(MemoryStore::new("out"));
        store.fail_completions(true);

        let mut writer = ManifestWriter::new(store.clone(), "m.jsonl", DEFAULT_PART_SIZE);
        writer.append(&[result(0)]).await.unwrap();

        assert_matches!(writer.seal().await, Err(StorageError::Backend(_)));
        assert!(store.object("m.jsonl").is_none());
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn part_upload_failure_surfaces_from_append() {
        let store = Arc::new(MemoryStore::new("out"));
        store.fail_part_uploads(true);

        let mut writer = ManifestWriter::new(store.clone(), "m.jsonl", 1);
        assert!(writer.append(&[result(0)]).await.is_err());
        writer.abort().await;
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn rewriting_a_manifest_replaces_it() {
        let store = Arc::new(MemoryStore::new("out"));
        for count in [3, 1] {
            let mut writer = ManifestWriter::new(store.clone(), "m.jsonl", DEFAULT_PART_SIZE);
            let results: Vec<_> = (0..count).map(result).collect();
            writer.append(&results).await.unwrap();
            writer.seal().await.unwrap();
        }
        assert_eq!(lines_of(&store.object("m.jsonl").unwrap()).len(), 1);
    }
}
