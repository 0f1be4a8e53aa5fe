//! Object storage for job inputs and result manifests.
//!
//! - [`ObjectStore`]: the storage port, covering whole-object reads and the
//!   multipart write protocol.
//! - [`S3Store`]: Amazon S3 / S3-compatible implementation.
//! - [`MemoryStore`]: in-process implementation for tests and local runs.
//! - [`ManifestWriter`]: chunked, append-only JSONL manifest writer.

pub mod manifest;
pub mod memory;
pub mod s3;
pub mod store;

pub use manifest::{manifest_key, ManifestWriter, SealedManifest, DEFAULT_PART_SIZE};
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};
pub use store::{ObjectStore, StorageError, UploadedPart};
