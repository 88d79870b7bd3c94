//! sync-core: Local mirror of remote calendar and contact records.
//!
//! This crate provides the core functionality for:
//! - Modeling remote records and encoding them as markdown files with YAML headers
//! - Indexing a directory of record files by remote id
//! - Reconciling a directory against full-window snapshots or delta batches
//! - FileSystem and remote source trait abstractions

pub mod codec;
pub mod engine;
pub mod fs;
pub mod index;
pub mod record;
pub mod remote;
pub mod state;

pub use codec::{CodecError, CodecOptions, ContactHeader, EventHeader, RecordCodec};
pub use engine::{FileMove, LocalRecord, Reconciler, SyncError, SyncReport, Warning};
pub use fs::{FileEntry, FileSystem, FsError, InMemoryFs};
pub use index::IdentityIndex;
pub use record::{Category, Contact, Event, Strategy, SyncRecord};
pub use remote::{DeltaBatch, DeltaSource, MemorySource, RemoteError, TimeWindow, WindowSource};
pub use state::{StateError, SyncState, SyncStateStore};
