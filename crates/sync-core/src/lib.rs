//! Core traits and types for the bidirectional synchronization engine.
//!
//! This crate defines the abstractions shared between the engine and its
//! collaborators:
//! - [`MetadataStore`]: durable sync-folder, file-metadata, and conflict state.
//! - [`RemoteClient`]: the remote storage server's HTTP API.
//! - [`EventSource`]: platform filesystem change notifications.
//! - the data model: [`SyncFolder`], [`FileMetadata`], [`Conflict`], [`DetectedChange`].

mod error;
mod event;
mod model;
mod remote;
mod store;

pub use error::{Result, SyncError};
pub use event::{EventSource, FsAction, FsEvent};
pub use model::{
    ChangeOrigin, ChangeType, Conflict, ConflictClassifier, ConflictPolicy, DetectedChange,
    FileMetadata, FileSyncState, FolderStatus, ResolutionTag, SyncFolder, SyncFolderUpdate,
    normalize_relative_path,
};
pub use remote::{Permissions, RemoteChange, RemoteClient, RemoteEntry};
pub use store::MetadataStore;
