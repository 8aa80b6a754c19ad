pub mod blob;
pub mod journal;
pub mod registry;
pub mod upstream;
pub mod upstream_client;

pub use blob::{BlobKey, BlobStore, FilesystemBlobStore, MemoryBlobStore};
pub use journal::WriteJournal;
pub use registry::{Registry, is_valid_name};
pub use upstream::{UpstreamProxy, UpstreamStatsSnapshot};
pub use upstream_client::{HttpUpstreamClient, UpstreamClient};
