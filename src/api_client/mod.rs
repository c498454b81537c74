mod compare;
mod error;
mod gc;
mod node;
pub mod oauth;
mod smugmug;
pub mod transport;
mod upload;

#[cfg(test)]
pub(crate) mod fake;

pub use compare::{decide, find_remote_match, SyncDecision};
pub use error::SmugError;
pub use gc::{ChildCache, ChildCacheGarbageCollector};
pub use node::{join_path, NewNode, NodeKind, NodeList, PageParams, Privacy, RemoteNode};
pub use smugmug::SmugMug;
pub use transport::{ApiResponse, HttpTransport, Transport, UploadRequest};
pub use upload::{upload_files, upload_media, UploadTask};
