//! File-system-like operations on a SmugMug account: resolving paths,
//! creating node chains, the sync orchestrator and the remaining commands.

mod commands;
mod paths;
mod sync;
mod tree;
mod walk;

pub use paths::{common_path, match_nodes, path_to_node, split_path, PathMatch};
pub use sync::SyncOptions;
pub use tree::match_or_create_nodes;
pub use walk::{ignore_list, walk_source, WalkStep, IGNORE_FILE};

use crate::api_client::{RemoteNode, SmugError, SmugMug};
use crate::foundation::console::Console;
use crate::foundation::media::MediaTypes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct SmugFs {
    smugmug: Arc<SmugMug>,
    console: Console,
    media: MediaTypes,
    folder_depth_limit: usize,
    aborting: Arc<AtomicBool>,
}

impl SmugFs {
    pub fn new(smugmug: Arc<SmugMug>, media: MediaTypes, folder_depth_limit: usize) -> Self {
        Self {
            console: smugmug.console().clone(),
            smugmug,
            media,
            folder_depth_limit,
            aborting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn smugmug(&self) -> &Arc<SmugMug> {
        &self.smugmug
    }

    /// Asks the running command to stop as soon as possible.
    pub fn abort(&self) {
        self.aborting.store(true, Ordering::SeqCst);
    }

    pub fn reset_abort(&self) {
        self.aborting.store(false, Ordering::SeqCst);
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.aborting.clone()
    }

    fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    fn user(&self, user: Option<&str>) -> Result<String, SmugError> {
        match user {
            Some(user) => Ok(user.to_string()),
            None => self.smugmug.get_auth_user(),
        }
    }

    pub fn get_root_node(&self, user: &str) -> Result<Arc<RemoteNode>, SmugError> {
        self.smugmug.get_root_node(user)
    }
}
