//! Resolving slash-separated paths against the remote node tree.

use crate::api_client::{RemoteNode, SmugError, SmugMug};
use std::sync::Arc;

/// The longest chain of existing nodes along a path, starting at the root,
/// and the path segments left over after it.
#[derive(Debug, Clone)]
pub struct PathMatch {
    matched: Vec<Arc<RemoteNode>>,
    pub unmatched: Vec<String>,
}

impl PathMatch {
    pub fn new(root: Arc<RemoteNode>, unmatched: Vec<String>) -> Self {
        Self {
            matched: vec![root],
            unmatched,
        }
    }

    pub fn matched(&self) -> &[Arc<RemoteNode>] {
        &self.matched
    }

    /// The deepest matched node. The root is always matched.
    pub fn last(&self) -> &Arc<RemoteNode> {
        &self.matched[self.matched.len() - 1]
    }

    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }

    /// Names of the matched nodes joined with `/`; the root contributes an
    /// empty name.
    pub fn matched_names(&self) -> String {
        self.matched
            .iter()
            .map(|node| node.name())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub(crate) fn push(&mut self, node: Arc<RemoteNode>) {
        self.matched.push(node);
    }
}

/// Splits `path` on `/`, dropping empty segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves `path` from the root node of `user`.
pub fn path_to_node(
    smugmug: &Arc<SmugMug>,
    user: &str,
    path: &str,
) -> Result<PathMatch, SmugError> {
    let root = smugmug.get_root_node(user)?;
    match_nodes(PathMatch::new(root, split_path(path)))
}

/// Extends `found` with the children matching its unmatched segments, one
/// level at a time, stopping at the first missing one.
///
/// Looking up a child below a file is an error.
pub fn match_nodes(mut found: PathMatch) -> Result<PathMatch, SmugError> {
    let dirs = std::mem::take(&mut found.unmatched);
    let mut path = String::new();
    let mut matched = 0;
    for name in &dirs {
        if found.last().is_file() {
            return Err(SmugError::InvalidPath(format!(
                "\"{}\" is a file, it can't have child nodes.",
                path
            )));
        }
        path.push('/');
        path.push_str(name);
        match found.last().get_child(name)? {
            Some(child) => {
                found.push(child);
                matched += 1;
            }
            None => break,
        }
    }
    found.unmatched = dirs[matched..].to_vec();
    Ok(found)
}

/// Keeps the prefix of `matched` whose names equal `local_dirs`, leaving the
/// rest of `local_dirs` unmatched. The root always stays matched.
pub fn common_path(matched: &[Arc<RemoteNode>], local_dirs: &[String]) -> Option<PathMatch> {
    let (root, below_root) = matched.split_first()?;
    let mut found = PathMatch::new(root.clone(), Vec::new());
    let mut common = 0;
    for (remote, local) in below_root.iter().zip(local_dirs) {
        if remote.name() != local {
            break;
        }
        found.push(remote.clone());
        common += 1;
    }
    found.unmatched = local_dirs[common..].to_vec();
    Some(found)
}
