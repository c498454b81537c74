use crate::api_client::{NewNode, NodeKind, Privacy, SmugError};
use crate::process::paths::PathMatch;

/// Creates the unmatched segments of `found` below its deepest matched node.
///
/// Intermediate segments become folders and the last one a node of `kind`.
/// Existing children are reused, so concurrent callers creating overlapping
/// chains end up with a single node per name. Chains deeper than
/// `depth_limit` (counting the root, but not a trailing album) are refused
/// before anything is created.
///
/// # Arguments
///
/// * `found` - The result of resolving the wanted path; its unmatched segments are created.
/// * `kind` - Type of the last node. Everything above it is a folder.
/// * `privacy` - Access control given to every node created.
/// * `depth_limit` - Deepest chain of nodes the server accepts, counting the root.
///
/// # Returns
///
/// The same match, with every segment matched. A `Limits` error when the
/// chain is too deep.
pub fn match_or_create_nodes(
    mut found: PathMatch,
    kind: NodeKind,
    privacy: Privacy,
    depth_limit: usize,
) -> Result<PathMatch, SmugError> {
    let dirs = std::mem::take(&mut found.unmatched);
    let mut depth = found.matched().len() + dirs.len();
    if kind == NodeKind::Album {
        depth -= 1;
    }
    if depth >= depth_limit {
        return Err(SmugError::Limits(format!(
            "Cannot create \"{}/{}\", SmugMug does not support folder more than {} level deep.",
            found.last().path(),
            dirs.join("/"),
            depth_limit.saturating_sub(2)
        )));
    }

    let count = dirs.len();
    for (index, name) in dirs.iter().enumerate() {
        let child_kind = if index + 1 == count { kind } else { NodeKind::Folder };
        let child = found
            .last()
            .get_or_create_child(name, NewNode::new(child_kind, privacy))?;
        found.push(child);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::fake::{TestEnv, FAKE_USER};
    use crate::process::paths::path_to_node;

    const DEPTH_LIMIT: usize = 7;

    fn create(env: &TestEnv, path: &str, kind: NodeKind) -> Result<PathMatch, SmugError> {
        let found = path_to_node(&env.smugmug, FAKE_USER, path).unwrap();
        match_or_create_nodes(found, kind, Privacy::Public, DEPTH_LIMIT)
    }

    #[test]
    fn test_creates_folders_then_the_requested_kind() {
        let env = TestEnv::new();
        env.transport.add_folder("Photos");

        let found = create(&env, "/Photos/2020/Trip", NodeKind::Album).unwrap();
        assert_eq!(found.last().path(), "Photos/2020/Trip");
        assert_eq!(env.transport.kind_of("Photos/2020").as_deref(), Some("Folder"));
        assert_eq!(env.transport.kind_of("Photos/2020/Trip").as_deref(), Some("Album"));
        assert_eq!(
            env.output(),
            vec![
                "Creating Folder \"Photos/2020\".",
                "Creating Album \"Photos/2020/Trip\".",
            ]
        );
    }

    #[test]
    fn test_privacy_applies_to_every_created_node() {
        let env = TestEnv::new();
        let found = path_to_node(&env.smugmug, FAKE_USER, "/a/b").unwrap();
        match_or_create_nodes(found, NodeKind::Album, Privacy::Private, DEPTH_LIMIT).unwrap();
        assert_eq!(env.transport.node_privacy("a").as_deref(), Some("Private"));
        assert_eq!(env.transport.node_privacy("a/b").as_deref(), Some("Private"));
    }

    #[test]
    fn test_folder_depth_limit() {
        let env = TestEnv::new();
        assert!(create(&env, "/1/2/3/4/5", NodeKind::Folder).is_ok());

        env.transport.clear_calls();
        let err = create(&env, "/1/2/3/4/5/6", NodeKind::Folder).unwrap_err();
        assert!(matches!(err, SmugError::Limits(_)));
        assert_eq!(
            err.to_string(),
            "Cannot create \"1/2/3/4/5/6\", SmugMug does not support folder more than 5 level deep."
        );
        assert!(env.transport.mutations().is_empty());
    }

    #[test]
    fn test_album_may_sit_one_level_below_the_deepest_folder() {
        let env = TestEnv::new();
        assert!(create(&env, "/1/2/3/4/5/6", NodeKind::Album).is_ok());
        assert_eq!(env.transport.kind_of("1/2/3/4/5/6").as_deref(), Some("Album"));

        let err = create(&env, "/a/2/3/4/5/6/7", NodeKind::Album).unwrap_err();
        assert!(matches!(err, SmugError::Limits(_)));
        assert!(!env.transport.exists("a"));
    }

    #[test]
    fn test_existing_nodes_are_reused() {
        let env = TestEnv::new();
        env.transport.add_folder("a/b");
        let found = path_to_node(&env.smugmug, FAKE_USER, "/a").unwrap();
        let mut partial = found.clone();
        partial.unmatched = vec!["b".to_string(), "c".to_string()];

        let found = match_or_create_nodes(partial, NodeKind::Album, Privacy::Public, DEPTH_LIMIT)
            .unwrap();
        assert_eq!(found.last().path(), "a/b/c");
        assert_eq!(env.transport.mutations(), vec!["POST a/b/c", "PATCH a/b/c"]);
    }
}
