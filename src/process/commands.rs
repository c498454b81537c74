//! The commands other than `sync`: browsing, creating and deleting nodes,
//! direct uploads and editing the local ignore lists.

use crate::api_client::{upload_files, NodeKind, PageParams, Privacy, RemoteNode, SmugError};
use crate::configuration::ApiSettings;
use crate::foundation::persistent::PersistentDict;
use crate::process::paths::path_to_node;
use crate::process::tree::match_or_create_nodes;
use crate::process::walk::IGNORE_FILE;
use crate::process::SmugFs;
use reqwest::Url;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

impl SmugFs {
    /// Logs in with an API key and secret, then greets the account owner.
    pub fn login(&self, key: &str, secret: &str) -> Result<(), SmugError> {
        self.smugmug.login(key, secret)?;
        let user = self.smugmug.get_auth_user()?;
        self.console.println(format!("Logged in as \"{}\".", user));
        Ok(())
    }

    pub fn logout(&self) -> Result<(), SmugError> {
        self.smugmug.logout()?;
        self.console.println("Logged out.");
        Ok(())
    }

    /// GETs an API URL (absolute or a bare `/api/v2/...` path) and prints
    /// the reply as indented JSON.
    pub fn get(&self, url: &str) -> Result<(), SmugError> {
        let (path, params) = split_url(url)?;
        let reply = self.smugmug.get_json(&path, &params)?;
        self.console.println(serde_json::to_string_pretty(&reply)?);
        Ok(())
    }

    /// Lists the children of the node at `path`, or the file itself.
    ///
    /// `details` prints each node's JSON; `query` (a JSON pointer) prints
    /// only the value it selects in each node.
    pub fn ls(
        &self,
        user: Option<&str>,
        path: &str,
        details: bool,
        query: Option<&str>,
    ) -> Result<(), SmugError> {
        if let Some(query) = query.filter(|q| !q.is_empty() && !q.starts_with('/')) {
            self.console.println(format!(
                "Invalid query string \"{}\": JSON pointers start with \"/\".",
                query
            ));
            return Ok(());
        }

        let user = self.user(user)?;
        let found = path_to_node(&self.smugmug, &user, path)?;
        if let Some(missing) = found.unmatched.first() {
            self.console.println(format!(
                "\"{}\" not found in \"{}\".",
                missing,
                found.matched_names()
            ));
            return Ok(());
        }

        let node = found.last();
        let nodes: Vec<(String, Arc<RemoteNode>)> = if node.get("FileName").is_some() {
            vec![(path.to_string(), node.clone())]
        } else {
            node.get_children(PageParams::default())?
                .map(|child| child.map(|child| (child.name().to_string(), child)))
                .collect::<Result<_, _>>()?
        };

        for (name, node) in nodes {
            if let Some(query) = query {
                match node.json().pointer(query) {
                    Some(Value::String(value)) => self.console.println(value),
                    Some(value) => self.console.println(value.to_string()),
                    None => {}
                }
            } else if details {
                self.console.println(serde_json::to_string_pretty(node.json())?);
            } else {
                self.console.println(name);
            }
        }
        Ok(())
    }

    /// Creates a folder or album per path. Missing parents are created only
    /// with `create_parents`.
    pub fn make_node(
        &self,
        user: Option<&str>,
        paths: &[String],
        create_parents: bool,
        kind: NodeKind,
        privacy: Privacy,
    ) -> Result<(), SmugError> {
        let user = self.user(user)?;
        for path in paths {
            let result = path_to_node(&self.smugmug, &user, path).and_then(|found| {
                if found.unmatched.len() > 1 && !create_parents {
                    self.console.println(format!(
                        "\"{}\" not found in \"{}\".",
                        found.unmatched[0],
                        found.matched_names()
                    ));
                } else if found.is_complete() {
                    self.console
                        .println(format!("Path \"{}\" already exists.", path));
                } else {
                    match_or_create_nodes(found, kind, privacy, self.folder_depth_limit)?;
                }
                Ok(())
            });
            if let Err(e) = result {
                self.console.println(e.to_string());
            }
        }
        Ok(())
    }

    /// Deletes empty folders and albums, then their empty ancestors when
    /// `parents` is set.
    pub fn rmdir(&self, user: Option<&str>, parents: bool, dirs: &[String]) -> Result<(), SmugError> {
        let user = self.user(user)?;
        for name in dirs {
            if let Err(e) = self.remove_dir(&user, parents, name) {
                self.console.println(e.to_string());
            }
        }
        Ok(())
    }

    fn remove_dir(&self, user: &str, parents: bool, name: &str) -> Result<(), SmugError> {
        let found = path_to_node(&self.smugmug, user, name)?;
        if !found.is_complete() {
            self.console
                .println(format!("Folder or album \"{}\" not found.", name));
            return Ok(());
        }

        let mut nodes = found.matched()[1..].to_vec();
        while !nodes.is_empty() {
            let current_dir = nodes
                .iter()
                .map(|node| node.name())
                .collect::<Vec<_>>()
                .join("/");
            let Some(node) = nodes.pop() else { break };
            if node.is_file() {
                self.console.println(format!(
                    "Cannot delete file \"{}\", rmdir can only delete empty folder or album.",
                    current_dir
                ));
                break;
            }
            if node.has_children()? {
                self.console.println(format!(
                    "Cannot delete {}: \"{}\" is not empty.",
                    node.kind().as_str().to_lowercase(),
                    current_dir
                ));
                break;
            }

            self.console.println(format!("Deleting \"{}\".", current_dir));
            node.delete()?;
            if !parents {
                break;
            }
        }
        Ok(())
    }

    /// Deletes nodes, asking for each one unless `force` is set. Folders and
    /// albums with content are only deleted when `recursive` is set.
    pub fn rm(
        &self,
        user: Option<&str>,
        force: bool,
        recursive: bool,
        paths: &[String],
    ) -> Result<(), SmugError> {
        let user = self.user(user)?;
        for path in paths {
            if let Err(e) = self.remove_node(&user, force, recursive, path) {
                self.console.println(e.to_string());
            }
        }
        Ok(())
    }

    fn remove_node(&self, user: &str, force: bool, recursive: bool, path: &str) -> Result<(), SmugError> {
        let found = path_to_node(&self.smugmug, user, path)?;
        if !found.is_complete() {
            self.console.println(format!("\"{}\" not found.", path));
            return Ok(());
        }

        let node = found.last();
        let kind = node.kind();
        if !node.is_file() && !recursive && node.has_children()? {
            self.console
                .println(format!("{} \"{}\" is not empty.", kind, path));
            return Ok(());
        }

        if force || self.console.ask(&format!("Remove {} node \"{}\"? ", kind, path)) {
            self.console.println(format!("Removing \"{}\".", path));
            node.delete()?;
        }
        Ok(())
    }

    /// Uploads the files matching `patterns` to the album at `album`,
    /// skipping names it already holds.
    pub fn upload(
        &self,
        user: Option<&str>,
        patterns: &[String],
        album: &str,
        create_parents: bool,
        privacy: Privacy,
    ) -> Result<(), SmugError> {
        let user = self.user(user)?;
        let mut found = path_to_node(&self.smugmug, &user, album)?;
        if !found.is_complete() {
            if !create_parents {
                self.console
                    .println(format!("Album not found: \"{}\".", album));
                return Ok(());
            }
            found = match_or_create_nodes(found, NodeKind::Album, privacy, self.folder_depth_limit)?;
        }

        let node = found.last();
        if node.kind() != NodeKind::Album {
            self.console.println(format!(
                "Cannot upload images in node of type \"{}\".",
                node.kind()
            ));
            return Ok(());
        }

        let mut files = Vec::new();
        for pattern in patterns {
            let paths = glob::glob(pattern).map_err(|e| {
                SmugError::InvalidArgument(format!("Invalid pattern \"{}\": {}", pattern, e))
            })?;
            files.extend(
                paths
                    .filter_map(Result::ok)
                    .map(|path| path.to_string_lossy().into_owned()),
            );
        }
        upload_files(node, album, &files, &self.console, &self.aborting)
    }

    /// Adds `paths` to (or removes them from) the ignore list stored next
    /// to them.
    pub fn ignore_or_include(&self, paths: &[String], ignore: bool) -> Result<(), SmugError> {
        let mut files_by_folder: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in paths {
            let (folder, file) = split_local_path(path);
            files_by_folder.entry(folder).or_default().push(file);
        }

        for (folder, files) in files_by_folder {
            let dir = if folder.is_empty() { "." } else { folder.as_str() };
            if !Path::new(dir).is_dir() {
                self.console
                    .println(format!("Can't find folder \"{}\".", folder));
                return Ok(());
            }
            for file in &files {
                let full_path = if folder.is_empty() {
                    file.clone()
                } else {
                    Path::new(&folder).join(file).to_string_lossy().into_owned()
                };
                if !Path::new(&full_path).exists() {
                    self.console
                        .println(format!("\"{}\" doesn't exists.", full_path));
                    return Ok(());
                }
            }

            let settings = PersistentDict::open(Path::new(dir).join(IGNORE_FILE))?;
            let mut ignored: BTreeSet<String> = settings
                .get::<Vec<String>>("ignore")
                .unwrap_or_default()
                .into_iter()
                .collect();
            for file in files {
                if ignore {
                    ignored.insert(file);
                } else {
                    ignored.remove(&file);
                }
            }
            if ignored.is_empty() {
                settings.remove("ignore")?;
            } else {
                settings.set("ignore", ignored)?;
            }
        }
        Ok(())
    }
}

/// Splits an API URL into its path and decoded query parameters. Scheme and
/// host, when present, are dropped; bare paths are resolved against the
/// default API host.
fn split_url(url: &str) -> Result<(String, Vec<(String, String)>), SmugError> {
    let parsed = if url.contains("://") {
        Url::parse(url)
    } else {
        Url::parse(&ApiSettings::default().api_base_url).and_then(|base| base.join(url))
    }
    .map_err(|e| SmugError::InvalidArgument(format!("Invalid URL \"{}\": {}", url, e)))?;

    let params = parsed
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    Ok((parsed.path().to_string(), params))
}

/// Splits a local path into its folder and last component.
fn split_local_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", file)) => ("/".to_string(), file.to_string()),
        Some((folder, file)) => (folder.to_string(), file.to_string()),
        None => (String::new(), path.to_string()),
    }
}
