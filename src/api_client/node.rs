//! Remote Folder, Album and File nodes.
//!
//! A [`RemoteNode`] wraps the JSON the service returned for one entry and
//! caches its children by name. The cache is filled on the first lookup,
//! guarded by a per-node lock held across the whole check-then-create
//! sequence of [`RemoteNode::get_or_create_child`], and cleared again by the
//! [`ChildCacheGarbageCollector`](crate::api_client::ChildCacheGarbageCollector).

use crate::api_client::gc::ChildCache;
use crate::api_client::smugmug::SmugMug;
use crate::api_client::transport::{ApiResponse, ProgressFn, UploadRequest};
use crate::api_client::SmugError;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::warn;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

type ChildMap = HashMap<String, Vec<Arc<RemoteNode>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    Album,
    File,
}

impl NodeKind {
    fn from_json(json: &Value) -> Self {
        match json.get("Type").and_then(Value::as_str) {
            Some("Folder") => NodeKind::Folder,
            Some("Album") => NodeKind::Album,
            _ => NodeKind::File,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "Folder",
            NodeKind::Album => "Album",
            NodeKind::File => "File",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Privacy {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "Public",
            Privacy::Unlisted => "Unlisted",
            Privacy::Private => "Private",
        }
    }
}

impl FromStr for Privacy {
    type Err = SmugError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            "private" => Ok(Privacy::Private),
            other => Err(SmugError::InvalidArgument(format!(
                "Invalid privacy \"{}\", expected public, unlisted or private.",
                other
            ))),
        }
    }
}

/// Parameters of a node created by [`RemoteNode::get_or_create_child`].
#[derive(Debug, Clone, Copy)]
pub struct NewNode {
    pub kind: NodeKind,
    pub privacy: Privacy,
}

impl NewNode {
    pub fn new(kind: NodeKind, privacy: Privacy) -> Self {
        Self { kind, privacy }
    }
}

/// Which slice of a children listing to request.
#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub start: usize,
    /// Defaults to the client's configured page size.
    pub count: Option<usize>,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            start: 1,
            count: None,
        }
    }
}

pub struct RemoteNode {
    id: u64,
    smugmug: Arc<SmugMug>,
    kind: NodeKind,
    name: String,
    json: Value,
    parent: Weak<RemoteNode>,
    children: Mutex<Option<ChildMap>>,
}

impl RemoteNode {
    pub(crate) fn from_json(
        smugmug: Arc<SmugMug>,
        json: Value,
        parent: Option<&Arc<RemoteNode>>,
    ) -> Arc<Self> {
        Self::build(smugmug, json, parent, None)
    }

    fn build(
        smugmug: Arc<SmugMug>,
        json: Value,
        parent: Option<&Arc<RemoteNode>>,
        children: Option<ChildMap>,
    ) -> Arc<Self> {
        let name = json
            .get("FileName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .or_else(|| json.get("Name").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        Arc::new(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            smugmug,
            kind: NodeKind::from_json(&json),
            name,
            json,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            children: Mutex::new(children),
        })
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw attributes returned by the service.
    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.json.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Server-side MD5 of the original upload, for files.
    pub fn archived_md5(&self) -> Option<&str> {
        self.get_str("ArchivedMD5")
    }

    /// Upper-case format of a file (`JPG`, `MP4`...).
    pub fn format(&self) -> Option<&str> {
        self.get_str("Format")
    }

    pub fn smugmug(&self) -> &Arc<SmugMug> {
        &self.smugmug
    }

    /// Names from the root down to this node, joined with `/`. The root node
    /// has an empty name, so its direct children have no leading separator.
    pub fn path(&self) -> String {
        match self.parent.upgrade() {
            Some(parent) => join_path(&parent.path(), &self.name),
            None => self.name.clone(),
        }
    }

    /// The URI of this node's `url_name` relation.
    pub fn uri(&self, url_name: &str) -> Result<String, SmugError> {
        let uri = self
            .json
            .get("Uris")
            .and_then(|uris| uris.get(url_name))
            .and_then(|entry| entry.get("Uri"));
        match uri {
            None | Some(Value::Null) => Err(SmugError::UnexpectedResponse(format!(
                "Node does not have a \"{}\" uri.",
                url_name
            ))),
            Some(Value::String(uri)) if !uri.is_empty() => Ok(uri.clone()),
            Some(other) => Err(SmugError::UnexpectedResponse(format!(
                "Expected uri \"{}\" to be a string, but got: \"{}\".",
                url_name, other
            ))),
        }
    }

    pub fn get_node(self: &Arc<Self>, url_name: &str) -> Result<Arc<RemoteNode>, SmugError> {
        let uri = self.uri(url_name)?;
        self.smugmug.get_node(&uri, Some(self))
    }

    pub fn get_list(
        self: &Arc<Self>,
        url_name: &str,
        params: PageParams,
    ) -> Result<NodeList, SmugError> {
        let uri = self.uri(url_name)?;
        self.smugmug
            .get_list(&uri, &self.page_query(params), Some(self.clone()))
    }

    pub fn post(&self, url_name: &str, form: &[(String, String)]) -> Result<ApiResponse, SmugError> {
        self.smugmug.post(&self.uri(url_name)?, form)
    }

    pub fn patch(&self, url_name: &str, json: &Value) -> Result<ApiResponse, SmugError> {
        self.smugmug.patch(&self.uri(url_name)?, json)
    }

    /// Deletes this node on the server. Children go with it.
    pub fn delete(&self) -> Result<ApiResponse, SmugError> {
        let uri = self
            .get_str("Uri")
            .ok_or_else(|| SmugError::UnexpectedResponse("Node does not have a \"Uri\".".into()))?;
        self.smugmug.delete(uri)
    }

    /// Uploads `data` as `file_name` into the album behind `url_name`.
    pub fn upload(
        &self,
        url_name: &str,
        file_name: &str,
        data: Vec<u8>,
        progress: Option<ProgressFn>,
        replace_image_uri: Option<String>,
    ) -> Result<ApiResponse, SmugError> {
        self.smugmug.upload(UploadRequest {
            album_uri: self.uri(url_name)?,
            file_name: file_name.to_string(),
            data,
            replace_image_uri,
            progress,
        })
    }

    /// Lists this node's children one page at a time. Album children are
    /// its images.
    pub fn get_children(self: &Arc<Self>, params: PageParams) -> Result<NodeList, SmugError> {
        if self.get("Type").is_none() {
            return Err(SmugError::UnexpectedResponse(
                "Node does not have a \"Type\" attribute.".to_string(),
            ));
        }

        if self.kind == NodeKind::Album {
            let album = self.get_node("Album")?;
            let uri = album.uri("AlbumImages")?;
            return self
                .smugmug
                .get_list(&uri, &self.page_query(params), Some(self.clone()));
        }
        self.get_list("ChildNodes", params)
    }

    pub fn has_children(self: &Arc<Self>) -> Result<bool, SmugError> {
        let children = self.get_children(PageParams {
            start: 1,
            count: Some(1),
        })?;
        Ok(!children.is_empty())
    }

    /// Looks `name` up among this node's children, listing them on first use.
    pub fn get_child(self: &Arc<Self>, name: &str) -> Result<Option<Arc<RemoteNode>>, SmugError> {
        let matches = {
            let mut children = self.children.lock();
            self.populate(&mut children)?.get(name).cloned()
        };
        self.smugmug.garbage_collector().visited(self);
        self.single_match(name, matches)
    }

    /// Returns the child called `name`, creating it on the server first if
    /// it doesn't exist yet.
    pub fn get_or_create_child(
        self: &Arc<Self>,
        name: &str,
        params: NewNode,
    ) -> Result<Arc<RemoteNode>, SmugError> {
        let (child, created) = {
            let mut children = self.children.lock();
            let map = self.populate(&mut children)?;
            match self.single_match(name, map.get(name).cloned())? {
                Some(child) => (child, false),
                None => {
                    let child = self.create_child(name, params)?;
                    map.insert(name.to_string(), vec![child.clone()]);
                    (child, true)
                }
            }
        };

        let gc = self.smugmug.garbage_collector();
        gc.visited(self);
        if created {
            gc.visited(&child);
            if child.kind == NodeKind::Album {
                let sort = json!({ "SortMethod": "DateTimeOriginal" });
                if let Err(e) = child.patch("Album", &sort) {
                    warn!("Cannot set sort order of album \"{}\": {}", child.path(), e);
                }
            }
        }
        Ok(child)
    }

    fn create_child(self: &Arc<Self>, name: &str, params: NewNode) -> Result<Arc<RemoteNode>, SmugError> {
        if self.kind != NodeKind::Folder {
            return Err(SmugError::InvalidArgument(format!(
                "Nodes can only be created in folders.\n\"{}\" is of type \"{}\".",
                self.name, self.kind
            )));
        }

        let remote_name = name.trim();
        let mut form: Vec<(String, String)> = vec![
            ("Name".into(), remote_name.to_string()),
            ("Privacy".into(), params.privacy.as_str().into()),
            ("SortDirection".into(), "Ascending".into()),
            ("SortMethod".into(), "Name".into()),
            ("Type".into(), params.kind.as_str().into()),
        ];
        form.sort();

        self.smugmug.console().println(format!(
            "Creating {} \"{}\".",
            params.kind,
            join_path(&self.path(), remote_name)
        ));
        let response = self.post("ChildNodes", &form)?.json().map_err(|_| {
            SmugError::UnexpectedResponse(format!(
                "Error creating node \"{}\". Expected a JSON response from SmugMug service.",
                name
            ))
        })?;

        let node_json = response
            .get("Response")
            .and_then(|r| r.get("Node"))
            .filter(|node| node.is_object())
            .cloned()
            .ok_or_else(|| {
                SmugError::UnexpectedResponse("Cannot resolve created node JSON".to_string())
            })?;
        Ok(Self::build(
            self.smugmug.clone(),
            node_json,
            Some(self),
            Some(ChildMap::new()),
        ))
    }

    fn populate<'a>(
        self: &Arc<Self>,
        children: &'a mut Option<ChildMap>,
    ) -> Result<&'a mut ChildMap, SmugError> {
        if children.is_none() {
            let mut map = ChildMap::new();
            for child in self.get_children(PageParams::default())? {
                let child = child?;
                map.entry(child.name().to_string()).or_default().push(child);
            }
            *children = Some(map);
        }
        Ok(children.get_or_insert_with(ChildMap::new))
    }

    fn single_match(
        &self,
        name: &str,
        matches: Option<Vec<Arc<RemoteNode>>>,
    ) -> Result<Option<Arc<RemoteNode>>, SmugError> {
        match matches {
            Some(matches) if matches.len() > 1 => Err(SmugError::RemoteData(format!(
                "Multiple remote nodes matches \"{}\" in node \"{}\".",
                name, self.name
            ))),
            Some(mut matches) => Ok(matches.pop()),
            None => Ok(None),
        }
    }

    fn page_query(&self, params: PageParams) -> Vec<(String, String)> {
        vec![
            ("start".to_string(), params.start.to_string()),
            (
                "count".to_string(),
                params.count.unwrap_or(self.smugmug.page_size()).to_string(),
            ),
        ]
    }
}

impl ChildCache for RemoteNode {
    fn cache_id(&self) -> u64 {
        self.id
    }

    fn reset_cache(&self) {
        *self.children.lock() = None;
    }
}

impl fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteNode")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("path", &self.path())
            .finish()
    }
}

/// Joins a node path and a child name the way node paths are displayed.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn page_start_regex() -> &'static Regex {
    static PAGE_START: OnceLock<Regex> = OnceLock::new();
    PAGE_START.get_or_init(|| Regex::new(r"(\?.*start=)[0-9]+").expect("valid page regex"))
}

/// A paginated list of nodes. Only the first page is fetched up front; the
/// others are requested when iteration reaches them and kept afterwards.
pub struct NodeList {
    smugmug: Arc<SmugMug>,
    parent: Option<Arc<RemoteNode>>,
    uri: String,
    page_size: usize,
    total: usize,
    pages: Vec<Option<Vec<Value>>>,
    next_index: usize,
}

impl NodeList {
    pub(crate) fn new(
        smugmug: Arc<SmugMug>,
        reply: &Value,
        path: &str,
        parent: Option<Arc<RemoteNode>>,
    ) -> Result<Self, SmugError> {
        let response = reply.get("Response").ok_or_else(|| invalid_list(path))?;
        let pages_info = response.get("Pages").ok_or_else(|| invalid_list(path))?;
        let page_size = pages_info
            .get("RequestedCount")
            .and_then(Value::as_u64)
            .or_else(|| pages_info.get("Count").and_then(Value::as_u64))
            .unwrap_or(0) as usize;
        let total = pages_info.get("Total").and_then(Value::as_u64).unwrap_or(0) as usize;
        let page_count = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        };

        let mut pages = vec![None; page_count];
        if let Some(first) = pages.first_mut() {
            *first = Some(page_items(response));
        }
        let uri = response
            .get("Uri")
            .and_then(Value::as_str)
            .unwrap_or(path)
            .to_string();

        Ok(Self {
            smugmug,
            parent,
            uri,
            page_size,
            total: if page_size == 0 { 0 } else { total },
            pages,
            next_index: 0,
        })
    }

    /// Total number of entries across all pages.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn get(&mut self, index: usize) -> Result<Option<Arc<RemoteNode>>, SmugError> {
        if index >= self.total {
            return Ok(None);
        }
        let page_index = index / self.page_size;
        let offset = index - page_index * self.page_size;
        if self.pages[page_index].is_none() {
            let start = page_index * self.page_size + 1;
            let page_uri = page_start_regex()
                .replace(&self.uri, |caps: &Captures| format!("{}{}", &caps[1], start))
                .into_owned();
            let reply = self.smugmug.get_json(&page_uri, &[])?;
            let response = reply.get("Response").ok_or_else(|| invalid_list(&page_uri))?;
            self.pages[page_index] = Some(page_items(response));
        }

        let item = self.pages[page_index]
            .as_ref()
            .and_then(|page| page.get(offset))
            .cloned();
        Ok(item.map(|json| RemoteNode::from_json(self.smugmug.clone(), json, self.parent.as_ref())))
    }
}

impl Iterator for NodeList {
    type Item = Result<Arc<RemoteNode>, SmugError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next_index;
        self.next_index += 1;
        self.get(index).transpose()
    }
}

fn page_items(response: &Value) -> Vec<Value> {
    response
        .get("Locator")
        .and_then(Value::as_str)
        .and_then(|locator| response.get(locator))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn invalid_list(path: &str) -> SmugError {
    SmugError::UnexpectedResponse(format!("Expected {} to be a list.", path))
}
