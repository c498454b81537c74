//! In-memory SmugMug service and test fixtures.
//!
//! [`FakeTransport`] answers the same routes the client uses against the real
//! API: users, nodes and their children, albums and their images, image
//! metadata, node creation, deletion and uploads. Every mutating request is
//! recorded with the readable path of the node it touched.

use crate::api_client::node::RemoteNode;
use crate::api_client::smugmug::SmugMug;
use crate::api_client::transport::{ApiResponse, Transport, UploadRequest};
use crate::api_client::SmugError;
use crate::foundation::console::{Console, MemorySink, MockPrompter};
use crate::foundation::media::{extract_last_modified, split_extension};
use crate::foundation::persistent::PersistentDict;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use tempfile::TempDir;

pub const FAKE_USER: &str = "cmac";
pub const TEST_PAGE_SIZE: usize = 10;
pub(crate) const ROOT_ID: u64 = 0;
const DEFAULT_MODIFIED: &str = "1970-01-01T00:00:00";

#[derive(Clone)]
struct FakeImage {
    id: u64,
    file_name: String,
    md5: String,
    format: String,
    modified: String,
}

#[derive(Clone)]
struct FakeNode {
    name: String,
    kind: String,
    privacy: String,
    parent: Option<u64>,
    children: Vec<u64>,
    images: Vec<FakeImage>,
}

struct FakeState {
    nodes: BTreeMap<u64, FakeNode>,
    next_id: u64,
    calls: Vec<String>,
    fail_patches: bool,
}

impl FakeState {
    fn path_of(&self, id: u64) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(node) = self.nodes.get(&id) else { break };
            if node.parent.is_some() {
                names.push(node.name.clone());
            }
            current = node.parent;
        }
        names.reverse();
        names.join("/")
    }

    fn find(&self, path: &str) -> Option<u64> {
        let mut current = ROOT_ID;
        for name in path.split('/').filter(|s| !s.is_empty()) {
            current = *self.nodes.get(&current)?.children.iter().find(|child| {
                self.nodes
                    .get(child)
                    .map(|node| node.name == name)
                    .unwrap_or(false)
            })?;
        }
        Some(current)
    }

    fn create(&mut self, parent: u64, name: &str, kind: &str, privacy: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            FakeNode {
                name: name.to_string(),
                kind: kind.to_string(),
                privacy: privacy.to_string(),
                parent: Some(parent),
                children: Vec::new(),
                images: Vec::new(),
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.push(id);
        }
        id
    }

    fn ensure(&mut self, path: &str, kind: &str) -> u64 {
        let names: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = ROOT_ID;
        for (i, name) in names.iter().enumerate() {
            let existing = self.nodes[&current]
                .children
                .iter()
                .copied()
                .find(|child| self.nodes[child].name == *name);
            current = match existing {
                Some(id) => id,
                None => {
                    let kind = if i + 1 == names.len() { kind } else { "Folder" };
                    self.create(current, name, kind, "Public")
                }
            };
        }
        current
    }

    fn remove_subtree(&mut self, id: u64) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.remove_subtree(child);
            }
        }
    }

    fn find_image(&self, image_id: u64) -> Option<(u64, usize)> {
        self.nodes.iter().find_map(|(node_id, node)| {
            node.images
                .iter()
                .position(|image| image.id == image_id)
                .map(|index| (*node_id, index))
        })
    }

    fn node_json(&self, id: u64) -> Value {
        let node = &self.nodes[&id];
        let mut uris = json!({
            "ChildNodes": { "Uri": format!("/api/v2/node/n{}!children", id) },
        });
        if node.kind == "Album" {
            uris["Album"] = json!({ "Uri": format!("/api/v2/album/a{}", id) });
        }
        json!({
            "Name": node.name,
            "Type": node.kind,
            "Privacy": node.privacy,
            "NodeID": format!("n{}", id),
            "Uri": format!("/api/v2/node/n{}", id),
            "Uris": uris,
        })
    }

    fn image_json(album: u64, image: &FakeImage) -> Value {
        json!({
            "FileName": image.file_name,
            "ArchivedMD5": image.md5,
            "Format": image.format,
            "Uri": format!("/api/v2/album/a{}/image/i{}", album, image.id),
            "Uris": {
                "Image": { "Uri": format!("/api/v2/image/i{}", image.id) },
                "ImageMetadata": { "Uri": format!("/api/v2/image/i{}!metadata", image.id) },
            },
        })
    }

    fn new_image(&mut self, file_name: &str, data: &[u8]) -> FakeImage {
        let id = self.next_id;
        self.next_id += 1;
        let (_, extension) = split_extension(file_name);
        let modified = extract_last_modified(data)
            .map(|time| time.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|_| DEFAULT_MODIFIED.to_string());
        FakeImage {
            id,
            file_name: file_name.to_string(),
            md5: format!("{:x}", md5::compute(data)),
            format: extension.trim_start_matches('.').to_uppercase(),
            modified,
        }
    }
}

pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_ID,
            FakeNode {
                name: String::new(),
                kind: "Folder".to_string(),
                privacy: "Public".to_string(),
                parent: None,
                children: Vec::new(),
                images: Vec::new(),
            },
        );
        Arc::new(Self {
            state: Mutex::new(FakeState {
                nodes,
                next_id: ROOT_ID + 1,
                calls: Vec::new(),
                fail_patches: false,
            }),
        })
    }

    /// Creates the folder at `path` and any missing parent folder.
    pub fn add_folder(&self, path: &str) -> u64 {
        self.state.lock().ensure(path, "Folder")
    }

    /// Creates the album at `path`, with parent folders as needed.
    pub fn add_album(&self, path: &str) -> u64 {
        self.state.lock().ensure(path, "Album")
    }

    /// Adds a child even when one with the same name exists.
    pub fn add_child(&self, parent_path: &str, name: &str, kind: &str) -> u64 {
        let mut state = self.state.lock();
        let parent = state.find(parent_path).unwrap_or(ROOT_ID);
        state.create(parent, name, kind, "Public")
    }

    /// Stores an image as-is, without the renaming uploads go through.
    pub fn add_image(&self, album_path: &str, file_name: &str, data: &[u8]) -> u64 {
        let mut state = self.state.lock();
        let album = state.ensure(album_path, "Album");
        let image = state.new_image(file_name, data);
        let id = image.id;
        if let Some(node) = state.nodes.get_mut(&album) {
            node.images.push(image);
        }
        id
    }

    pub fn set_image_modified(&self, album_path: &str, file_name: &str, modified: &str) {
        let mut state = self.state.lock();
        let Some(album) = state.find(album_path) else { return };
        if let Some(node) = state.nodes.get_mut(&album) {
            for image in node.images.iter_mut().filter(|i| i.file_name == file_name) {
                image.modified = modified.to_string();
            }
        }
    }

    pub fn fail_patches(&self) {
        self.state.lock().fail_patches = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Recorded calls other than reads.
    pub fn mutations(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| !call.starts_with("GET "))
            .cloned()
            .collect()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().find(path).is_some()
    }

    pub fn kind_of(&self, path: &str) -> Option<String> {
        let state = self.state.lock();
        state.find(path).map(|id| state.nodes[&id].kind.clone())
    }

    pub fn node_privacy(&self, path: &str) -> Option<String> {
        let state = self.state.lock();
        state.find(path).map(|id| state.nodes[&id].privacy.clone())
    }

    pub fn image_names(&self, album_path: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .find(album_path)
            .map(|id| {
                state.nodes[&id]
                    .images
                    .iter()
                    .map(|image| image.file_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn not_found(path: &str) -> SmugError {
    SmugError::ApiError {
        code: 404,
        message: format!("Not Found: {}", path),
    }
}

fn parse_id(value: &str, prefix: char) -> Option<u64> {
    value.strip_prefix(prefix)?.parse().ok()
}

fn object(route: &str, locator: &str, value: Value) -> Value {
    let mut response = Map::new();
    response.insert("Uri".into(), Value::String(route.to_string()));
    response.insert("Locator".into(), Value::String(locator.to_string()));
    response.insert(locator.to_string(), value);
    json!({ "Response": response })
}

fn list(route: &str, locator: &str, items: Vec<Value>, start: usize, count: usize) -> Value {
    let total = items.len();
    let begin = start.saturating_sub(1).min(total);
    let end = (begin + count).min(total);
    let page = items[begin..end].to_vec();

    let mut response = Map::new();
    response.insert(
        "Uri".into(),
        Value::String(format!("{}?start={}&count={}", route, start, count)),
    );
    response.insert("Locator".into(), Value::String(locator.to_string()));
    response.insert(
        "Pages".into(),
        json!({ "Total": total, "Start": start, "Count": page.len(), "RequestedCount": count }),
    );
    response.insert(locator.to_string(), Value::Array(page));
    json!({ "Response": response })
}

fn user_json() -> Value {
    json!({
        "NickName": FAKE_USER,
        "Name": "Fake User",
        "Uri": format!("/api/v2/user/{}", FAKE_USER),
        "Uris": { "Node": { "Uri": format!("/api/v2/node/n{}", ROOT_ID) } },
    })
}

fn ok_response(body: Value) -> ApiResponse {
    ApiResponse {
        status: 200,
        body: body.to_string(),
    }
}

impl Transport for FakeTransport {
    fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value, SmugError> {
        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        let mut args: HashMap<String, String> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        args.extend(params.iter().cloned());
        let start = args.get("start").and_then(|v| v.parse().ok()).unwrap_or(1);
        let count = args.get("count").and_then(|v| v.parse().ok()).unwrap_or(100);

        let mut state = self.state.lock();
        state.calls.push(format!("GET {}", route));

        if route == "/api/v2!authuser" {
            return Ok(object(route, "User", user_json()));
        }
        if let Some(user) = route.strip_prefix("/api/v2/user/") {
            return match user {
                FAKE_USER => Ok(object(route, "User", user_json())),
                _ => Err(not_found(route)),
            };
        }
        if let Some(rest) = route.strip_prefix("/api/v2/node/") {
            if let Some(id) = rest.strip_suffix("!children") {
                let id = parse_id(id, 'n').filter(|id| state.nodes.contains_key(id));
                let id = id.ok_or_else(|| not_found(route))?;
                let items = state.nodes[&id]
                    .children
                    .iter()
                    .map(|child| state.node_json(*child))
                    .collect();
                return Ok(list(route, "Node", items, start, count));
            }
            let id = parse_id(rest, 'n').filter(|id| state.nodes.contains_key(id));
            let id = id.ok_or_else(|| not_found(route))?;
            return Ok(object(route, "Node", state.node_json(id)));
        }
        if let Some(rest) = route.strip_prefix("/api/v2/album/") {
            let images = rest.strip_suffix("!images");
            let id = parse_id(images.unwrap_or(rest), 'a')
                .filter(|id| state.nodes.get(id).map(|n| n.kind == "Album").unwrap_or(false))
                .ok_or_else(|| not_found(route))?;
            if images.is_some() {
                let items = state.nodes[&id]
                    .images
                    .iter()
                    .map(|image| FakeState::image_json(id, image))
                    .collect();
                return Ok(list(route, "AlbumImage", items, start, count));
            }
            let album = json!({
                "Name": state.nodes[&id].name,
                "Uri": route,
                "Uris": { "AlbumImages": { "Uri": format!("{}!images", route) } },
            });
            return Ok(object(route, "Album", album));
        }
        if let Some(rest) = route.strip_prefix("/api/v2/image/") {
            if let Some(id) = rest.strip_suffix("!metadata").and_then(|id| parse_id(id, 'i')) {
                let (album, index) = state.find_image(id).ok_or_else(|| not_found(route))?;
                let modified = state.nodes[&album].images[index].modified.clone();
                return Ok(object(
                    route,
                    "ImageMetadata",
                    json!({ "DateTimeModified": modified }),
                ));
            }
        }
        Err(not_found(route))
    }

    fn post(&self, path: &str, form: &[(String, String)]) -> Result<ApiResponse, SmugError> {
        let mut state = self.state.lock();
        let parent = path
            .strip_prefix("/api/v2/node/")
            .and_then(|rest| rest.strip_suffix("!children"))
            .and_then(|id| parse_id(id, 'n'))
            .filter(|id| state.nodes.get(id).map(|n| n.kind == "Folder").unwrap_or(false))
            .ok_or_else(|| not_found(path))?;

        let field = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        let id = state.create(parent, &field("Name"), &field("Type"), &field("Privacy"));
        let created = state.path_of(id);
        state.calls.push(format!("POST {}", created));

        let mut response = Map::new();
        response.insert("Node".into(), state.node_json(id));
        Ok(ok_response(json!({ "Response": response })))
    }

    fn patch(&self, path: &str, _json: &Value) -> Result<ApiResponse, SmugError> {
        let mut state = self.state.lock();
        let target = path
            .strip_prefix("/api/v2/album/")
            .and_then(|id| parse_id(id, 'a'))
            .map(|id| state.path_of(id))
            .unwrap_or_else(|| path.to_string());
        state.calls.push(format!("PATCH {}", target));
        if state.fail_patches {
            return Err(SmugError::ApiError {
                code: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(ok_response(json!({})))
    }

    fn delete(&self, path: &str) -> Result<ApiResponse, SmugError> {
        let mut state = self.state.lock();
        if let Some(id) = path
            .strip_prefix("/api/v2/node/")
            .and_then(|id| parse_id(id, 'n'))
            .filter(|id| *id != ROOT_ID && state.nodes.contains_key(id))
        {
            let deleted = state.path_of(id);
            if let Some(parent) = state.nodes[&id].parent {
                if let Some(parent) = state.nodes.get_mut(&parent) {
                    parent.children.retain(|child| *child != id);
                }
            }
            state.remove_subtree(id);
            state.calls.push(format!("DELETE {}", deleted));
            return Ok(ok_response(json!({})));
        }

        let image_route = Regex::new(r"^/api/v2/album/a(\d+)/image/i(\d+)$").unwrap();
        if let Some(caps) = image_route.captures(path) {
            let image_id: u64 = caps[2].parse().unwrap();
            let (album, index) = state.find_image(image_id).ok_or_else(|| not_found(path))?;
            let image = state
                .nodes
                .get_mut(&album)
                .map(|node| node.images.remove(index))
                .ok_or_else(|| not_found(path))?;
            let deleted = format!("{}/{}", state.path_of(album), image.file_name);
            state.calls.push(format!("DELETE {}", deleted));
            return Ok(ok_response(json!({})));
        }
        Err(not_found(path))
    }

    fn upload(&self, request: UploadRequest) -> Result<ApiResponse, SmugError> {
        if let Some(mut progress) = request.progress {
            for percent in [50.0, 100.0] {
                if progress(percent) {
                    return Err(SmugError::ConnectionInterrupted);
                }
            }
        }

        let mut state = self.state.lock();
        let album = request
            .album_uri
            .strip_prefix("/api/v2/album/")
            .and_then(|id| parse_id(id, 'a'))
            .filter(|id| state.nodes.get(id).map(|n| n.kind == "Album").unwrap_or(false))
            .ok_or_else(|| not_found(&request.album_uri))?;

        let (stem, extension) = split_extension(&request.file_name);
        let stored_name = if extension.eq_ignore_ascii_case(".heic") {
            format!("{}.JPG", stem)
        } else {
            request.file_name.clone()
        };
        let mut image = state.new_image(&stored_name, &request.data);
        if stored_name != request.file_name {
            image.format = "JPG".to_string();
        }

        let mut label = format!("UPLOAD {}/{}", state.path_of(album), request.file_name);
        let replaced = request
            .replace_image_uri
            .as_deref()
            .and_then(|uri| uri.strip_prefix("/api/v2/image/"))
            .and_then(|id| parse_id(id, 'i'))
            .and_then(|id| state.find_image(id));
        let node = state
            .nodes
            .get_mut(&album)
            .ok_or_else(|| not_found(&request.album_uri))?;
        match replaced {
            Some((owner, index)) if owner == album => {
                image.id = node.images[index].id;
                node.images[index] = image;
                label.push_str(" (in place)");
            }
            _ => node.images.push(image),
        }
        state.calls.push(label);
        Ok(ok_response(json!({ "stat": "ok" })))
    }
}

/// A client wired to a fresh [`FakeTransport`], with captured output.
pub struct TestEnv {
    pub transport: Arc<FakeTransport>,
    pub smugmug: Arc<SmugMug>,
    pub console: Console,
    pub sink: Arc<MemorySink>,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_replies(Vec::new())
    }

    /// `replies` answer the console prompts in order; once exhausted, input
    /// reads as closed.
    pub fn with_replies(replies: Vec<&'static str>) -> Self {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let mut prompter = MockPrompter::new();
        let mut replies = replies.into_iter();
        prompter
            .expect_read_reply()
            .returning(move || match replies.next() {
                Some(reply) => Ok(reply.to_string()),
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no reply")),
            });
        let console = Console::new(sink.clone(), Arc::new(prompter));
        let state = Arc::new(PersistentDict::open(dir.path().join("state.json")).unwrap());
        let transport = FakeTransport::new();
        let smugmug = SmugMug::new(transport.clone(), state, console.clone(), TEST_PAGE_SIZE);
        Self {
            transport,
            smugmug,
            console,
            sink,
            dir,
        }
    }

    pub fn root(&self) -> Arc<RemoteNode> {
        self.smugmug.get_root_node(FAKE_USER).unwrap()
    }

    /// Printed lines with terminal control sequences and the task footer
    /// removed.
    pub fn output(&self) -> Vec<String> {
        let escapes = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap();
        escapes
            .replace_all(&self.sink.contents(), "")
            .replace('\r', "")
            .lines()
            .filter(|line| !line.is_empty())
            .filter(|line| !line.starts_with("* ") && !line.starts_with("+ "))
            .map(str::to_string)
            .collect()
    }
}
