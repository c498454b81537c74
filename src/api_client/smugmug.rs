//! Client for the SmugMug v2 API: users, root nodes and the raw requests the
//! node model is built on.

use crate::api_client::gc::ChildCacheGarbageCollector;
use crate::api_client::node::{NodeList, RemoteNode};
use crate::api_client::oauth;
use crate::api_client::transport::{ApiResponse, Transport, UploadRequest};
use crate::api_client::SmugError;
use crate::foundation::console::Console;
use crate::foundation::persistent::PersistentDict;
use serde_json::Value;
use std::sync::Arc;

/// Children caches kept before any command resizes the budget.
const DEFAULT_CACHED_NODES: usize = 8;

pub struct SmugMug {
    transport: Arc<dyn Transport>,
    garbage_collector: ChildCacheGarbageCollector,
    state: Arc<PersistentDict>,
    console: Console,
    page_size: usize,
}

impl SmugMug {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<PersistentDict>,
        console: Console,
        page_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            garbage_collector: ChildCacheGarbageCollector::new(DEFAULT_CACHED_NODES),
            state,
            console,
            page_size: page_size.max(1),
        })
    }

    pub fn garbage_collector(&self) -> &ChildCacheGarbageCollector {
        &self.garbage_collector
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn state(&self) -> &Arc<PersistentDict> {
        &self.state
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value, SmugError> {
        self.transport.get_json(path, params)
    }

    /// Fetches `path`, which must return a single object.
    pub fn get_node(
        self: &Arc<Self>,
        path: &str,
        parent: Option<&Arc<RemoteNode>>,
    ) -> Result<Arc<RemoteNode>, SmugError> {
        let reply = self.get_json(path, &[])?;
        let response = reply.get("Response").ok_or_else(|| missing_response(path))?;
        if response.get("Pages").is_some() {
            return Err(SmugError::UnexpectedResponse(format!(
                "Expected {} to be a node, not a list.",
                path
            )));
        }
        let endpoint = response
            .get("Locator")
            .and_then(Value::as_str)
            .and_then(|locator| response.get(locator))
            .ok_or_else(|| missing_response(path))?;
        Ok(RemoteNode::from_json(self.clone(), endpoint.clone(), parent))
    }

    /// Fetches the first page of the list at `path`.
    pub fn get_list(
        self: &Arc<Self>,
        path: &str,
        params: &[(String, String)],
        parent: Option<Arc<RemoteNode>>,
    ) -> Result<NodeList, SmugError> {
        let reply = self.get_json(path, params)?;
        NodeList::new(self.clone(), &reply, path, parent)
    }

    pub fn post(&self, path: &str, form: &[(String, String)]) -> Result<ApiResponse, SmugError> {
        self.transport.post(path, form)
    }

    pub fn patch(&self, path: &str, json: &Value) -> Result<ApiResponse, SmugError> {
        self.transport.patch(path, json)
    }

    pub fn delete(&self, path: &str) -> Result<ApiResponse, SmugError> {
        self.transport.delete(path)
    }

    pub fn upload(&self, request: UploadRequest) -> Result<ApiResponse, SmugError> {
        self.transport.upload(request)
    }

    /// Nickname of the logged-in user, remembered after the first lookup.
    pub fn get_auth_user(self: &Arc<Self>) -> Result<String, SmugError> {
        if let Some(user) = self.state.get::<String>("authuser") {
            return Ok(user);
        }
        let node = self.get_node("/api/v2!authuser", None)?;
        let nickname = match node.get("NickName") {
            Some(Value::String(nickname)) => nickname.clone(),
            other => {
                return Err(SmugError::UnexpectedResponse(format!(
                    "Expected auth user nickname to be a string, but got \"{}\".",
                    other.cloned().unwrap_or(Value::Null)
                )))
            }
        };
        self.state.set("authuser", &nickname)?;
        Ok(nickname)
    }

    pub fn get_user_uri(self: &Arc<Self>, user: &str) -> Result<String, SmugError> {
        self.get_node(&format!("/api/v2/user/{}", user), None)?
            .uri("Node")
    }

    pub fn get_auth_user_uri(self: &Arc<Self>) -> Result<String, SmugError> {
        if let Some(uri) = self.state.get::<String>("authuser_uri") {
            return Ok(uri);
        }
        let uri = self.get_user_uri(&self.get_auth_user()?)?;
        self.state.set("authuser_uri", &uri)?;
        Ok(uri)
    }

    /// The root node of `user`'s account.
    pub fn get_root_node(self: &Arc<Self>, user: &str) -> Result<Arc<RemoteNode>, SmugError> {
        let uri = if user == self.get_auth_user()? {
            self.get_auth_user_uri()?
        } else {
            self.get_user_uri(user)?
        };
        self.get_node(&uri, None)
    }

    /// Runs the OAuth authorization and stores the resulting access token.
    pub fn login(&self, key: &str, secret: &str) -> Result<(), SmugError> {
        self.state.set("api_key", (key, secret))?;
        let credentials = oauth::login(&self.console, key, secret)?;
        let token = credentials
            .token
            .zip(credentials.token_secret)
            .ok_or_else(|| SmugError::UnexpectedResponse("No access token received.".into()))?;
        self.state.set("access_token", token)?;
        Ok(())
    }

    /// Forgets the credentials and the cached user.
    pub fn logout(&self) -> Result<(), SmugError> {
        for key in ["api_key", "access_token", "authuser", "authuser_uri"] {
            self.state.remove(key)?;
        }
        Ok(())
    }
}

fn missing_response(path: &str) -> SmugError {
    SmugError::UnexpectedResponse(format!(
        "Unexpected response from \"{}\": no \"Response\" object.",
        path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::fake::{TestEnv, FAKE_USER};

    #[test]
    fn test_auth_user_is_remembered() {
        let env = TestEnv::new();
        assert_eq!(env.smugmug.get_auth_user().unwrap(), FAKE_USER);
        assert_eq!(env.smugmug.get_auth_user().unwrap(), FAKE_USER);
        assert_eq!(env.transport.count_calls("GET /api/v2!authuser"), 1);
        assert_eq!(
            env.smugmug.state().get::<String>("authuser").as_deref(),
            Some(FAKE_USER)
        );
    }

    #[test]
    fn test_root_node_of_auth_user() {
        let env = TestEnv::new();
        let root = env.smugmug.get_root_node(FAKE_USER).unwrap();
        assert_eq!(root.name(), "");
        assert_eq!(root.path(), "");
        assert!(env.smugmug.state().contains("authuser_uri"));
    }

    #[test]
    fn test_unknown_user_is_an_api_error() {
        let env = TestEnv::new();
        assert!(matches!(
            env.smugmug.get_root_node("nobody"),
            Err(SmugError::ApiError { code: 404, .. })
        ));
    }

    #[test]
    fn test_node_endpoint_rejects_lists() {
        let env = TestEnv::new();
        let root = env.root();
        let uri = root.uri("ChildNodes").unwrap();
        let err = env.smugmug.get_node(&uri, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Expected {} to be a node, not a list.", uri)
        );
    }

    #[test]
    fn test_logout_forgets_credentials() {
        let env = TestEnv::new();
        let state = env.smugmug.state();
        state.set("api_key", ("key", "secret")).unwrap();
        state.set("access_token", ("token", "secret")).unwrap();
        env.smugmug.get_auth_user().unwrap();

        env.smugmug.logout().unwrap();
        for key in ["api_key", "access_token", "authuser", "authuser_uri"] {
            assert!(!state.contains(key), "{} still stored", key);
        }
    }
}
