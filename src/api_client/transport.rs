//! HTTP access to the SmugMug v2 API.
//!
//! [`Transport`] is the seam between the node model and the network. The
//! production implementation signs every request with the stored OAuth
//! credentials; tests plug in an in-memory service instead.

use crate::api_client::oauth::{self, Credentials};
use crate::api_client::SmugError;
use crate::configuration::ApiSettings;
use crate::foundation::persistent::PersistentDict;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::{Body, Client, RequestBuilder};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Method, Url};
use serde_json::Value;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const API_KEY_REQUEST_URL: &str = "https://api.smugmug.com/api/developer/apply";

/// Upload bodies are handed to the network in chunks of this size, so the
/// progress callback runs regularly.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Receives the upload percentage; returning `true` aborts the transfer.
pub type ProgressFn = Box<dyn FnMut(f64) -> bool + Send>;

pub struct UploadRequest {
    pub album_uri: String,
    pub file_name: String,
    pub data: Vec<u8>,
    /// Replace this existing image instead of adding a new one.
    pub replace_image_uri: Option<String>,
    pub progress: Option<ProgressFn>,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json(&self) -> Result<Value, SmugError> {
        serde_json::from_str(&self.body).map_err(|_| {
            SmugError::UnexpectedResponse(
                "Expected a JSON response from SmugMug service.".to_string(),
            )
        })
    }
}

pub trait Transport: Send + Sync {
    /// GETs `path`, which may already carry a query string, adding `params`.
    fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value, SmugError>;

    /// POSTs url-encoded `form` fields to `path`.
    fn post(&self, path: &str, form: &[(String, String)]) -> Result<ApiResponse, SmugError>;

    fn patch(&self, path: &str, json: &Value) -> Result<ApiResponse, SmugError>;

    fn delete(&self, path: &str) -> Result<ApiResponse, SmugError>;

    fn upload(&self, request: UploadRequest) -> Result<ApiResponse, SmugError>;
}

pub struct HttpTransport {
    client: Client,
    api_base_url: String,
    upload_url: String,
    state: Arc<PersistentDict>,
}

impl HttpTransport {
    pub fn new(settings: &ApiSettings, state: Arc<PersistentDict>) -> Self {
        Self {
            client: Client::new(),
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            upload_url: settings.upload_url.clone(),
            state,
        }
    }

    fn credentials(&self) -> Result<Credentials, SmugError> {
        let Some((key, secret)) = self.state.get::<(String, String)>("api_key") else {
            return Err(SmugError::NotLoggedIn(format!(
                "No API key provided. Please request an API key at {} and run \"smugsync login\".",
                API_KEY_REQUEST_URL
            )));
        };
        let Some((token, token_secret)) = self.state.get::<(String, String)>("access_token")
        else {
            return Err(SmugError::NotLoggedIn(
                "User not logged in. Please run the \"login\" command.".to_string(),
            ));
        };
        Ok(Credentials::consumer(&key, &secret).with_token(&token, &token_secret))
    }

    fn api_url(&self, path: &str) -> Result<Url, SmugError> {
        let full = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.api_base_url, path)
        };
        Url::parse(&full).map_err(|e| SmugError::InvalidArgument(format!("Invalid path \"{}\": {}", path, e)))
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        form: &[(String, String)],
    ) -> Result<RequestBuilder, SmugError> {
        let header = oauth::authorization_header(
            &self.credentials()?,
            method.as_str(),
            &url,
            form,
            &[],
        )?;
        debug!(%method, %url, "api request");
        Ok(self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, header))
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value, SmugError> {
        let mut url = self.api_url(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        let response = checked(self.request(Method::GET, url, &[])?.send()?)?;
        response.json().map_err(|_| {
            SmugError::UnexpectedResponse(format!(
                "Error parsing response from \"{}\": expected JSON from SmugMug service.",
                path
            ))
        })
    }

    fn post(&self, path: &str, form: &[(String, String)]) -> Result<ApiResponse, SmugError> {
        let url = self.api_url(path)?;
        checked(self.request(Method::POST, url, form)?.form(form).send()?)
    }

    fn patch(&self, path: &str, json: &Value) -> Result<ApiResponse, SmugError> {
        let url = self.api_url(path)?;
        checked(self.request(Method::PATCH, url, &[])?.json(json).send()?)
    }

    fn delete(&self, path: &str) -> Result<ApiResponse, SmugError> {
        let url = self.api_url(path)?;
        checked(self.request(Method::DELETE, url, &[])?.send()?)
    }

    fn upload(&self, request: UploadRequest) -> Result<ApiResponse, SmugError> {
        let url = Url::parse(&self.upload_url)
            .map_err(|e| SmugError::InvalidArgument(format!("Invalid upload URL: {}", e)))?;
        let length = request.data.len();
        let checksum = STANDARD.encode(md5::compute(&request.data).0);
        let interrupted = Arc::new(AtomicBool::new(false));
        let reader = ProgressReader {
            data: Cursor::new(request.data),
            length,
            sent: 0,
            progress: request.progress,
            interrupted: interrupted.clone(),
        };

        let mut builder = self
            .request(Method::POST, url, &[])?
            .header(CONTENT_LENGTH, length.to_string())
            .header("Content-MD5", checksum)
            .header("X-Smug-AlbumUri", &request.album_uri)
            .header("X-Smug-FileName", &request.file_name)
            .header("X-Smug-ResponseType", "JSON")
            .header("X-Smug-Version", "v2");
        if let Some(image_uri) = &request.replace_image_uri {
            builder = builder.header("X-Smug-ImageUri", image_uri);
        }

        let sent = builder.body(Body::sized(reader, length as u64)).send();
        if interrupted.load(Ordering::SeqCst) {
            return Err(SmugError::ConnectionInterrupted);
        }
        let response = checked(sent?)?;
        if let Ok(json) = response.json() {
            if json.get("stat").and_then(Value::as_str) == Some("fail") {
                return Err(SmugError::ApiError {
                    code: json.get("code").and_then(Value::as_u64).unwrap_or(0) as u16,
                    message: json
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Upload failed")
                        .to_string(),
                });
            }
        }
        Ok(response)
    }
}

fn checked(response: reqwest::blocking::Response) -> Result<ApiResponse, SmugError> {
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(SmugError::ApiError {
            code: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        });
    }
    Ok(ApiResponse {
        status: status.as_u16(),
        body,
    })
}

/// Upload body reporting progress after every chunk.
struct ProgressReader {
    data: Cursor<Vec<u8>>,
    length: usize,
    sent: usize,
    progress: Option<ProgressFn>,
    interrupted: Arc<AtomicBool>,
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(UPLOAD_CHUNK_SIZE);
        let read = self.data.read(&mut buf[..limit])?;
        self.sent += read;

        if let Some(progress) = self.progress.as_mut() {
            let percent = if self.length == 0 {
                100.0
            } else {
                100.0 * self.sent as f64 / self.length as f64
            };
            if progress(percent) {
                self.interrupted.store(true, Ordering::SeqCst);
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "File transfer interrupted.",
                ));
            }
        }
        Ok(read)
    }
}
