//! OAuth 1.0a request signing (HMAC-SHA1) and the out-of-band login flow.

use crate::api_client::SmugError;
use crate::foundation::console::Console;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;
use sha1::Sha1;

const OAUTH_ORIGIN: &str = "https://secure.smugmug.com";
const REQUEST_TOKEN_PATH: &str = "/services/oauth/1.0a/getRequestToken";
const ACCESS_TOKEN_PATH: &str = "/services/oauth/1.0a/getAccessToken";
const AUTHORIZE_PATH: &str = "/services/oauth/1.0a/authorize";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: Option<String>,
    pub token_secret: Option<String>,
}

impl Credentials {
    pub fn consumer(key: &str, secret: &str) -> Self {
        Self {
            consumer_key: key.to_string(),
            consumer_secret: secret.to_string(),
            token: None,
            token_secret: None,
        }
    }

    pub fn with_token(mut self, token: &str, secret: &str) -> Self {
        self.token = Some(token.to_string());
        self.token_secret = Some(secret.to_string());
        self
    }
}

/// Builds the `Authorization` header for a request.
///
/// `url` carries the query parameters; `form` holds url-encoded body
/// parameters, which are signed too. `extra` adds protocol parameters such
/// as `oauth_callback` or `oauth_verifier`.
pub fn authorization_header(
    credentials: &Credentials,
    method: &str,
    url: &Url,
    form: &[(String, String)],
    extra: &[(&str, &str)],
) -> Result<String, SmugError> {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    authorization_header_at(credentials, method, url, form, extra, &nonce, &timestamp)
}

fn authorization_header_at(
    credentials: &Credentials,
    method: &str,
    url: &Url,
    form: &[(String, String)],
    extra: &[(&str, &str)],
    nonce: &str,
    timestamp: &str,
) -> Result<String, SmugError> {
    let mut oauth_params: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), credentials.consumer_key.clone()),
        ("oauth_nonce".into(), nonce.to_string()),
        ("oauth_signature_method".into(), "HMAC-SHA1".into()),
        ("oauth_timestamp".into(), timestamp.to_string()),
        ("oauth_version".into(), "1.0".into()),
    ];
    if let Some(token) = &credentials.token {
        oauth_params.push(("oauth_token".into(), token.clone()));
    }
    for (key, value) in extra {
        oauth_params.push((key.to_string(), value.to_string()));
    }

    let mut all_params = oauth_params.clone();
    all_params.extend(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
    all_params.extend(form.iter().cloned());

    let base = signature_base_string(method, url, &all_params);
    let signature = sign(
        &base,
        &credentials.consumer_secret,
        credentials.token_secret.as_deref().unwrap_or(""),
    )?;
    oauth_params.push(("oauth_signature".into(), signature));

    let fields: Vec<String> = oauth_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect();
    Ok(format!("OAuth {}", fields.join(", ")))
}

/// RFC 5849 section 3.4.1 signature base string.
pub fn signature_base_string(method: &str, url: &Url, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(&base_url(url)),
        encode(&normalized)
    )
}

fn base_url(url: &Url) -> String {
    let mut base = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        base.push_str(&format!(":{}", port));
    }
    base.push_str(url.path());
    base
}

fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> Result<String, SmugError> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| SmugError::Other(format!("Cannot sign request: {}", e)))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Percent-encodes everything but the RFC 3986 unreserved characters.
pub fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Runs the out-of-band authorization and returns credentials holding the
/// access token.
pub fn login(console: &Console, key: &str, secret: &str) -> Result<Credentials, SmugError> {
    let client = reqwest::blocking::Client::new();
    let consumer = Credentials::consumer(key, secret);

    let request_url = parse_url(&format!("{}{}", OAUTH_ORIGIN, REQUEST_TOKEN_PATH))?;
    let header = authorization_header(
        &consumer,
        "POST",
        &request_url,
        &[],
        &[("oauth_callback", "oob")],
    )?;
    let body = client
        .post(request_url)
        .header(reqwest::header::AUTHORIZATION, header)
        .send()?
        .error_for_status()?
        .text()?;
    let (request_token, request_secret) = parse_token_response(&body)?;

    let mut authorize_url = parse_url(&format!("{}{}", OAUTH_ORIGIN, AUTHORIZE_PATH))?;
    authorize_url
        .query_pairs_mut()
        .append_pair("oauth_token", &request_token)
        .append_pair("Access", "Full")
        .append_pair("Permissions", "Modify");
    console.println("Visit the following page to grant access to your SmugMug account:");
    console.println(format!("  {}", authorize_url));
    let verifier = console.prompt("Enter the 6-digit verification code: ")?;

    let request_credentials = consumer.clone().with_token(&request_token, &request_secret);
    let access_url = parse_url(&format!("{}{}", OAUTH_ORIGIN, ACCESS_TOKEN_PATH))?;
    let header = authorization_header(
        &request_credentials,
        "POST",
        &access_url,
        &[],
        &[("oauth_verifier", verifier.trim())],
    )?;
    let body = client
        .post(access_url)
        .header(reqwest::header::AUTHORIZATION, header)
        .send()?
        .error_for_status()?
        .text()?;
    let (token, token_secret) = parse_token_response(&body)?;

    Ok(consumer.with_token(&token, &token_secret))
}

fn parse_url(url: &str) -> Result<Url, SmugError> {
    Url::parse(url).map_err(|e| SmugError::Other(format!("Invalid URL \"{}\": {}", url, e)))
}

fn parse_token_response(body: &str) -> Result<(String, String), SmugError> {
    let mut token = None;
    let mut secret = None;
    for pair in body.trim().split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "oauth_token" => token = Some(value),
            "oauth_token_secret" => secret = Some(value),
            _ => {}
        }
    }
    match (token, secret) {
        (Some(token), Some(secret)) => Ok((token, secret)),
        _ => Err(SmugError::UnexpectedResponse(format!(
            "Unexpected token response: \"{}\".",
            body
        ))),
    }
}
