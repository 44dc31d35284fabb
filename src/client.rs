use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::config::{Credentials, ResolvedConfig};
use crate::domain::Record;
use crate::error::SheetError;
use crate::schema::required_fields;

/// The portal operations the sheet tools need. Implemented over HTTP by
/// [`PortalHttpClient`] and by mocks in tests.
pub trait PortalClient: Send + Sync {
    fn fetch_schema(&self, item_type: &str) -> Result<Value, SheetError>;
    /// `Ok(None)` when the portal has no object under `identifier`.
    fn get_object(&self, identifier: &str) -> Result<Option<Value>, SheetError>;
    fn post_object(&self, item_type: &str, record: &Record) -> Result<Value, SheetError>;
    fn patch_object(&self, identifier: &str, record: &Record) -> Result<Value, SheetError>;
}

#[derive(Clone)]
pub struct PortalHttpClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl PortalHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, SheetError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("psheets/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SheetError::PortalHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SheetError::PortalHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.server.clone(),
            credentials: config.credentials.clone(),
        })
    }

    pub fn schema_url(&self, item_type: &str) -> String {
        format!("{}/profiles/{}.json", self.base_url, schema_name(item_type))
    }

    pub fn collection_url(&self, item_type: &str) -> String {
        format!("{}/{}", self.base_url, schema_name(item_type))
    }

    pub fn object_url(&self, identifier: &str) -> String {
        format!("{}/{}", self.base_url, identifier.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => request.basic_auth(&credentials.key, Some(&credentials.secret)),
            None => request,
        }
    }

    fn handle_status(response: Response) -> Result<Response, SheetError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "portal request failed".to_string());
        Err(SheetError::PortalStatus { status, message })
    }

    fn read_json(response: Response) -> Result<Value, SheetError> {
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SheetError::PortalHttp(err.to_string()))
    }

    /// Sends a request, retrying transient failures. Only idempotent
    /// methods are retried after the request may have reached the portal;
    /// anything else is resent only when the connection was never made.
    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SheetError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let request = self
                .authorize(make_req())
                .build()
                .map_err(|err| SheetError::PortalHttp(err.to_string()))?;
            let method = request.method().clone();
            match self.client.execute(request) {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(&method, status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, attempt, "retrying portal request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&method, &err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(error = %err, attempt, "retrying portal request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SheetError::PortalHttp(err.to_string()));
                }
            }
        }
    }
}

impl PortalClient for PortalHttpClient {
    fn fetch_schema(&self, item_type: &str) -> Result<Value, SheetError> {
        let url = self.schema_url(item_type);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SheetError::ObjectNotFound(format!("schema {item_type}")));
        }
        Self::read_json(response)
    }

    fn get_object(&self, identifier: &str) -> Result<Option<Value>, SheetError> {
        let url = self.object_url(identifier);
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(&[("frame", "object"), ("datastore", "database")])
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).map(Some)
    }

    fn post_object(&self, item_type: &str, record: &Record) -> Result<Value, SheetError> {
        let url = self.collection_url(item_type);
        let response = self.send_with_retries(|| self.client.post(&url).json(record))?;
        Self::read_json(response)
    }

    fn patch_object(&self, identifier: &str, record: &Record) -> Result<Value, SheetError> {
        let url = self.object_url(identifier);
        let response = self.send_with_retries(|| self.client.patch(&url).json(record))?;
        Self::read_json(response)
    }
}

/// Schemas fetched so far, keyed by schema name. Owned by the caller and
/// handed to whatever needs a schema, so a type is fetched once per run.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: Mutex<HashMap<String, Value>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_fetch(
        &self,
        client: &dyn PortalClient,
        item_type: &str,
    ) -> Result<Value, SheetError> {
        let key = schema_name(item_type);
        if let Some(schema) = self.lock()?.get(&key) {
            return Ok(schema.clone());
        }
        debug!(item_type, "fetching schema");
        let schema = client.fetch_schema(item_type)?;
        self.lock()?.insert(key, schema.clone());
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.schemas.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, SheetError> {
        self.schemas
            .lock()
            .map_err(|_| SheetError::CachePoisoned)
    }
}

/// Required fields of `schema` absent from `record`.
pub fn missing_required(record: &Record, schema: &Value) -> Vec<String> {
    required_fields(schema)
        .into_iter()
        .filter(|name| !record.contains_key(name))
        .collect()
}

/// The identifier an existing object would be found under: uuid, then
/// accession, then the first alias.
pub fn record_identifier(record: &Record) -> Option<String> {
    for key in ["uuid", "accession"] {
        if let Some(value) = record.get(key).and_then(Value::as_str) {
            return Some(value.to_string());
        }
    }
    record
        .get("aliases")
        .and_then(Value::as_array)
        .and_then(|aliases| aliases.first())
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `FileFastq`, `file_fastq` and `file-fastq` all name the `file_fastq` schema.
pub fn schema_name(item_type: &str) -> String {
    let mut name = String::new();
    for (index, ch) in item_type.trim().chars().enumerate() {
        if ch == '-' || ch == ' ' {
            name.push('_');
        } else if ch.is_ascii_uppercase() {
            if index > 0 && !name.ends_with('_') {
                name.push('_');
            }
            name.push(ch.to_ascii_lowercase());
        } else {
            name.push(ch);
        }
    }
    name
}

fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn is_retryable_status(method: &Method, status: u16) -> bool {
    is_idempotent(method) && matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(method: &Method, err: &reqwest::Error) -> bool {
    err.is_connect() || (is_idempotent(method) && (err.is_timeout() || err.is_request()))
}
