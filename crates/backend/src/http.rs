//! REST client for the AsaliTrace backend.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime. Non-2xx statuses are read as data, not as
//! transport errors, so every status maps onto a [`BackendError`] kind.

use std::sync::{Arc, Mutex, PoisonError};

use asali_ledger::ChainBatchRecord;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::backend::TraceBackend;
use crate::error::BackendError;
use crate::model::{
    BatchRecord, CertificateRecord, CreatedBatch, LabTestRecord, NewBatch, NewCertificate,
    NewLabTest, RecordOutcome,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Where the user is sent after the session is dropped.
pub const LOGIN_ROUTE: &str = "/auth";

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Session tokens shared by every client of one user session.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: Mutex<Tokens>,
}

impl TokenStore {
    pub fn new(access: Option<String>, refresh: Option<String>) -> Self {
        TokenStore {
            tokens: Mutex::new(Tokens { access, refresh }),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh.clone()
    }

    pub fn set(&self, access: Option<String>, refresh: Option<String>) {
        *self.lock() = Tokens { access, refresh };
    }

    pub fn clear(&self) {
        *self.lock() = Tokens::default();
    }

    pub fn is_empty(&self) -> bool {
        let tokens = self.lock();
        tokens.access.is_none() && tokens.refresh.is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tokens> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Method {
    Get,
    Post(Value),
}

struct Reply {
    status: u16,
    body: Value,
}

pub struct HttpBackend {
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl HttpBackend {
    pub fn new(base_url: &str, tokens: Arc<TokenStore>) -> Self {
        HttpBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    async fn send(&self, method: Method, path: &str) -> Result<Reply, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let auth = self.tokens.access_token().map(|t| format!("Bearer {}", t));
        tracing::debug!(%url, "backend request");

        tokio::task::spawn_blocking(move || {
            let config = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .build();
            let agent: ureq::Agent = config.into();
            let response = match method {
                Method::Get => {
                    let mut request = agent.get(&url);
                    if let Some(ref auth) = auth {
                        request = request.header("Authorization", auth);
                    }
                    request.call()
                }
                Method::Post(body) => {
                    let mut request = agent.post(&url);
                    if let Some(ref auth) = auth {
                        request = request.header("Authorization", auth);
                    }
                    request.send_json(&body)
                }
            }
            .map_err(|e| BackendError::Transport(format!("{}: {}", url, e)))?;

            let status = response.status().as_u16();
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| BackendError::Transport(format!("{}: {}", url, e)))?;
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => Value::String(text),
                }
            };
            Ok(Reply { status, body })
        })
        .await
        .map_err(|e| BackendError::Transport(format!("task join error: {}", e)))?
    }

    /// Map a reply onto success data or a typed error.
    fn interpret(&self, reply: Reply, resource: &str, id: &str) -> Result<Value, BackendError> {
        match reply.status {
            200..=299 => Ok(reply.body),
            401 => {
                self.tokens.clear();
                tracing::warn!("backend rejected credentials; session cleared");
                Err(BackendError::Unauthorized {
                    login_route: LOGIN_ROUTE.to_string(),
                })
            }
            404 => Err(BackendError::not_found(resource, id)),
            400 => Err(BackendError::Validation(error_message(&reply.body))),
            status => Err(BackendError::Http {
                status,
                message: error_message(&reply.body),
            }),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
        id: &str,
    ) -> Result<T, BackendError> {
        let reply = self.send(Method::Get, path).await?;
        decode(self.interpret(reply, resource, id)?)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        resource: &str,
    ) -> Result<T, BackendError> {
        let reply = self.send(Method::Post(body), path).await?;
        decode(self.interpret(reply, resource, "")?)
    }

    async fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, BackendError> {
        let reply = self.send(Method::Get, &format!("/{}/", collection)).await?;
        let body = self.interpret(reply, collection, "")?;
        // Paginated list responses wrap the items in `results`.
        match body {
            Value::Object(mut obj) if obj.contains_key("results") => {
                decode(obj.remove("results").unwrap_or(Value::Null))
            }
            other => decode(other),
        }
    }

    /// `POST /{collection}/{id}/record-on-chain/`.
    ///
    /// A fresh write answers with the hash and the updated record under
    /// `record_key`; an already-recorded record answers with the hash only,
    /// in which case the record is fetched separately.
    async fn record_on_chain<T: DeserializeOwned>(
        &self,
        collection: &str,
        record_key: &str,
        id: u64,
        body: Value,
    ) -> Result<RecordOutcome<T>, BackendError> {
        let path = format!("/{}/{}/record-on-chain/", collection, id);
        let reply = self.send(Method::Post(body), &path).await?;
        match reply.status {
            503 => return Err(BackendError::ChainUnavailable(error_message(&reply.body))),
            500 => return Err(BackendError::ChainWrite(error_message(&reply.body))),
            _ => {}
        }
        let mut body = self.interpret(reply, collection, &id.to_string())?;
        let tx_hash = body
            .get("blockchain_tx_hash")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Decode("response carries no blockchain_tx_hash".into()))?;

        let (record, already_recorded) = match body.get_mut(record_key).map(Value::take) {
            Some(record) => (decode(record)?, false),
            None => {
                let path = format!("/{}/{}/", collection, id);
                (self.get(&path, collection, &id.to_string()).await?, true)
            }
        };
        if already_recorded {
            tracing::info!(collection, id, %tx_hash, "record was already on chain");
        } else {
            tracing::info!(collection, id, %tx_hash, "record written on chain by backend");
        }
        Ok(RecordOutcome {
            record,
            tx_hash,
            already_recorded,
        })
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}

/// Best human-readable message in an error body.
fn error_message(body: &Value) -> String {
    let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    match (field("error"), field("message").or_else(|| field("detail"))) {
        (Some(error), Some(message)) => format!("{} ({})", error, message),
        (Some(one), None) | (None, Some(one)) => one,
        (None, None) => match body {
            Value::String(s) => s.clone(),
            Value::Null => "empty response".to_string(),
            other => other.to_string(),
        },
    }
}

#[async_trait]
impl TraceBackend for HttpBackend {
    async fn list_batches(&self) -> Result<Vec<BatchRecord>, BackendError> {
        self.list("batches").await
    }

    async fn get_batch(&self, id: u64) -> Result<BatchRecord, BackendError> {
        self.get(&format!("/batches/{}/", id), "batch", &id.to_string())
            .await
    }

    async fn create_batch(&self, batch: NewBatch) -> Result<CreatedBatch, BackendError> {
        let body = serde_json::to_value(&batch).map_err(|e| BackendError::Decode(e.to_string()))?;
        let created: CreatedBatch = self.post("/batches/", body, "batch").await?;
        if let Some(warning) = &created.blockchain_warning {
            tracing::warn!(batch_id = %created.record.batch_id, %warning, "batch stored without ledger record");
        }
        Ok(created)
    }

    async fn record_batch_on_chain(
        &self,
        id: u64,
        description: Option<&str>,
    ) -> Result<RecordOutcome<BatchRecord>, BackendError> {
        let body = match description {
            Some(d) => json!({ "description": d }),
            None => json!({}),
        };
        self.record_on_chain("batches", "batch", id, body).await
    }

    async fn verify_batch_on_chain(
        &self,
        batch_id: &str,
    ) -> Result<Option<ChainBatchRecord>, BackendError> {
        // Batch ids are free text; keep them to a single path segment.
        let path = format!(
            "/batches/verify-batch/{}/",
            urlencoding::encode(batch_id)
        );
        let reply = self.send(Method::Get, &path).await?;
        if reply.status == 500 {
            return Err(BackendError::ChainUnavailable(error_message(&reply.body)));
        }
        match self.interpret(reply, "batch", batch_id) {
            Ok(body) => {
                if body.get("found").and_then(Value::as_bool) == Some(false) {
                    return Ok(None);
                }
                let data = body
                    .get("data")
                    .cloned()
                    .ok_or_else(|| BackendError::Decode("response carries no data".into()))?;
                decode(data).map(Some)
            }
            Err(BackendError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_lab_tests(&self) -> Result<Vec<LabTestRecord>, BackendError> {
        self.list("labtests").await
    }

    async fn create_lab_test(&self, test: NewLabTest) -> Result<LabTestRecord, BackendError> {
        let body = serde_json::to_value(&test).map_err(|e| BackendError::Decode(e.to_string()))?;
        self.post("/labtests/", body, "lab test").await
    }

    async fn record_lab_test_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<LabTestRecord>, BackendError> {
        self.record_on_chain("labtests", "lab_test", id, json!({}))
            .await
    }

    async fn list_certificates(&self) -> Result<Vec<CertificateRecord>, BackendError> {
        self.list("certificates").await
    }

    async fn create_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<CertificateRecord, BackendError> {
        let body =
            serde_json::to_value(&certificate).map_err(|e| BackendError::Decode(e.to_string()))?;
        self.post("/certificates/", body, "certificate").await
    }

    async fn record_certificate_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<CertificateRecord>, BackendError> {
        self.record_on_chain("certificates", "certificate", id, json!({}))
            .await
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
