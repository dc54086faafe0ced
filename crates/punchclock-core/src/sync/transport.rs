//! Network seam between the sync components and the attendance server.
//!
//! The pull and push components only talk to a [`SyncTransport`]; the real
//! implementation is [`HttpTransport`], tests inject scripted fakes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::wire::{PushRequest, PushResponse};
use crate::config::{SyncConfig, SyncEndpoints};
use crate::models::{FailureClass, ReferenceKind};
use crate::util::{compact_text, join_url, normalize_text_option};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Server base URL is not configured")]
    NotConfigured,
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Authentication rejected by server (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("Server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// No server configured; nothing was sent
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }

    /// The request did not complete: the server may or may not have seen it
    pub const fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled | Self::Network(_))
    }

    /// How queued records caught in this failure are classified
    pub const fn failure_class(&self) -> FailureClass {
        if self.is_unauthorized() {
            FailureClass::AuthRequired
        } else {
            FailureClass::Retriable
        }
    }
}

/// Boxed future returned by [`SyncTransport`] methods
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Request/response operations the sync engine needs from the server.
///
/// Implementations must honour `cancel` and bound every call in time.
pub trait SyncTransport: Send + Sync {
    /// Fetch every reference row of one kind as raw JSON objects.
    fn fetch_reference<'a>(
        &'a self,
        kind: ReferenceKind,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<Value>>;

    /// Submit one batch of queued events.
    fn submit_batch<'a>(
        &'a self,
        request: &'a PushRequest,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, PushResponse>;
}

#[derive(Clone, Default, PartialEq, Eq)]
struct CredentialState {
    base_url: Option<String>,
    token: Option<String>,
}

/// Server address and bearer token, replaceable while the engine runs.
///
/// Clones share the same underlying values.
#[derive(Clone, Default)]
pub struct ApiCredentials {
    inner: Arc<RwLock<CredentialState>>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (base_url, token) = self.snapshot();
        formatter
            .debug_struct("ApiCredentials")
            .field("base_url", &base_url)
            .field("token", &token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ApiCredentials {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CredentialState {
                base_url,
                token: normalize_text_option(token),
            })),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_url.clone(), config.auth_token.clone())
    }

    /// Current `(base_url, token)` pair
    pub fn snapshot(&self) -> (Option<String>, Option<String>) {
        let state = match self.inner.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        (state.base_url, state.token)
    }

    pub fn token(&self) -> Option<String> {
        self.snapshot().1
    }

    /// Replace the bearer token. Blank values clear it.
    pub fn set_token(&self, token: Option<String>) {
        let token = normalize_text_option(token);
        self.write(|state| state.token = token);
    }

    pub fn set_base_url(&self, base_url: Option<String>) {
        self.write(|state| state.base_url = base_url);
    }

    fn write(&self, update: impl FnOnce(&mut CredentialState)) {
        match self.inner.write() {
            Ok(mut state) => update(&mut state),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}

/// `reqwest`-backed transport speaking the attendance server's JSON API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: ApiCredentials,
    endpoints: SyncEndpoints,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig, credentials: ApiCredentials) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| TransportError::Network(error.to_string()))?;
        Ok(Self {
            client,
            credentials,
            endpoints: config.endpoints.clone(),
            timeout: config.request_timeout,
        })
    }

    pub const fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    fn request(
        &self,
        build: impl FnOnce(&reqwest::Client, String) -> RequestBuilder,
        path: &str,
    ) -> TransportResult<RequestBuilder> {
        let (base_url, token) = self.credentials.snapshot();
        let base_url = base_url.ok_or(TransportError::NotConfigured)?;
        let request = build(&self.client, join_url(&base_url, path)).header(ACCEPT, "application/json");
        Ok(match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    /// Send a request and read its body, racing the timeout and cancellation.
    async fn exchange(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> TransportResult<(StatusCode, String)> {
        let call = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Err(_) => Err(TransportError::Timeout(self.timeout)),
                Ok(Err(error)) if error.is_timeout() => Err(TransportError::Timeout(self.timeout)),
                Ok(Err(error)) => Err(TransportError::Network(error.to_string())),
                Ok(Ok(exchange)) => Ok(exchange),
            },
        }
    }

    async fn get_reference(
        &self,
        kind: ReferenceKind,
        cancel: &CancellationToken,
    ) -> TransportResult<Vec<Value>> {
        let request = self.request(
            |client, url| client.get(url),
            self.endpoints.reference_path(kind),
        )?;
        let (status, body) = self.exchange(request, cancel).await?;
        check_auth(status)?;
        if !status.is_success() {
            return Err(http_error(status, &body));
        }
        serde_json::from_str::<Vec<Value>>(&body).map_err(|error| {
            TransportError::InvalidPayload(format!("{kind} response is not a JSON array: {error}"))
        })
    }

    async fn post_batch(
        &self,
        batch: &PushRequest,
        cancel: &CancellationToken,
    ) -> TransportResult<PushResponse> {
        let request = self.request(
            |client, url| client.post(url).json(batch),
            &self.endpoints.pending_submission,
        )?;
        let (status, body) = self.exchange(request, cancel).await?;
        check_auth(status)?;
        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|error| TransportError::InvalidPayload(error.to_string()));
        }

        // Some deployments answer partial rejections with 4xx but still
        // report per-record results.
        PushResponse::parse_strict(&body).ok_or_else(|| http_error(status, &body))
    }
}

impl SyncTransport for HttpTransport {
    fn fetch_reference<'a>(
        &'a self,
        kind: ReferenceKind,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<Value>> {
        Box::pin(self.get_reference(kind, cancel))
    }

    fn submit_batch<'a>(
        &'a self,
        request: &'a PushRequest,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, PushResponse> {
        Box::pin(self.post_batch(request, cancel))
    }
}

fn check_auth(status: StatusCode) -> TransportResult<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(TransportError::Unauthorized {
            status: status.as_u16(),
        })
    } else {
        Ok(())
    }
}

fn http_error(status: StatusCode, body: &str) -> TransportError {
    TransportError::Http {
        status: status.as_u16(),
        body: compact_text(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_token() {
        let credentials = ApiCredentials::new(
            Some("https://attendance.example.com".to_string()),
            Some("secret-token".to_string()),
        );
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn credential_clones_share_updates() {
        let credentials = ApiCredentials::default();
        let shared = credentials.clone();

        shared.set_token(Some("  fresh  ".to_string()));
        assert_eq!(credentials.token().as_deref(), Some("fresh"));

        shared.set_token(Some("   ".to_string()));
        assert_eq!(credentials.token(), None);
    }

    #[test]
    fn auth_statuses_map_to_unauthorized() {
        assert!(check_auth(StatusCode::UNAUTHORIZED)
            .unwrap_err()
            .is_unauthorized());
        assert!(check_auth(StatusCode::FORBIDDEN)
            .unwrap_err()
            .is_unauthorized());
        assert!(check_auth(StatusCode::INTERNAL_SERVER_ERROR).is_ok());
    }

    #[test]
    fn failure_class_follows_error_kind() {
        assert_eq!(
            TransportError::Unauthorized { status: 401 }.failure_class(),
            FailureClass::AuthRequired
        );
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(30)).failure_class(),
            FailureClass::Retriable
        );
        assert!(TransportError::NotConfigured.is_configuration());
        assert!(TransportError::Cancelled.is_transport_failure());
        assert!(!TransportError::InvalidPayload(String::new()).is_transport_failure());
    }

    #[tokio::test]
    async fn unconfigured_transport_fails_without_network() {
        let config = SyncConfig::default();
        let transport =
            HttpTransport::new(&config, ApiCredentials::from_config(&config)).unwrap();
        let cancel = CancellationToken::new();

        let error = transport
            .fetch_reference(ReferenceKind::Employee, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::NotConfigured));

        let error = transport
            .submit_batch(&PushRequest { registros: vec![] }, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::NotConfigured));
    }

    #[tokio::test]
    async fn base_url_can_be_replaced_at_runtime() {
        let config = SyncConfig::new("http://127.0.0.1:9").unwrap();
        let transport =
            HttpTransport::new(&config, ApiCredentials::from_config(&config)).unwrap();
        let cancel = CancellationToken::new();

        transport.credentials().set_base_url(None);
        let error = transport
            .fetch_reference(ReferenceKind::Schedule, &cancel)
            .await
            .unwrap_err();
        assert_eq!(error, TransportError::NotConfigured);

        transport
            .credentials()
            .set_base_url(Some("http://127.0.0.1:9".to_string()));
        cancel.cancel();
        let error = transport
            .fetch_reference(ReferenceKind::Schedule, &cancel)
            .await
            .unwrap_err();
        assert_eq!(error, TransportError::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_request() {
        // Port 9 (discard) on loopback; cancellation must win regardless.
        let config = SyncConfig::new("http://127.0.0.1:9").unwrap();
        let transport =
            HttpTransport::new(&config, ApiCredentials::from_config(&config)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = transport
            .fetch_reference(ReferenceKind::Department, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::Cancelled));
    }
}
