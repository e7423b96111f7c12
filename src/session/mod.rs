//! 重试会话模块：共享连接池的 HTTP 客户端加固定间隔重试。
//!
//! Retrying session: one pooled HTTP client plus a retry policy.
//!
//! # Retrying Session
//!
//! Every call made through a [`RetryingSession`] goes through the same retry
//! loop: attempt, and on any failure wait for the policy's delay and try again,
//! up to `max_attempts` attempts in total. Only the error of the final attempt
//! is surfaced; earlier errors are logged and dropped. Non-2xx responses count
//! as failures.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RetryingSession`] | Cloneable handle shared by every unit of work in a batch |
//! | [`RetryingRequest`] | Verb-shaped request builder whose `send` is retried |
//! | [`RetryPolicy`] / [`Backoff`] | Attempt count and inter-attempt delay |
//! | [`HttpRequest`] / [`HttpResponse`] | Serializable descriptor and fully read response |
//!
//! ```rust,no_run
//! use ratehttp::session::{RetryPolicy, RetryingSession};
//! use std::time::Duration;
//!
//! # async fn run() -> ratehttp::Result<()> {
//! let session = RetryingSession::new(
//!     reqwest::Client::new(),
//!     RetryPolicy::fixed(3, Duration::from_millis(500)),
//! );
//! let resp = session
//!     .get("https://example.com/items")
//!     .query(&[("page", "1")])
//!     .send()
//!     .await?;
//! println!("{}", resp.text());
//! # Ok(())
//! # }
//! ```

mod policy;
mod request;

pub use policy::{Backoff, RetryPolicy};
pub use request::{HttpRequest, HttpResponse};

use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use reqwest::{IntoUrl, Method};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    retries: AtomicU64,
}

/// Attempt counters shared by all clones of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub attempts: u64,
    pub retries: u64,
}

/// HTTP client handle that retries every call it makes.
///
/// Clones share the connection pool and the attempt counters.
#[derive(Debug, Clone)]
pub struct RetryingSession {
    client: reqwest::Client,
    policy: RetryPolicy,
    counters: Arc<Counters>,
}

impl RetryingSession {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn from_transport(transport: &HttpTransport, policy: RetryPolicy) -> Self {
        Self::new(transport.client(), policy)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Run `op` under the session's retry policy.
    ///
    /// Returns the first success, or the error of the last attempt once
    /// `max_attempts` attempts have failed.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let Some(delay) = self.policy.delay_after(attempt) else {
                debug!(attempt, max_attempts, error = %err, "ratehttp retries exhausted");
                return Err(err);
            };

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "ratehttp attempt failed; retrying"
            );
            self.counters.retries.fetch_add(1, Ordering::Relaxed);

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RetryingRequest {
        self.request(Method::GET, url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RetryingRequest {
        self.request(Method::POST, url)
    }

    pub fn put<U: IntoUrl>(&self, url: U) -> RetryingRequest {
        self.request(Method::PUT, url)
    }

    pub fn patch<U: IntoUrl>(&self, url: U) -> RetryingRequest {
        self.request(Method::PATCH, url)
    }

    pub fn delete<U: IntoUrl>(&self, url: U) -> RetryingRequest {
        self.request(Method::DELETE, url)
    }

    /// Start a request with an arbitrary method.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RetryingRequest {
        RetryingRequest {
            session: self.clone(),
            builder: self.client.request(method, url),
        }
    }

    /// Perform the request a descriptor describes.
    pub async fn perform(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = request.method()?;
        let url = reqwest::Url::parse(&request.url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid request url: {}", e),
                ErrorContext::new()
                    .with_field_path("request.url")
                    .with_details(request.url.clone())
                    .with_source("session"),
            )
        })?;
        let builder = request.apply(self.client.request(method, url));
        RetryingRequest {
            session: self.clone(),
            builder,
        }
        .send()
        .await
    }
}

/// A request built against a [`RetryingSession`].
///
/// Options are forwarded to the underlying `reqwest::RequestBuilder`; the
/// request is rebuilt from that template for every attempt.
#[derive(Debug)]
pub struct RetryingRequest {
    session: RetryingSession,
    builder: reqwest::RequestBuilder,
}

impl RetryingRequest {
    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.builder = self.builder.query(query);
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.builder = self.builder.header(key, value);
        self
    }

    pub fn headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.builder = self.builder.headers(headers);
        self
    }

    pub fn bearer_auth<T: Display>(mut self, token: T) -> Self {
        self.builder = self.builder.bearer_auth(token);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        self.builder = self.builder.json(json);
        self
    }

    pub fn body<T: Into<reqwest::Body>>(mut self, body: T) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    /// Send with retries and read the whole response.
    pub async fn send(self) -> Result<HttpResponse> {
        let RetryingRequest { session, builder } = self;
        session
            .retry(|| {
                let attempt = builder.try_clone();
                async move {
                    let attempt = attempt.ok_or_else(|| {
                        Error::runtime_with_context(
                            "request body cannot be replayed",
                            ErrorContext::new().with_source("session"),
                        )
                    })?;
                    let resp = attempt.send().await?;
                    HttpResponse::read(resp).await
                }
            })
            .await
    }
}
