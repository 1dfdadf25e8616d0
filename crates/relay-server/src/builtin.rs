//! Built-in middleware: call logging, per-method timing, token auth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_protocol::{HandlerError, Request, Response, RpcError};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::middleware::Middleware;

fn display_id(request: &Request) -> String {
    match &request.id {
        Some(id) => id.to_string(),
        None => "notification".into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logs every call and its outcome. Never alters anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    async fn before_call(&self, request: Request) -> Result<Request, HandlerError> {
        info!("Calling {} ({})", request.method, display_id(&request));
        Ok(request)
    }

    async fn after_call(&self, request: &Request, response: Response) -> Response {
        info!("Completed {} ({})", request.method, display_id(request));
        response
    }

    async fn on_error(&self, request: &Request, error: &HandlerError) -> Option<Response> {
        warn!("Failed {} ({}): {error}", request.method, display_id(request));
        None
    }

    fn name(&self) -> &str {
        "logging"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata key holding the call's start offset, in nanoseconds.
const TIMING_START_KEY: &str = "timing.start_nanos";

/// Aggregate timings for one method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSummary {
    pub count: usize,
    pub mean: Duration,
    pub max: Duration,
}

/// Records wall-clock duration of every successful call, per method.
///
/// Clones share the same sample store, so keep a clone to read samples after
/// handing the middleware to a dispatcher.
#[derive(Debug, Clone)]
pub struct TimingMiddleware {
    origin: Instant,
    samples: Arc<Mutex<HashMap<String, Vec<Duration>>>>,
}

impl TimingMiddleware {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            samples: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn samples(&self, method: &str) -> Vec<Duration> {
        self.samples.lock().get(method).cloned().unwrap_or_default()
    }

    pub fn summary(&self) -> HashMap<String, TimingSummary> {
        self.samples
            .lock()
            .iter()
            .filter(|(_, durations)| !durations.is_empty())
            .map(|(method, durations)| {
                let total: Duration = durations.iter().sum();
                let count = durations.len();
                let summary = TimingSummary {
                    count,
                    mean: total.div_f64(count as f64),
                    max: durations.iter().max().copied().unwrap_or_default(),
                };
                (method.clone(), summary)
            })
            .collect()
    }

    pub fn reset(&self) {
        self.samples.lock().clear();
    }

    fn offset_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for TimingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for TimingMiddleware {
    async fn before_call(&self, mut request: Request) -> Result<Request, HandlerError> {
        request
            .meta
            .insert(TIMING_START_KEY.into(), Value::from(self.offset_nanos()));
        Ok(request)
    }

    async fn after_call(&self, request: &Request, response: Response) -> Response {
        if let Some(start) = request.meta.get(TIMING_START_KEY).and_then(Value::as_u64) {
            let elapsed = Duration::from_nanos(self.offset_nanos().saturating_sub(start));
            self.samples
                .lock()
                .entry(request.method.clone())
                .or_default()
                .push(elapsed);
        }
        response
    }

    fn name(&self) -> &str {
        "timing"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata key a transport sets to the caller's token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Application error code for a missing or rejected token.
pub const AUTH_REQUIRED_CODE: i64 = -32001;

type TokenValidator = dyn Fn(&str) -> bool + Send + Sync;

/// Rejects calls whose `auth_token` metadata is absent or fails validation.
#[derive(Clone)]
pub struct AuthMiddleware {
    validator: Arc<TokenValidator>,
}

impl AuthMiddleware {
    pub fn new<F>(validator: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            validator: Arc::new(validator),
        }
    }

    fn denied() -> HandlerError {
        RpcError::new(AUTH_REQUIRED_CODE, "Authentication required").into()
    }
}

impl Middleware for AuthMiddleware {
    async fn before_call(&self, request: Request) -> Result<Request, HandlerError> {
        let authorized = request
            .meta
            .get(AUTH_TOKEN_KEY)
            .and_then(Value::as_str)
            .is_some_and(|token| (self.validator)(token));
        if !authorized {
            warn!("Rejected unauthenticated call: {}", request.method);
            return Err(Self::denied());
        }
        Ok(request)
    }

    fn name(&self) -> &str {
        "auth"
    }
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware").finish_non_exhaustive()
    }
}
