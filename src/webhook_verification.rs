//! # Bridge Webhook Verification
//!
//! The protocol bridge pushes network events to
//! `POST /api/bridge/{tenant_id}/events`, signing the raw body with
//! HMAC-SHA256 (`X-Bridge-Signature: sha256=<hex>`). Signatures are compared
//! in constant time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, error, warn};

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Bridge-Signature";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Largest event body accepted; history-sync batches can be large.
const MAX_EVENT_BODY_BYTES: usize = 16 * 1024 * 1024;

// Fixed one-minute window per tenant.
const EVENTS_PER_MINUTE: u32 = 6_000;
static EVENT_RATE: OnceLock<Mutex<HashMap<String, (u64, u32)>>> = OnceLock::new();

fn is_rate_limited(tenant_id: &str) -> bool {
    let map = EVENT_RATE.get_or_init(|| Mutex::new(HashMap::new()));
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let window = now_secs / 60;
    let mut guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = guard.entry(tenant_id.to_string()).or_insert((window, 0));
    if entry.0 != window {
        *entry = (window, 0);
    }
    if entry.1 >= EVENTS_PER_MINUTE {
        true
    } else {
        entry.1 += 1;
        false
    }
}

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {detail}")]
    InvalidSignatureFormat { detail: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Bridge signing secret is not configured")]
    NotConfigured,
}

impl VerificationError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign(body: &[u8], secret: &str) -> VerificationResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a bridge signature header against the raw body.
pub fn verify_bridge_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> VerificationResult<()> {
    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: SIGNATURE_HEADER.to_string(),
        });
    }
    let provided_hex = signature_header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| VerificationError::InvalidSignatureFormat {
            detail: format!("{} must start with '{}'", SIGNATURE_HEADER, SIGNATURE_PREFIX),
        })?;
    let provided =
        hex::decode(provided_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
            detail: format!("{} contains invalid hex", SIGNATURE_HEADER),
        })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let expected: &[u8] = expected.as_ref();
    if subtle::ConstantTimeEq::ct_eq(expected, &provided[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

fn verify_headers(body: &[u8], headers: &HeaderMap, config: &AppConfig) -> VerificationResult<()> {
    let secret = config
        .bridge_signing_secret
        .as_deref()
        .ok_or(VerificationError::NotConfigured)?;
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    verify_bridge_signature(body, header, secret)
}

/// Tenant segment of `/api/bridge/{tenant_id}/events`.
fn bridge_tenant(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/api/bridge/")?;
    let (tenant, tail) = rest.split_once('/')?;
    (tail == "events" && !tenant.is_empty()).then_some(tenant)
}

/// Middleware guarding the bridge event route.
///
/// Without a configured secret, `local` and `test` profiles accept unsigned
/// events; every other profile rejects them.
pub async fn webhook_verification_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();
    let Some(tenant_id) = bridge_tenant(&path) else {
        return Ok(next.run(request).await);
    };

    if config.bridge_signing_secret.is_none() {
        if matches!(config.profile.as_str(), "local" | "test") {
            return Ok(next.run(request).await);
        }
        warn!(tenant_id = %tenant_id, "Bridge signing secret not configured; rejecting event");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if is_rate_limited(tenant_id) {
        warn!(tenant_id = %tenant_id, "Bridge event rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_EVENT_BODY_BYTES)
        .await
        .map_err(|err| {
            error!(error = ?err, "Failed to read bridge event body");
            StatusCode::BAD_REQUEST
        })?;

    match verify_headers(&body_bytes, &parts.headers, &config) {
        Ok(()) => {
            debug!(tenant_id = %tenant_id, body_size = body_bytes.len(), "Bridge signature verified");
            let request = Request::from_parts(parts, axum::body::Body::from(body_bytes));
            Ok(next.run(request).await)
        }
        Err(err) => {
            error!(tenant_id = %tenant_id, error = %err, "Bridge signature verification failed");
            Err(err.status_code())
        }
    }
}
