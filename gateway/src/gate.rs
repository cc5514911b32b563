//! Write gate: shutdown window, shared-key authorization and the activation flag,
//! evaluated in that order against the singleton configuration record.

use crate::errors::{Error, Result};
use crate::model::AppInterface;
use chrono::{DateTime, Utc};
use clap::ValueEnum;

const BEARER_PREFIX: &[u8] = b"Bearer ";

/// How strictly incoming payloads are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ValidationMode {
    /// `temperature` and `humidity` must be present and truthy.
    #[default]
    Strict,
    /// Any JSON object is stored verbatim.
    Permissive,
}

/// Status returned when the API has been switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InactiveStatus {
    #[default]
    #[value(name = "403")]
    Forbidden,
    #[value(name = "400")]
    BadRequest,
}

/// Deployment policy applied on top of the stored configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatePolicy {
    pub validation: ValidationMode,
    pub inactive_status: InactiveStatus,
    /// Reject every write while no key is configured instead of running open.
    pub require_key: bool,
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
/// Works on raw header bytes, which need not be ASCII.
pub fn bearer_token(header: Option<&[u8]>) -> Option<&[u8]> {
    header.and_then(|value| value.strip_prefix(BEARER_PREFIX))
}

/// Runs the gate checks; the first failing check decides the rejection.
pub fn check(
    iface: &AppInterface,
    auth_header: Option<&[u8]>,
    now: DateTime<Utc>,
    policy: &GatePolicy,
) -> Result<()> {
    if iface.is_shut_down(now) {
        return Err(Error::ShutdownWindow(iface.api_shutdown_at.unwrap_or(now)));
    }

    match iface.key.as_deref() {
        Some(key) => {
            let presented = bearer_token(auth_header)
                .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;
            if presented != key.as_bytes() {
                return Err(Error::Unauthorized("invalid API key".to_string()));
            }
        }
        None if policy.require_key => {
            return Err(Error::Unauthorized("no API key configured".to_string()));
        }
        None => {}
    }

    if !iface.api_is_active {
        return Err(Error::ApiInactive);
    }

    Ok(())
}
