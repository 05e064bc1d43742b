use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// How long before expiry the silent refresh fires
pub const REFRESH_LEAD_SECS: i64 = 60;

/// Minimum delay before a scheduled refresh, so near-expired tokens do not
/// cause refresh thrashing. Applies even when it overshoots the expiry.
pub const MIN_REFRESH_DELAY_SECS: i64 = 30;

/// Read the expiry claim out of a bearer token without verifying it.
///
/// The token is opaque to this client except for its `exp` claim, which is
/// only used to schedule the silent refresh. There is no signing key on the
/// client, so nothing here validates anything; the server remains the
/// authority on whether the token is acceptable.
///
/// Any malformed input (not three segments, bad base64, bad JSON, missing or
/// non-numeric `exp`) yields `None`, which schedulers treat as "unknown
/// expiry, use the minimum delay".
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;

    match Utc.timestamp_opt(exp, 0) {
        chrono::LocalResult::Single(dt) => Some(dt),
        _ => None,
    }
}

/// Compute the delay until the next silent refresh for a token expiring at
/// `expiry`, evaluated at `now`.
///
/// The refresh fires [`REFRESH_LEAD_SECS`] before expiry, clamped to no less
/// than [`MIN_REFRESH_DELAY_SECS`] from now. An unknown expiry also clamps to
/// the minimum, so a token we cannot decode is retried promptly rather than
/// never.
pub fn refresh_delay(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    let secs = match expiry {
        Some(expiry) => {
            let until_refresh = (expiry - now).num_seconds() - REFRESH_LEAD_SECS;
            until_refresh.max(MIN_REFRESH_DELAY_SECS)
        }
        None => {
            debug!("Token expiry unknown, scheduling refresh at minimum delay");
            MIN_REFRESH_DELAY_SECS
        }
    };

    Duration::from_secs(secs as u64)
}
