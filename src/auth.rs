//! Request authentication for mutating RPCs.
//!
//! Callers sign an action message with the shared secret; signatures are
//! HMAC-SHA256 over `orbis_auth:{email}:{action}:{timestamp}` and expire
//! after five minutes. The marketplace's auth layer owns real identity;
//! this only keeps unsigned calls out of the ledger.

use crate::error::{AppError, AppResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older (or newer) than this are rejected.
const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// Check if we're in development mode (skip signature verification)
fn is_dev_mode() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|e| e.to_lowercase() == "development")
        .unwrap_or(false)
}

/// Create the message a caller must sign for an action.
pub fn create_auth_message(email: &str, action: &str, timestamp: i64) -> String {
    format!("orbis_auth:{}:{}:{}", email, action, timestamp)
}

/// Compute the expected hex signature for a message.
pub fn sign_message(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature over an action message.
///
/// In development mode any non-empty signature is accepted so local clients
/// don't need the shared secret.
pub fn verify_signature(
    secret: Option<&str>,
    email: &str,
    action: &str,
    timestamp: i64,
    signature: &str,
) -> AppResult<()> {
    if signature.is_empty() {
        return Err(AppError::Unauthorized("Signature required".to_string()));
    }

    if is_dev_mode() {
        return Ok(());
    }

    let secret = secret
        .ok_or_else(|| AppError::Unauthorized("Service has no auth secret configured".to_string()))?;

    let message = create_auth_message(email, action, timestamp);

    // Constant-time comparison via the mac itself
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    let provided = hex::decode(signature)
        .map_err(|_| AppError::Unauthorized("Malformed signature".to_string()))?;
    mac.verify_slice(&provided)
        .map_err(|_| AppError::Unauthorized("Invalid signature".to_string()))?;

    Ok(())
}

/// Verify a signed action message with timestamp freshness.
///
/// Checks that:
/// 1. The timestamp is within the allowed window
/// 2. The signature matches the message
pub fn verify_auth_with_timestamp(
    secret: Option<&str>,
    email: &str,
    action: &str,
    timestamp: i64,
    signature: &str,
) -> AppResult<()> {
    let now = chrono::Utc::now().timestamp();
    let time_diff = (now - timestamp).abs();

    if time_diff > MAX_TIMESTAMP_SKEW_SECS {
        return Err(AppError::Unauthorized(
            "Signature timestamp expired".to_string(),
        ));
    }

    verify_signature(secret, email, action, timestamp, signature)?;

    Ok(())
}
