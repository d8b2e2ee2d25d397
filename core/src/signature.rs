//! HMAC-SHA256 signing for persisted rows and audit records
//!
//! Payloads are canonical `|`-joined field strings; signatures are
//! hex-encoded. The same helpers back the state store row signatures and the
//! audit hash chain.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted key length for `AUDIT_SECRET_KEY` and
/// `DB_ENCRYPTION_KEY`.
pub const MIN_KEY_BYTES: usize = 32;

/// Sign a canonical payload, returning the hex-encoded MAC.
pub fn sign(key: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded signature in constant time.
pub fn verify(key: &[u8], payload: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
