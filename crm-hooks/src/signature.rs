//! HubSpot v1 webhook signatures: the hex SHA-256 digest of the app's client secret followed by
//! the raw request body.
use sha2::{Digest, Sha256};

pub const SIGNATURE_HEADER: &str = "x-hubspot-signature";

pub fn sign(client_secret: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_secret.as_bytes());
    hasher.update(body);

    format!("{:x}", hasher.finalize())
}

/// Hex case is ignored.
pub fn is_valid(client_secret: &str, body: &[u8], signature: &str) -> bool {
    sign(client_secret, body).eq_ignore_ascii_case(signature.trim())
}
