use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest when building a correlation token.
const TOKEN_LEN: usize = 16;

/// Derives a log-safe correlation token from a patient identifier.
///
/// Protected health information must never appear in log output, but a
/// transmission or dose record still has to be traceable back to a patient
/// across log lines. The token is the truncated hex form of a one-way
/// SHA-256 digest, so the same identifier always yields the same token while
/// the identifier itself cannot be recovered from it.
///
/// # Arguments
/// * `patient_id` - The raw patient identifier (never logged directly).
///
/// # Returns
/// A fixed-length lowercase hex string safe to include in log messages and
/// operator notifications.
pub fn patient_token(patient_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(patient_id.as_bytes());
    let digest = hasher.finalize();
    let mut token = String::with_capacity(TOKEN_LEN);
    for byte in digest.iter() {
        if token.len() >= TOKEN_LEN {
            break;
        }
        token.push_str(&format!("{byte:02x}"));
    }
    token.truncate(TOKEN_LEN);
    token
}
