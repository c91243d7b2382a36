//! Session id and join token generation
//!
//! Session ids are opaque URL-safe keys issued with enough entropy that
//! collisions are negligible. Join tokens are secrets gating admission of
//! the second peer.

/// Minimum accepted session id length
pub const SESSION_ID_MIN_LEN: usize = 8;

/// Maximum accepted session id length
pub const SESSION_ID_MAX_LEN: usize = 64;

/// Random bytes per generated token (16 bytes = 32 hex chars)
const TOKEN_BYTES: usize = 16;

/// Generate a random session id
///
/// # Panics
/// Panics if the system random number generator fails (extremely rare).
/// Use `try_generate_session_id` if you need to handle this case.
pub fn generate_session_id() -> String {
    try_generate_session_id().expect("RNG failed - system entropy source unavailable")
}

/// Try to generate a random session id, returning an error if RNG fails
pub fn try_generate_session_id() -> Result<String, getrandom::Error> {
    random_token()
}

/// Generate a random join token
///
/// # Panics
/// Panics if the system random number generator fails (extremely rare).
pub fn generate_join_token() -> String {
    try_generate_join_token().expect("RNG failed - system entropy source unavailable")
}

/// Try to generate a random join token, returning an error if RNG fails
pub fn try_generate_join_token() -> Result<String, getrandom::Error> {
    random_token()
}

fn random_token() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Validate a session id format
///
/// Accepts 8-64 characters from `[A-Za-z0-9_-]`. Anything else is rejected
/// before it can become a registry key.
pub fn validate_session_id(id: &str) -> bool {
    (SESSION_ID_MIN_LEN..=SESSION_ID_MAX_LEN).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
