/// Input validation for route parameters
///
/// Usernames are checked here before they can reach the coalescer; UUIDs
/// are parsed by `identity::require_canonical_id`.
use crate::error::{ProxyError, ProxyResult};

/// Longest username Mojang allows
pub const MAX_USERNAME_LENGTH: usize = 16;

/// Whether `name` could be a Minecraft username
///
/// Legacy accounts may be shorter than 3 characters or contain `-`, so
/// only the upper length bound and the character set are enforced.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a username, failing with `InvalidName`
pub fn validate_username(name: &str) -> ProxyResult<()> {
    if is_valid_username(name) {
        Ok(())
    } else {
        Err(ProxyError::InvalidName(name.to_string()))
    }
}
