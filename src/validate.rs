//! Request parameter validation

use crate::orchestrator::{clamp_dimension, DEFAULT_DIMENSION};
use crate::{Error, Result};

const MIN_HASH_LEN: usize = 32;
const MAX_HASH_LEN: usize = 64;

/// Whether `hash` looks like a texture-host skin hash (32 to 64 hex digits).
pub fn is_valid_skin_hash(hash: &str) -> bool {
    (MIN_HASH_LEN..=MAX_HASH_LEN).contains(&hash.len()) && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validate a skin hash, returning it unchanged.
pub fn validate_skin_hash(hash: &str) -> Result<&str> {
    if is_valid_skin_hash(hash) {
        Ok(hash)
    } else {
        Err(Error::InvalidInput(format!("Invalid skin hash: {:?}", hash)))
    }
}

/// Parse an output edge length from a request parameter.
///
/// A missing or blank value means [`DEFAULT_DIMENSION`]. Anything that is not
/// an integer is rejected; integers are clamped into the supported range.
pub fn parse_dimension(raw: Option<&str>) -> Result<u32> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_DIMENSION),
        Some(raw) => raw,
    };
    let value: i64 = raw
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid dimension: {:?}", raw)))?;
    Ok(clamp_dimension(value))
}
