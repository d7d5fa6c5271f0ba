//! Recipient addressing.

use crate::error::{GatewayError, Result};

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Turn the caller's `to` field into a JID string.
///
/// Addresses already on the user or group server pass through untouched.
/// Anything else is treated as a phone number: every non-digit is dropped
/// (`+55 (11) 99999-0000` → `5511999990000@s.whatsapp.net`).
pub fn normalize_recipient(to: &str) -> Result<String> {
    let to = to.trim();
    if to.is_empty() {
        return Err(GatewayError::MissingField("to"));
    }

    if let Some((user, server)) = to.split_once('@')
        && (server == USER_SERVER || server == GROUP_SERVER)
    {
        if user.is_empty() {
            return Err(GatewayError::InvalidRecipient(to.to_string()));
        }
        return Ok(to.to_string());
    }

    let digits: String = to.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(GatewayError::InvalidRecipient(to.to_string()));
    }
    Ok(format!("{digits}@{USER_SERVER}"))
}
