//! Utility modules for common functionality

pub mod retry;

pub use retry::{retry, RetryConfig};

/// Truncate a string to at most `max_bytes` bytes, ensuring the cut lands on a
/// valid UTF-8 char boundary. Returns the longest prefix that fits.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_input_untouched() {
        assert_eq!(truncate_str("ping", 50), "ping");
        assert_eq!(truncate_str("", 3), "");
    }

    #[test]
    fn test_truncate_backs_off_multibyte() {
        // ✅ is 3 bytes
        let s = "pong ✅";
        assert_eq!(truncate_str(s, 5), "pong ");
        assert_eq!(truncate_str(s, 6), "pong ");
        assert_eq!(truncate_str(s, 8), "pong ✅");
    }
}
