//! Shared utility functions.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encode bytes as unpadded base64url, the text form used on every URL in the protocol.
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded base64url. Trailing `=` padding is tolerated.
pub fn b64url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))
}

/// Convert a duration in seconds to a human-readable string.
///
/// >= 86400s -> "Xd", >= 3600s -> "Xh", >= 60s -> "Xm", otherwise -> "Xs".
pub fn human_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Serde adapter storing byte vectors as base64url strings in JSON records.
pub mod serde_b64url {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::b64url_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::b64url_decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_seconds() {
        assert_eq!(human_duration(0), "0s");
        assert_eq!(human_duration(59), "59s");
    }

    #[test]
    fn test_human_duration_minutes() {
        assert_eq!(human_duration(60), "1m");
        assert_eq!(human_duration(3599), "59m");
    }

    #[test]
    fn test_human_duration_hours_and_days() {
        assert_eq!(human_duration(3600), "1h");
        assert_eq!(human_duration(86399), "23h");
        assert_eq!(human_duration(86400 * 3), "3d");
    }

    #[test]
    fn test_b64url_round_trip_without_padding() {
        let encoded = b64url_encode([0xfbu8, 0xff, 0x01]);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        assert_eq!(b64url_decode(&encoded).unwrap(), vec![0xfb, 0xff, 0x01]);
    }

    #[test]
    fn test_b64url_decode_accepts_padding() {
        assert_eq!(b64url_decode("AQ==").unwrap(), vec![1]);
    }
}
