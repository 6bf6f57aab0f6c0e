//! Reversible mapping from cache keys to backend object names
//!
//! Every byte outside `[A-Za-z0-9-_.~]` is percent-encoded, and a leading
//! `.` becomes `%2E`. Encoded names therefore never contain `/`, never start
//! with `.`, and distinct keys always map to distinct names.

use cachegate_core::{CoreError, CoreResult};

/// Encode a cache key into a backend-safe object name.
pub fn encode(key: &str) -> String {
    let encoded = urlencoding::encode(key);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

/// Recover the cache key from an object name produced by [`encode`].
pub fn decode(name: &str) -> CoreResult<String> {
    urlencoding::decode(name)
        .map(|key| key.into_owned())
        .map_err(|e| CoreError::Serialization(format!("invalid object name `{}`: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_safe_keys_are_unchanged() {
        assert_eq!(encode("user-42_profile.v1~"), "user-42_profile.v1~");
    }

    #[test]
    fn test_path_like_keys_stay_flat() {
        assert_eq!(encode("a/b"), "a%2Fb");
        assert_eq!(encode(".."), "%2E.");
        assert_eq!(encode(".hidden"), "%2Ehidden");
        assert_eq!(encode("../etc/passwd"), "%2E.%2Fetc%2Fpasswd");
    }

    #[test]
    fn test_round_trip() {
        for key in ["a", "a b", "ключ", "100%", ".x", "a/b/../c", "%2E", "emoji🙂", "tab\tkey"] {
            let name = encode(key);
            assert!(!name.starts_with('.'));
            assert!(!name.contains('/'));
            assert_eq!(decode(&name).unwrap(), key);
        }
    }

    #[test]
    fn test_no_collisions_between_lookalikes() {
        // raw substitution schemes collide on pairs like these
        let keys = ["a/b", "a%2Fb", "a_b", ".a", "%2Ea", "A/B", "a b", "a+b"];
        let names: HashSet<String> = keys.iter().map(|k| encode(k)).collect();
        assert_eq!(names.len(), keys.len());
    }
}
