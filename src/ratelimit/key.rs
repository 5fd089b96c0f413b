//! Counter store key generation.

use crate::identity::Identity;

/// The counter store key holding one identity's window entries.
///
/// Keys are partitioned by identity, so callers for different identities
/// never contend on the same sorted set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Namespace prefix shared by all window keys
    pub prefix: String,
    /// The identity this window belongs to
    pub identity: Identity,
}

impl WindowKey {
    /// Create a new window key for an identity.
    pub fn new(prefix: &str, identity: &Identity) -> Self {
        Self {
            prefix: prefix.to_string(),
            identity: identity.clone(),
        }
    }

    /// Convert the window key to the string used in the store.
    pub fn to_string_key(&self) -> String {
        format!("{}{}:requests", self.prefix, self.identity)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_key_to_string() {
        let key = WindowKey::new("user:", &Identity::from(42u64));
        assert_eq!(key.to_string_key(), "user:42:requests");
    }

    #[test]
    fn test_window_key_equality() {
        let key1 = WindowKey::new("user:", &Identity::from("u1"));
        let key2 = WindowKey::new("user:", &Identity::from("u1"));
        let key3 = WindowKey::new("tenant:", &Identity::from("u1"));

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }
}
