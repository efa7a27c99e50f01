//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod supplier {
    use super::*;

    pub const NAMESPACE: &str = "supplier";

    /// Bearer token for one supplier client id
    #[derive(Debug, Clone)]
    pub struct TokenKey {
        pub client_id: String,
    }

    impl TokenKey {
        pub fn new(client_id: impl Into<String>) -> Self {
            Self {
                client_id: client_id.into(),
            }
        }
    }

    impl fmt::Display for TokenKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:token:{}", VERSION, NAMESPACE, self.client_id)
        }
    }
}

pub mod fx {
    use super::*;

    pub const NAMESPACE: &str = "fx";

    /// Full rate table against one base currency
    #[derive(Debug, Clone)]
    pub struct RateSnapshotKey {
        pub base_currency: String,
    }

    impl RateSnapshotKey {
        pub fn new(base_currency: impl Into<String>) -> Self {
            Self {
                base_currency: base_currency.into(),
            }
        }

        pub fn usd() -> Self {
            Self::new("USD")
        }
    }

    impl fmt::Display for RateSnapshotKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:rates:{}", VERSION, NAMESPACE, self.base_currency)
        }
    }

    /// SmartSave result for one normalized input set
    #[derive(Debug, Clone)]
    pub struct SmartSaveResultKey {
        pub digest: String,
    }

    impl SmartSaveResultKey {
        pub fn new(digest: impl Into<String>) -> Self {
            Self {
                digest: digest.into(),
            }
        }
    }

    impl fmt::Display for SmartSaveResultKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:smart_save:{}", VERSION, NAMESPACE, self.digest)
        }
    }
}

pub mod rate_limit {
    use super::*;

    pub const NAMESPACE: &str = "rate_limit";

    /// Counter for one client, one action, one fixed window
    #[derive(Debug, Clone)]
    pub struct WindowKey {
        pub action: String,
        pub identifier: String,
        pub window: u64,
    }

    impl WindowKey {
        pub fn new(action: impl Into<String>, identifier: impl Into<String>, window: u64) -> Self {
            Self {
                action: action.into(),
                identifier: identifier.into(),
                window,
            }
        }
    }

    impl fmt::Display for WindowKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}:{}",
                VERSION, NAMESPACE, self.action, self.identifier, self.window
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_key() {
        let key = supplier::TokenKey::new("client-abc");
        assert_eq!(key.to_string(), "v1:supplier:token:client-abc");
    }

    #[test]
    fn test_rate_snapshot_key() {
        assert_eq!(fx::RateSnapshotKey::usd().to_string(), "v1:fx:rates:USD");
    }

    #[test]
    fn test_smart_save_key() {
        let key = fx::SmartSaveResultKey::new("ab12");
        assert_eq!(key.to_string(), "v1:fx:smart_save:ab12");
    }

    #[test]
    fn test_rate_limit_key() {
        let key = rate_limit::WindowKey::new("smart_save", "10.0.0.1", 28_000_000);
        assert_eq!(key.to_string(), "v1:rate_limit:smart_save:10.0.0.1:28000000");
    }
}
