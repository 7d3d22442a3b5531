//! Storage key constants and builders
//!
//! # Key Patterns
//!
//! - `account:{tenant}:{id}` - JSON encoded account
//! - `accounts:{tenant}` - Set of account IDs of a tenant
//!
//! # Example
//!
//! ```
//! use ocs_cache::keys;
//!
//! let key = keys::account_key("cgrates.org", "1001");
//! assert_eq!(key, "account:cgrates.org:1001");
//! ```

/// Prefix for account documents
///
/// Format: `account:{tenant}:{id}`
pub const ACCOUNT_PREFIX: &str = "account";

/// Prefix for the per-tenant account index
///
/// Format: `accounts:{tenant}`
pub const ACCOUNT_INDEX_PREFIX: &str = "accounts";

/// Build the key of an account document
pub fn account_key(tenant: &str, id: &str) -> String {
    format!("{}:{}:{}", ACCOUNT_PREFIX, tenant, id)
}

/// Build the key of a tenant's account index
pub fn account_index_key(tenant: &str) -> String {
    format!("{}:{}", ACCOUNT_INDEX_PREFIX, tenant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_keys() {
        assert_eq!(account_key("cgrates.org", "1001"), "account:cgrates.org:1001");
        assert_eq!(account_index_key("cgrates.org"), "accounts:cgrates.org");
    }
}
