//! Table metadata: key prefix and primary-key fields.

use std::collections::BTreeSet;

use crate::key::KeyPrefix;

/// A model's storage description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    prefix: String,
    primary_key: Vec<String>,
}

impl Table {
    /// A table keyed by a single `id` field.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            primary_key: vec!["id".to_string()],
        }
    }

    pub fn with_primary_key<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// The physical prefix for this table on a given deployment.
    pub fn key_prefix(&self, cluster: bool) -> KeyPrefix {
        KeyPrefix::new(&self.prefix, cluster)
    }

    /// Whether `columns` is exactly the primary-key field set.
    pub fn is_primary_key<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        let wanted: BTreeSet<&str> = self.primary_key.iter().map(String::as_str).collect();
        let given: BTreeSet<&str> = columns.iter().map(AsRef::as_ref).collect();
        !given.is_empty() && wanted == given
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_primary_key_ignores_order() {
        let t = Table::new("order_item").with_primary_key(["order_id", "item_id"]);
        assert!(t.is_primary_key(&["item_id", "order_id"]));
        assert!(!t.is_primary_key(&["order_id"]));
        assert!(!t.is_primary_key::<&str>(&[]));
        assert!(t.has_composite_key());
    }

    #[test]
    fn test_default_primary_key() {
        let t = Table::new("customer");
        assert_eq!(t.primary_key(), &["id".to_string()]);
        assert!(t.is_primary_key(&["id"]));
        assert_eq!(t.key_prefix(true).as_str(), "{customer}");
    }
}
