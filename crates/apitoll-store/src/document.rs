//! The document contract: table name, id prefix and index declarations.

/// Sort direction for index queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A composite index key. Components compare lexicographically in order, so
/// numeric components must be zero-padded ([`IndexKey::part_u64`]) to sort
/// correctly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IndexKey(Vec<String>);

impl IndexKey {
    pub fn new() -> Self {
        IndexKey(Vec::new())
    }

    pub fn part(mut self, component: impl Into<String>) -> Self {
        self.0.push(component.into());
        self
    }

    /// Zero-padded numeric component, 20 digits, so u64 values sort
    /// lexicographically.
    pub fn part_u64(self, value: u64) -> Self {
        self.part(format!("{value:020}"))
    }

    pub fn single(component: impl Into<String>) -> Self {
        IndexKey::new().part(component)
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// True if `self` begins with all components of `prefix`.
    pub fn starts_with(&self, prefix: &IndexKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

/// One index entry computed from a document: the index it belongs to, the
/// key for this document, and whether the key must be unique table-wide.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub index: &'static str,
    pub key: IndexKey,
    pub unique: bool,
}

impl IndexEntry {
    pub fn new(index: &'static str, key: IndexKey) -> Self {
        IndexEntry {
            index,
            key,
            unique: false,
        }
    }

    pub fn unique(index: &'static str, key: IndexKey) -> Self {
        IndexEntry {
            index,
            key,
            unique: true,
        }
    }
}

/// A stored document type.
///
/// `index_entries` returns the entries for one concrete document; a document
/// that opts out of an index (for example, a facilitator payment without an
/// idempotency key) simply omits the entry.
pub trait Document: Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    const ID_PREFIX: &'static str;

    fn index_entries(&self) -> Vec<IndexEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        let key = IndexKey::new().part("agent-1").part_u64(42);
        assert!(key.starts_with(&IndexKey::single("agent-1")));
        assert!(key.starts_with(&key));
        assert!(!key.starts_with(&IndexKey::single("agent-2")));
        assert!(!IndexKey::single("agent-1").starts_with(&key));
    }

    #[test]
    fn numeric_parts_sort_lexicographically() {
        let small = IndexKey::new().part_u64(9);
        let large = IndexKey::new().part_u64(10);
        assert!(small < large);
    }
}
