//! Phantom-typed document identifiers.
//!
//! An [`Id<T>`] is an opaque string id bound at the type level to its table,
//! so an agent id cannot be handed to a webhook lookup by accident. Ids are
//! generated with a short table prefix plus a UUID, and serialize as plain
//! strings.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use uuid::Uuid;

use crate::document::Document;

/// Opaque id of a document in table `T`.
pub struct Id<T> {
    value: String,
    _table: PhantomData<fn() -> T>,
}

impl<T: Document> Id<T> {
    /// Generates a fresh id with the table's prefix.
    pub fn generate() -> Self {
        Id {
            value: format!("{}_{}", T::ID_PREFIX, Uuid::new_v4().simple()),
            _table: PhantomData,
        }
    }
}

impl<T> Id<T> {
    /// Wraps an existing id string. No validation; invalid ids simply fail
    /// lookups.
    pub fn from_string(value: impl Into<String>) -> Self {
        Id {
            value: value.into(),
            _table: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Id {
            value: self.value.clone(),
            _table: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.value)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(DeError::custom("document id must not be empty"));
        }
        Ok(Id::from_string(s))
    }
}
