//! One typed table: documents plus their index entries.

use std::collections::BTreeMap;

use crate::document::{Document, IndexKey, Order};
use crate::error::StoreError;
use crate::id::Id;

/// A typed table. Documents live in an ordered map by id; every index entry
/// is mirrored into a single ordered set keyed `(index, key, id)` so prefix
/// scans come back already sorted by key.
#[derive(Clone)]
pub struct Table<T: Document> {
    docs: BTreeMap<Id<T>, T>,
    entries: BTreeMap<(&'static str, IndexKey, Id<T>), ()>,
}

impl<T: Document> Default for Table<T> {
    fn default() -> Self {
        Table {
            docs: BTreeMap::new(),
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Document> Table<T> {
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, id: &Id<T>) -> Option<&T> {
        self.docs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id<T>, &T)> {
        self.docs.iter()
    }

    /// Inserts a new document under a freshly generated id.
    pub fn insert(&mut self, doc: T) -> Result<Id<T>, StoreError> {
        let id = Id::generate();
        self.insert_with_id(id.clone(), doc)?;
        Ok(id)
    }

    /// Inserts a new document under a caller-chosen id.
    pub fn insert_with_id(&mut self, id: Id<T>, doc: T) -> Result<(), StoreError> {
        if self.docs.contains_key(&id) {
            return Err(StoreError::Conflict(format!(
                "document {id} already exists in {}",
                T::TABLE
            )));
        }
        self.check_unique(&doc, Some(&id))?;
        self.add_entries(&id, &doc);
        self.docs.insert(id, doc);
        Ok(())
    }

    /// Applies `patch` to the document under `id`, re-indexing it and
    /// re-checking unique constraints afterwards.
    pub fn patch(
        &mut self,
        id: &Id<T>,
        patch: impl FnOnce(&mut T) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut doc = self
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                table: T::TABLE,
                id: id.to_string(),
            })?;
        self.remove_entries(id, &doc);
        let result = patch(&mut doc).and_then(|()| self.check_unique(&doc, Some(id)));
        match result {
            Ok(()) => {
                self.add_entries(id, &doc);
                self.docs.insert(id.clone(), doc);
                Ok(())
            }
            Err(e) => {
                // Restore the entries of the unmodified document.
                let original = self.docs.get(id).cloned().expect("document present");
                self.add_entries(id, &original);
                Err(e)
            }
        }
    }

    pub fn remove(&mut self, id: &Id<T>) -> Result<T, StoreError> {
        let doc = self.docs.remove(id).ok_or_else(|| StoreError::NotFound {
            table: T::TABLE,
            id: id.to_string(),
        })?;
        self.remove_entries(id, &doc);
        Ok(doc)
    }

    /// Starts a prefix query on `index`.
    pub fn by_index(&self, index: &'static str, prefix: IndexKey) -> IndexQuery<'_, T> {
        IndexQuery {
            table: self,
            index,
            prefix,
            order: Order::Asc,
            limit: None,
        }
    }

    /// Looks up the single document whose full key on `index` equals `key`.
    pub fn unique_by_index(&self, index: &'static str, key: &IndexKey) -> Option<(Id<T>, &T)> {
        self.entries
            .keys()
            .find(|(name, entry_key, _)| *name == index && entry_key == key)
            .and_then(|(_, _, id)| self.docs.get(id).map(|doc| (id.clone(), doc)))
    }

    fn check_unique(&self, doc: &T, exclude: Option<&Id<T>>) -> Result<(), StoreError> {
        for entry in doc.index_entries() {
            if !entry.unique {
                continue;
            }
            let taken = self.entries.keys().any(|(name, key, id)| {
                *name == entry.index && *key == entry.key && Some(id) != exclude
            });
            if taken {
                return Err(StoreError::UniqueViolation {
                    table: T::TABLE,
                    index: entry.index,
                });
            }
        }
        Ok(())
    }

    fn add_entries(&mut self, id: &Id<T>, doc: &T) {
        for entry in doc.index_entries() {
            self.entries.insert((entry.index, entry.key, id.clone()), ());
        }
    }

    fn remove_entries(&mut self, id: &Id<T>, doc: &T) {
        for entry in doc.index_entries() {
            self.entries.remove(&(entry.index, entry.key, id.clone()));
        }
    }
}

/// A bounded, ordered prefix query over one index.
pub struct IndexQuery<'a, T: Document> {
    table: &'a Table<T>,
    index: &'static str,
    prefix: IndexKey,
    order: Order,
    limit: Option<usize>,
}

impl<'a, T: Document> IndexQuery<'a, T> {
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Runs the query, returning `(id, document)` pairs sorted by index key.
    pub fn collect(self) -> Vec<(Id<T>, T)> {
        let matching = self
            .table
            .entries
            .keys()
            .filter(|(name, key, _)| *name == self.index && key.starts_with(&self.prefix));
        let ids: Vec<&Id<T>> = match self.order {
            Order::Asc => matching.map(|(_, _, id)| id).collect(),
            Order::Desc => {
                let mut ids: Vec<&Id<T>> = matching.map(|(_, _, id)| id).collect();
                ids.reverse();
                ids
            }
        };
        ids.into_iter()
            .take(self.limit.unwrap_or(usize::MAX))
            .filter_map(|id| self.table.docs.get(id).map(|doc| (id.clone(), doc.clone())))
            .collect()
    }

    pub fn count(self) -> usize {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.table
            .entries
            .keys()
            .filter(|(name, key, _)| *name == self.index && key.starts_with(&self.prefix))
            .take(limit)
            .count()
    }
}
