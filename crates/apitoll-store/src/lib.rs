//! Typed in-memory document store for the APIToll platform.
//!
//! The store is the single source of truth for payments, transactions,
//! revenue splits and tenant state.
//!
//! - Every table is typed; there are no untyped documents.
//! - Secondary indexes are declared per document and kept in ordered maps;
//!   prefix queries support ascending/descending order and bounded takes.
//! - Unique indexes (`apiKey`, `slug`, `paymentId`, `idempotencyKey`) are
//!   enforced on insert and patch.
//! - A mutation runs as one closure over a draft of the committed state and
//!   commits all of its writes or none ([`Store::mutate`]). There are no
//!   multi-mutation transactions; callers that need several writes to appear
//!   atomic co-locate them in one mutation.
//!
//! Concurrency: the store itself is the concurrency boundary. Reads see a
//! consistent snapshot, mutations serialize on a single writer lock, and
//! nothing outside the store needs locks.

pub mod document;
pub mod error;
pub mod id;
pub mod store;
pub mod table;
pub mod tables;

pub use document::{Document, IndexEntry, IndexKey, Order};
pub use error::StoreError;
pub use id::Id;
pub use store::{Store, StoreInner};
pub use table::Table;
