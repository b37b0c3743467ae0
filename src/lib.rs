#![allow(clippy::result_large_err)]
//! # Opal - Embedded In-Memory Document Database
//!
//! Opal is a lightweight, embedded, in-memory document collection engine
//! written in Rust. It is the storage kernel of a larger embedded document
//! database: a typed container holding a growing set of self-describing
//! records, each assigned a monotonically increasing internal identifier.
//!
//! ## Key Features
//!
//! - **Embedded**: No separate server process required
//! - **Document-based**: Schema-free records built from a small value model
//! - **Indexing**: Sorted binary indices (adaptive or lazy) and unique hash indices
//! - **Transactions**: Snapshot-based single-collection rollback
//! - **Reactive Views**: Saved filters whose result sets update incrementally
//! - **Change Tracking**: Insert/update/remove log with optional minimal deltas
//! - **TTL**: Periodic eviction of stale documents by age
//! - **Events**: Listeners for every mutation channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use opal::collection::{Collection, CollectionOptions};
//! use opal::doc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let users = Collection::with_options(
//!     "users",
//!     CollectionOptions::default().with_unique(&["email"]),
//! )?;
//!
//! let alice = users.insert(doc! {
//!     "name": "Alice",
//!     "email": "alice@example.com",
//!     "age": 30
//! })?;
//!
//! let found = users.by("email", &"alice@example.com".into())?;
//! assert_eq!(found.map(|d| d.id()), Some(alice.id()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Pattern
//!
//! Opal uses the **PIMPL (Pointer To IMPLementation)** design pattern:
//! public handles like [`collection::Collection`] are cheap clones of an
//! `Arc`-wrapped inner implementation, so the public interface stays stable
//! while the internals can evolve freely.
//!
//! ## Module Organization
//!
//! - [`collection`] - Documents, the collection engine, events, and options
//! - [`common`] - The value model, event bus, and shared utilities
//! - [`errors`] - Error types and result definitions
//! - [`filter`] - Minimal query predicates used by views and `*_where` operations
//! - [`index`] - Identifier, binary, and unique indices plus the FTS seam
//! - [`view`] - Dynamic views (incrementally maintained result sets)

use crate::common::Scheduler;
use std::sync::LazyLock;

pub mod collection;
pub mod common;
pub mod errors;
pub mod filter;
pub mod index;
pub mod view;

pub use crate::common::Value;
pub use crate::errors::{ErrorKind, OpalError, OpalResult};

pub(crate) static SCHEDULER: LazyLock<Scheduler> = LazyLock::new(Scheduler::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_initialization() {
        // If we can access it, initialization was successful
        let _scheduler = &*SCHEDULER;
    }
}
