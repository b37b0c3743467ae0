//! Full-text search seam.
//!
//! The engine does not implement full-text search itself; it drives a
//! pluggable observer through this trait on every mutation. The
//! implementation is handed to the collection at construction time via
//! `CollectionOptions::with_full_text_search` - there is no process-wide
//! plugin registry.

use crate::collection::Document;
use crate::errors::OpalResult;
use crate::Value;

/// Observer capability of a full-text index.
///
/// `position` is the data-array position at the moment of the call; the
/// implementation is expected to track position shifts the same way the
/// binary indices do, or to key internally by document id.
pub trait FullTextSearch: Send + Sync {
    fn add_document(&self, doc: &Document, position: usize) -> OpalResult<()>;

    fn update_document(&self, doc: &Document, position: usize) -> OpalResult<()>;

    fn remove_document(&self, doc: &Document, position: usize) -> OpalResult<()>;

    fn clear(&self) -> OpalResult<()>;

    /// Serializable snapshot of the index, if the implementation supports
    /// persistence. Included in the collection's serialized form when
    /// present.
    fn to_json(&self) -> Option<Value> {
        None
    }
}
