//! Staging: named scratch areas for speculative edits.
//!
//! A stage holds deep copies of documents keyed by their internal id.
//! Committing a stage applies every staged copy through a normal update and
//! records one commit-log entry per document.

use crate::collection::{Collection, DocId, Document};
use crate::common::get_current_time_or_zero;
use crate::errors::{ErrorKind, OpalError, OpalResult};
use std::collections::HashMap;

/// One applied staged document in the commit log.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitEntry {
    pub timestamp: i64,
    pub message: String,
    pub data: Document,
}

impl Collection {
    /// Returns the named scratch area, creating it if needed.
    pub fn get_stage(&self, name: &str) -> HashMap<DocId, Document> {
        self.inner
            .stages
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Deep-copies `document` into the named stage, keyed by its internal
    /// id. Re-staging the same document replaces the previous copy.
    ///
    /// # Errors
    ///
    /// Fails with `IllegalState` when the document was never inserted.
    pub fn stage(&self, name: &str, document: &Document) -> OpalResult<()> {
        let id = document.id().ok_or_else(|| {
            log::error!("Only inserted documents can be staged");
            OpalError::new(
                "Only inserted documents can be staged",
                ErrorKind::IllegalState,
            )
        })?;
        self.inner
            .stages
            .entry(name.to_string())
            .or_default()
            .insert(id, document.clone());
        Ok(())
    }

    /// Applies every staged copy through [Collection::update], appends a
    /// `{timestamp, message, data}` entry per document to the commit log,
    /// and empties the stage. Returns the number of applied documents.
    pub fn commit_stage(&self, name: &str, message: &str) -> OpalResult<usize> {
        let staged: Vec<Document> = self
            .inner
            .stages
            .remove(name)
            .map(|(_, stage)| stage.into_values().collect())
            .unwrap_or_default();

        let timestamp = get_current_time_or_zero();
        let count = staged.len();
        for document in staged {
            self.update(document.clone())?;
            self.inner.commit_log.lock().push(CommitEntry {
                timestamp,
                message: message.to_string(),
                data: document,
            });
        }
        Ok(count)
    }

    /// Snapshot of the commit log.
    pub fn commit_log(&self) -> Vec<CommitEntry> {
        self.inner.commit_log.lock().clone()
    }
}
