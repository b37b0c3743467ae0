//! Index lifecycle: creation, lazy rebuild, range calculation, and
//! integrity checking.

use crate::collection::opal_collection::{resolve_field, CollectionInner, CollectionState};
use crate::collection::{Collection, CollectionEventInfo, CollectionEvents};
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::index::{BinaryIndex, CheckIndexOptions, RangeOp, UniqueIndex};
use crate::Value;
use std::collections::BTreeMap;

impl Collection {
    /// Creates the binary index on `field` if absent and rebuilds it when
    /// dirty (or unconditionally with `force`).
    pub fn ensure_index(&self, field: &str, force: bool) -> OpalResult<()> {
        let mut state = self.inner.state.write();
        state
            .binary_indices
            .entry(field.to_string())
            .or_insert_with(BinaryIndex::new);
        rebuild_if_needed(&mut state, &self.inner.config.nested, field, force);
        Ok(())
    }

    /// Rebuilds every dirty binary index (every index with `force`).
    pub fn ensure_all_indexes(&self, force: bool) -> OpalResult<()> {
        self.inner.ensure_all_indexes_internal(force)
    }

    /// Creates a unique index on `field`, retro-indexing the current
    /// documents.
    ///
    /// # Errors
    ///
    /// Fails with `UniqueConstraintViolation` when existing documents
    /// collide; the index is not installed in that case.
    pub fn ensure_unique_index(&self, field: &str) -> OpalResult<()> {
        let nested = &self.inner.config.nested;
        let mut state = self.inner.state.write();
        if state.unique_indices.contains_key(field) {
            return Ok(());
        }

        let mut index = UniqueIndex::new(field);
        index.rebuild(&state.data, |d| resolve_field(nested, d, field))?;
        state.unique_indices.insert(field.to_string(), index);
        Ok(())
    }

    /// Computes the data positions whose `field` values satisfy the range
    /// operator, in index (sorted-value) order. A lazy index that is dirty
    /// is rebuilt first.
    ///
    /// # Errors
    ///
    /// * `IndexNotFound` - no binary index exists on `field`
    /// * `InvalidDataType` - `Between` without both endpoints
    pub fn calculate_range(
        &self,
        field: &str,
        op: RangeOp,
        from: &Value,
        to: Option<&Value>,
    ) -> OpalResult<Vec<usize>> {
        let nested = &self.inner.config.nested;
        let mut state = self.inner.state.write();

        if !state.binary_indices.contains_key(field) {
            log::error!("No binary index on field '{}'", field);
            return Err(OpalError::new(
                &format!("No binary index on field '{}'", field),
                ErrorKind::IndexNotFound,
            ));
        }
        rebuild_if_needed(&mut state, nested, field, false);

        let CollectionState {
            data,
            binary_indices,
            ..
        } = &mut *state;
        let index = binary_indices.get(field).ok_or_else(|| {
            OpalError::new("Index vanished during range query", ErrorKind::InternalError)
        })?;

        let window =
            index.calculate_range(data, |d| resolve_field(nested, d, field), op, from, to)?;
        Ok(match window {
            Some((lo, hi)) => index.values[lo..=hi].to_vec(),
            None => Vec::new(),
        })
    }

    /// Verifies the binary index on `field`. Returns the validity found by
    /// the check; with `repair` an invalid index is rebuilt afterwards and a
    /// `warning` event is emitted.
    pub fn check_index(&self, field: &str, options: &CheckIndexOptions) -> OpalResult<bool> {
        let nested = &self.inner.config.nested;
        let mut state = self.inner.state.write();

        let valid = {
            let CollectionState {
                data,
                binary_indices,
                ..
            } = &mut *state;
            let index = binary_indices.get(field).ok_or_else(|| {
                log::error!("No binary index on field '{}'", field);
                OpalError::new(
                    &format!("No binary index on field '{}'", field),
                    ErrorKind::IndexNotFound,
                )
            })?;
            index.check(data, |d| resolve_field(nested, d, field), options)
        };

        if !valid {
            log::warn!("Binary index on field '{}' failed its integrity check", field);
            if options.repair {
                rebuild_index(&mut state, nested, field);
                drop(state);
                self.inner.emit(CollectionEventInfo::with_message(
                    CollectionEvents::Warning,
                    &format!("Rebuilt corrupted binary index on field '{}'", field),
                ))?;
            }
        }
        Ok(valid)
    }

    /// Runs [Collection::check_index] over every binary index. Returns true
    /// only if all of them pass.
    pub fn check_all_indexes(&self, options: &CheckIndexOptions) -> OpalResult<bool> {
        let fields: Vec<String> = {
            let state = self.inner.state.read();
            state.binary_indices.keys().cloned().collect()
        };

        let mut all_valid = true;
        for field in fields {
            all_valid &= self.check_index(&field, options)?;
        }
        Ok(all_valid)
    }
}

impl CollectionInner {
    pub(crate) fn ensure_all_indexes_internal(&self, force: bool) -> OpalResult<()> {
        let nested = &self.config.nested;
        let mut state = self.state.write();
        let fields: Vec<String> = state.binary_indices.keys().cloned().collect();
        for field in fields {
            rebuild_if_needed(&mut state, nested, &field, force);
        }
        Ok(())
    }
}

fn rebuild_if_needed(
    state: &mut CollectionState,
    nested: &BTreeMap<String, Vec<String>>,
    field: &str,
    force: bool,
) {
    let needs_rebuild = state
        .binary_indices
        .get(field)
        .map(|index| force || index.dirty || index.len() != state.data.len())
        .unwrap_or(false);
    if needs_rebuild {
        rebuild_index(state, nested, field);
    }
}

fn rebuild_index(state: &mut CollectionState, nested: &BTreeMap<String, Vec<String>>, field: &str) {
    let CollectionState {
        data,
        binary_indices,
        ..
    } = state;
    if let Some(index) = binary_indices.get_mut(field) {
        log::debug!("Rebuilding binary index on field '{}'", field);
        index.rebuild(data, |d| resolve_field(nested, d, field));
    }
}
