//! Sorted binary indices.
//!
//! A binary index is a permutation of the current data positions, sorted by
//! the indexed field under the engine's total order. Two maintenance modes
//! exist per collection: **adaptive** (the permutation is updated inside
//! every mutation) and **lazy** (mutations only set the dirty flag and the
//! permutation is rebuilt on the next range query or `ensure_index`).

use crate::collection::Document;
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::Value;
use rand::Rng;
use std::cmp::Ordering;

/// Range operators understood by [BinaryIndex::calculate_range].
///
/// `Aeq` (loose equality) and `DtEq` (date equality) share the `Eq` window
/// because the engine's comparator already cross-compares the numeric group
/// (ints, floats, dates, booleans).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeOp {
    Eq,
    Aeq,
    DtEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
}

/// Options for [BinaryIndex::check] integrity verification.
#[derive(Clone, Debug)]
pub struct CheckIndexOptions {
    /// Check a random sample of adjacent pairs instead of all of them.
    pub random_sampling: bool,
    /// Fraction of adjacent pairs to sample; only used with `random_sampling`.
    pub random_sampling_factor: f64,
    /// Rebuild the index from scratch when the check fails.
    pub repair: bool,
}

impl Default for CheckIndexOptions {
    fn default() -> Self {
        CheckIndexOptions {
            random_sampling: false,
            random_sampling_factor: 0.1,
            repair: false,
        }
    }
}

/// A sorted permutation of data positions keyed by one document field.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct BinaryIndex {
    /// True when the permutation diverges from the sorted invariant.
    pub dirty: bool,
    /// Data positions ordered by the indexed field value.
    pub values: Vec<usize>,
}

impl BinaryIndex {
    pub fn new() -> Self {
        BinaryIndex {
            dirty: false,
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rebuilds the permutation from scratch and clears the dirty flag.
    pub fn rebuild<F>(&mut self, data: &[Document], extract: F)
    where
        F: Fn(&Document) -> Value,
    {
        self.values = (0..data.len()).collect();
        // stable sort keeps insertion order among equal keys
        self.values
            .sort_by(|&a, &b| extract(&data[a]).total_cmp(&extract(&data[b])));
        self.dirty = false;
    }

    /// First slot whose value is not less than `target`.
    fn lower_bound<F>(&self, data: &[Document], extract: &F, target: &Value) -> usize
    where
        F: Fn(&Document) -> Value,
    {
        self.values
            .partition_point(|&pos| extract(&data[pos]).total_cmp(target) == Ordering::Less)
    }

    /// First slot whose value is greater than `target`.
    fn upper_bound<F>(&self, data: &[Document], extract: &F, target: &Value) -> usize
    where
        F: Fn(&Document) -> Value,
    {
        self.values
            .partition_point(|&pos| extract(&data[pos]).total_cmp(target) != Ordering::Greater)
    }

    /// Adaptive insert: splices the new position into its sorted slot.
    /// Inserts always carry the highest position, so ties keep append order.
    pub fn insert_adaptive<F>(&mut self, data: &[Document], extract: F, pos: usize)
    where
        F: Fn(&Document) -> Value,
    {
        let target = extract(&data[pos]);
        let slot = self.upper_bound(data, &extract, &target);
        self.values.insert(slot, pos);
    }

    /// Adaptive update: locates the stale slot with a linear scan (no
    /// position-to-slot map exists), splices it out, and re-inserts at the
    /// new sorted location.
    pub fn update_adaptive<F>(&mut self, data: &[Document], extract: F, pos: usize)
    where
        F: Fn(&Document) -> Value,
    {
        if let Some(slot) = self.values.iter().position(|&p| p == pos) {
            self.values.remove(slot);
        } else {
            log::warn!(
                "Binary index is missing an entry for position {}; marking dirty",
                pos
            );
            self.dirty = true;
            return;
        }
        self.insert_adaptive(data, extract, pos);
    }

    /// Adaptive remove: locates the slot through the equality window of the
    /// removed value (values may tie, so the window is narrowed by a linear
    /// scan), splices it out, then decrements every stored position greater
    /// than the removed one. Call this before the data array itself is
    /// spliced.
    pub fn remove_adaptive<F>(&mut self, data: &[Document], extract: F, pos: usize)
    where
        F: Fn(&Document) -> Value,
    {
        let target = extract(&data[pos]);
        let slot = match self.equal_window(data, &extract, &target) {
            Some((lo, hi)) => (lo..=hi).find(|&slot| self.values[slot] == pos),
            None => None,
        };
        let slot = slot.or_else(|| {
            log::warn!(
                "Binary index lookup missed position {}; falling back to a full scan",
                pos
            );
            self.values.iter().position(|&p| p == pos)
        });

        if let Some(slot) = slot {
            self.values.remove(slot);
        }

        for value in self.values.iter_mut() {
            if *value > pos {
                *value -= 1;
            }
        }
    }

    fn equal_window<F>(
        &self,
        data: &[Document],
        extract: &F,
        target: &Value,
    ) -> Option<(usize, usize)>
    where
        F: Fn(&Document) -> Value,
    {
        let lo = self.lower_bound(data, extract, target);
        let hi = self.upper_bound(data, extract, target);
        if lo >= hi {
            None
        } else {
            Some((lo, hi - 1))
        }
    }

    /// Computes the inclusive `[lo, hi]` window of index slots whose data
    /// values satisfy `op` against `from` (and `to` for `Between`). Returns
    /// `None` when no value matches.
    ///
    /// The index must not be dirty; the collection rebuilds lazy indices
    /// before delegating here.
    pub fn calculate_range<F>(
        &self,
        data: &[Document],
        extract: F,
        op: RangeOp,
        from: &Value,
        to: Option<&Value>,
    ) -> OpalResult<Option<(usize, usize)>>
    where
        F: Fn(&Document) -> Value,
    {
        let n = self.values.len();
        if n == 0 {
            return Ok(None);
        }

        let min = extract(&data[self.values[0]]);
        let max = extract(&data[self.values[n - 1]]);

        let result = match op {
            RangeOp::Eq | RangeOp::Aeq | RangeOp::DtEq => {
                // quick reject against the index extremes
                if from.total_cmp(&min) == Ordering::Less
                    || from.total_cmp(&max) == Ordering::Greater
                {
                    None
                } else {
                    self.equal_window(data, &extract, from)
                }
            }
            RangeOp::Between => {
                let to = to.ok_or_else(|| {
                    log::error!("$between requires both endpoints");
                    OpalError::new(
                        "$between requires both endpoints",
                        ErrorKind::InvalidDataType,
                    )
                })?;
                if to.total_cmp(&min) == Ordering::Less || from.total_cmp(&max) == Ordering::Greater
                {
                    None
                } else {
                    let lo = self.lower_bound(data, &extract, from);
                    let hi = self.upper_bound(data, &extract, to);
                    if lo >= hi {
                        None
                    } else {
                        Some((lo, hi - 1))
                    }
                }
            }
            RangeOp::Gt => {
                if from.total_cmp(&max) != Ordering::Less {
                    None
                } else {
                    let lo = self.upper_bound(data, &extract, from);
                    if lo >= n {
                        None
                    } else {
                        Some((lo, n - 1))
                    }
                }
            }
            RangeOp::Gte => {
                if from.total_cmp(&max) == Ordering::Greater {
                    None
                } else {
                    let lo = self.lower_bound(data, &extract, from);
                    if lo >= n {
                        None
                    } else {
                        Some((lo, n - 1))
                    }
                }
            }
            RangeOp::Lt => {
                if from.total_cmp(&min) != Ordering::Greater {
                    None
                } else {
                    let hi = self.lower_bound(data, &extract, from);
                    if hi == 0 {
                        None
                    } else {
                        Some((0, hi - 1))
                    }
                }
            }
            RangeOp::Lte => {
                if from.total_cmp(&min) == Ordering::Less {
                    None
                } else {
                    let hi = self.upper_bound(data, &extract, from);
                    if hi == 0 {
                        None
                    } else {
                        Some((0, hi - 1))
                    }
                }
            }
        };

        Ok(result)
    }

    /// Verifies that the permutation covers the whole data array and that
    /// adjacent pairs are correctly ordered. With `random_sampling`, the
    /// first and last pairs are always checked plus
    /// `floor((n - 1) * random_sampling_factor)` random adjacent pairs.
    /// Repairing is the caller's job; this only reports.
    pub fn check<F>(&self, data: &[Document], extract: F, opts: &CheckIndexOptions) -> bool
    where
        F: Fn(&Document) -> Value,
    {
        if self.values.len() != data.len() {
            log::warn!(
                "Binary index length {} does not match data length {}",
                self.values.len(),
                data.len()
            );
            return false;
        }

        let n = self.values.len();
        if n < 2 {
            return true;
        }

        let pair_ok = |slot: usize| -> bool {
            extract(&data[self.values[slot]]).total_cmp(&extract(&data[self.values[slot + 1]]))
                != Ordering::Greater
        };

        if opts.random_sampling {
            if !pair_ok(0) || !pair_ok(n - 2) {
                return false;
            }
            let samples = (((n - 1) as f64) * opts.random_sampling_factor).floor() as usize;
            let mut rng = rand::thread_rng();
            for _ in 0..samples {
                let slot = rng.gen_range(0..n - 1);
                if !pair_ok(slot) {
                    return false;
                }
            }
            true
        } else {
            (0..n - 1).all(pair_ok)
        }
    }
}
