//! Dynamic views: saved filters whose result sets update incrementally.
//!
//! A view is owned by its collection (the collection holds the list of
//! views; a view never holds a reference back), and the collection drives it
//! through a narrow observer contract on every mutation:
//! [DynamicView::evaluate_document], [DynamicView::remove_document], and the
//! transaction trio.

use crate::collection::Document;
use crate::filter::Filter;
use crate::Value;

/// An incrementally maintained result set over the owning collection.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DynamicView {
    name: String,
    filter: Filter,
    /// Data positions currently in the result set, ascending.
    result_positions: Vec<usize>,
    #[serde(skip)]
    tx_snapshot: Option<Vec<usize>>,
}

impl DynamicView {
    pub fn new(name: &str, filter: Filter) -> Self {
        DynamicView {
            name: name.to_string(),
            filter,
            result_positions: Vec::new(),
            tx_snapshot: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Positions currently in the result set.
    pub fn positions(&self) -> &[usize] {
        &self.result_positions
    }

    pub fn count(&self) -> usize {
        self.result_positions.len()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.result_positions.binary_search(&position).is_ok()
    }

    /// Materializes the result documents against the owning collection's
    /// data array.
    pub fn data(&self, data: &[Document]) -> Vec<Document> {
        self.result_positions
            .iter()
            .filter_map(|&pos| data.get(pos).cloned())
            .collect()
    }

    /// Re-evaluates the view from scratch, for example after
    /// deserialization or `clear`.
    pub fn rebuild(&mut self, data: &[Document], resolver: &dyn Fn(&Document, &str) -> Value) {
        self.result_positions = data
            .iter()
            .enumerate()
            .filter(|(_, doc)| self.filter.apply_with(doc, resolver))
            .map(|(pos, _)| pos)
            .collect();
    }

    /// Re-checks whether `position` belongs in the result set after the
    /// document there was inserted (`is_new`) or replaced.
    pub fn evaluate_document(
        &mut self,
        doc: &Document,
        position: usize,
        is_new: bool,
        resolver: &dyn Fn(&Document, &str) -> Value,
    ) {
        let matches = self.filter.apply_with(doc, resolver);
        let slot = self.result_positions.binary_search(&position);

        match (matches, slot) {
            (true, Err(at)) => self.result_positions.insert(at, position),
            (false, Ok(at)) if !is_new => {
                self.result_positions.remove(at);
            }
            _ => {}
        }
    }

    /// Drops `position` from the result set and shifts the bookkeeping for
    /// every later position down by one.
    pub fn remove_document(&mut self, position: usize) {
        if let Ok(at) = self.result_positions.binary_search(&position) {
            self.result_positions.remove(at);
        }
        for pos in self.result_positions.iter_mut() {
            if *pos > position {
                *pos -= 1;
            }
        }
    }

    pub fn start_transaction(&mut self) {
        self.tx_snapshot = Some(self.result_positions.clone());
    }

    pub fn commit(&mut self) {
        self.tx_snapshot = None;
    }

    pub fn rollback(&mut self) {
        if let Some(snapshot) = self.tx_snapshot.take() {
            self.result_positions = snapshot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::field;

    fn resolver(doc: &Document, name: &str) -> Value {
        doc.get(name)
    }

    fn adults() -> DynamicView {
        DynamicView::new("adults", field("age").gte(18))
    }

    #[test]
    fn test_rebuild_selects_matches() {
        let data = vec![doc! { "age": 30 }, doc! { "age": 10 }, doc! { "age": 20 }];
        let mut view = adults();
        view.rebuild(&data, &resolver);
        assert_eq!(view.positions(), &[0, 2]);
    }

    #[test]
    fn test_evaluate_document_insert() {
        let data = vec![doc! { "age": 30 }, doc! { "age": 10 }];
        let mut view = adults();

        view.evaluate_document(&data[0], 0, true, &resolver);
        view.evaluate_document(&data[1], 1, true, &resolver);

        assert_eq!(view.positions(), &[0]);
        assert!(view.contains(0));
        assert!(!view.contains(1));
    }

    #[test]
    fn test_evaluate_document_update_moves_membership() {
        let mut data = vec![doc! { "age": 30 }];
        let mut view = adults();
        view.evaluate_document(&data[0], 0, true, &resolver);
        assert_eq!(view.count(), 1);

        data[0] = doc! { "age": 10 };
        view.evaluate_document(&data[0], 0, false, &resolver);
        assert_eq!(view.count(), 0);

        data[0] = doc! { "age": 40 };
        view.evaluate_document(&data[0], 0, false, &resolver);
        assert_eq!(view.positions(), &[0]);
    }

    #[test]
    fn test_remove_document_shifts_positions() {
        let data = vec![doc! { "age": 30 }, doc! { "age": 40 }, doc! { "age": 50 }];
        let mut view = adults();
        view.rebuild(&data, &resolver);
        assert_eq!(view.positions(), &[0, 1, 2]);

        view.remove_document(1);
        assert_eq!(view.positions(), &[0, 1]);
    }

    #[test]
    fn test_remove_document_not_member_still_shifts() {
        let data = vec![doc! { "age": 10 }, doc! { "age": 40 }];
        let mut view = adults();
        view.rebuild(&data, &resolver);
        assert_eq!(view.positions(), &[1]);

        view.remove_document(0);
        assert_eq!(view.positions(), &[0]);
    }

    #[test]
    fn test_transaction_rollback_restores_result_set() {
        let data = vec![doc! { "age": 30 }];
        let mut view = adults();
        view.rebuild(&data, &resolver);

        view.start_transaction();
        view.remove_document(0);
        assert_eq!(view.count(), 0);

        view.rollback();
        assert_eq!(view.positions(), &[0]);
    }

    #[test]
    fn test_transaction_commit_keeps_changes() {
        let data = vec![doc! { "age": 30 }];
        let mut view = adults();
        view.rebuild(&data, &resolver);

        view.start_transaction();
        view.remove_document(0);
        view.commit();

        view.rollback(); // no snapshot left, must be a no-op
        assert_eq!(view.count(), 0);
    }

    #[test]
    fn test_data_materializes_documents() {
        let data = vec![doc! { "age": 30, "name": "a" }, doc! { "age": 10 }];
        let mut view = adults();
        view.rebuild(&data, &resolver);

        let result = view.data(&data);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("name"), Value::String("a".into()));
    }
}
