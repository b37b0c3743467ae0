//! Minimal query predicates.
//!
//! The full query compiler lives outside the engine; the collection core only
//! needs a small filter language for dynamic views, `update_where` /
//! `remove_where`, and the find helpers. Filters evaluate against a single
//! document using the engine's total-order comparators.

use crate::collection::Document;
use crate::Value;
use std::cmp::Ordering;

/// A predicate over documents.
///
/// Build filters with the fluent helpers:
///
/// ```ignore
/// use opal::filter::{all, field};
///
/// let adults = field("age").gte(18);
/// let narrow = adults.and(field("city").eq("Berlin"));
/// ```
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Inclusive on both endpoints.
    Between(String, Value, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Evaluates this filter against a document, resolving field values with
    /// `Document::get`.
    pub fn apply(&self, doc: &Document) -> bool {
        self.apply_with(doc, &|doc, field| doc.get(field))
    }

    /// Evaluates this filter with a custom field resolver. The collection
    /// passes a resolver that understands registered nested properties.
    pub fn apply_with(&self, doc: &Document, resolver: &dyn Fn(&Document, &str) -> Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => resolver(doc, field) == *value,
            Filter::Ne(field, value) => resolver(doc, field) != *value,
            Filter::Gt(field, value) => {
                resolver(doc, field).total_cmp(value) == Ordering::Greater
            }
            Filter::Gte(field, value) => resolver(doc, field).total_cmp(value) != Ordering::Less,
            Filter::Lt(field, value) => resolver(doc, field).total_cmp(value) == Ordering::Less,
            Filter::Lte(field, value) => {
                resolver(doc, field).total_cmp(value) != Ordering::Greater
            }
            Filter::Between(field, from, to) => {
                let v = resolver(doc, field);
                v.total_cmp(from) != Ordering::Less && v.total_cmp(to) != Ordering::Greater
            }
            Filter::And(filters) => filters.iter().all(|f| f.apply_with(doc, resolver)),
            Filter::Or(filters) => filters.iter().any(|f| f.apply_with(doc, resolver)),
            Filter::Not(filter) => !filter.apply_with(doc, resolver),
        }
    }

    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            f => Filter::And(vec![f, other]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match self {
            Filter::Or(mut filters) => {
                filters.push(other);
                Filter::Or(filters)
            }
            f => Filter::Or(vec![f, other]),
        }
    }

    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }
}

/// Matches every document.
pub fn all() -> Filter {
    Filter::All
}

/// Entry point of the fluent filter API.
pub fn field(name: &str) -> FluentFilter {
    FluentFilter {
        field: name.to_string(),
    }
}

/// Builder for single-field predicates.
pub struct FluentFilter {
    field: String,
}

impl FluentFilter {
    pub fn eq<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Eq(self.field, value.into())
    }

    pub fn ne<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Ne(self.field, value.into())
    }

    pub fn gt<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Gt(self.field, value.into())
    }

    pub fn gte<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Gte(self.field, value.into())
    }

    pub fn lt<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Lt(self.field, value.into())
    }

    pub fn lte<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Lte(self.field, value.into())
    }

    pub fn between<T: Into<Value>>(self, from: T, to: T) -> Filter {
        Filter::Between(self.field, from.into(), to.into())
    }
}
