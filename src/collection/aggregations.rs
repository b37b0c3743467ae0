//! Numeric aggregation helpers.
//!
//! All numeric aggregations operate over [Collection::extract_numerical]:
//! field values are coerced with a parse-to-float rule (numbers pass
//! through, strings are parsed) and non-finite results are dropped.

use crate::collection::opal_collection::resolve_field;
use crate::collection::{Collection, DocId};
use crate::Value;

impl Collection {
    /// Raw values of `field` across all documents, in data order.
    /// Registered nested properties resolve here too.
    pub fn extract(&self, field: &str) -> Vec<Value> {
        let state = self.inner.state.read();
        let nested = &self.inner.config.nested;
        state
            .data
            .iter()
            .map(|doc| resolve_field(nested, doc, field))
            .collect()
    }

    /// Numerical projection of `field`: parse-to-float coercion with
    /// non-finite values dropped.
    pub fn extract_numerical(&self, field: &str) -> Vec<f64> {
        self.extract(field)
            .iter()
            .filter_map(Value::coerce_f64)
            .filter(|v| v.is_finite())
            .collect()
    }

    pub fn min(&self, field: &str) -> Option<f64> {
        self.extract_numerical(field)
            .into_iter()
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn max(&self, field: &str) -> Option<f64> {
        self.extract_numerical(field)
            .into_iter()
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Document id and value of the smallest numerical `field`.
    pub fn min_record(&self, field: &str) -> Option<(DocId, f64)> {
        self.numeric_records(field)
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Document id and value of the largest numerical `field`.
    pub fn max_record(&self, field: &str) -> Option<(DocId, f64)> {
        self.numeric_records(field)
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn avg(&self, field: &str) -> Option<f64> {
        let values = self.extract_numerical(field);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Population standard deviation of the numerical projection.
    pub fn std_dev(&self, field: &str) -> Option<f64> {
        let values = self.extract_numerical(field);
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        Some(variance.sqrt())
    }

    /// Most frequent value of the numerical projection; `None` over an
    /// empty projection. Ties resolve to the smallest value.
    pub fn mode(&self, field: &str) -> Option<f64> {
        let mut values = self.extract_numerical(field);
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let mut best = (values[0], 0usize);
        let mut run = (values[0], 0usize);
        for value in values {
            if value == run.0 {
                run.1 += 1;
            } else {
                run = (value, 1);
            }
            if run.1 > best.1 {
                best = run;
            }
        }
        Some(best.0)
    }

    /// Middle value of the sorted numerical projection, or the mean of the
    /// two middle values for an even count.
    pub fn median(&self, field: &str) -> Option<f64> {
        let mut values = self.extract_numerical(field);
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let mid = values.len() / 2;
        if values.len() % 2 == 1 {
            Some(values[mid])
        } else {
            Some((values[mid - 1] + values[mid]) / 2.0)
        }
    }

    fn numeric_records(&self, field: &str) -> Vec<(DocId, f64)> {
        let state = self.inner.state.read();
        let nested = &self.inner.config.nested;
        state
            .data
            .iter()
            .filter_map(|doc| {
                let value = resolve_field(nested, doc, field).coerce_f64()?;
                if !value.is_finite() {
                    return None;
                }
                Some((doc.id()?, value))
            })
            .collect()
    }
}
