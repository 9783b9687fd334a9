//! Multi-key ordering of records.

use crate::{value::total_order, Record};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    #[serde(alias = "name")]
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = total_order(a.get(&self.field), b.get(&self.field));
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// An ordered list of sort keys. Key 0 is primary, later keys break ties.
///
/// Serialized as a plain array of keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderBy {
    keys: Vec<OrderKey>,
}

impl OrderBy {
    pub fn new(field: impl Into<String>, descending: bool) -> Self {
        Self {
            keys: vec![OrderKey {
                field: field.into(),
                descending,
            }],
        }
    }

    /// Append a tie-breaking key.
    pub fn then(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.keys.push(OrderKey {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn keys(&self) -> &[OrderKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare two records key by key.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.keys
            .iter()
            .map(|key| key.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Sort records in place. Stable: records equal on every key keep their
    /// relative order.
    pub fn sort(&self, records: &mut [Record]) {
        if self.keys.is_empty() {
            return;
        }
        records.sort_by(|a, b| self.compare(a, b));
    }
}

impl From<OrderKey> for OrderBy {
    fn from(key: OrderKey) -> Self {
        Self { keys: vec![key] }
    }
}

impl FromIterator<OrderKey> for OrderBy {
    fn from_iter<I: IntoIterator<Item = OrderKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
