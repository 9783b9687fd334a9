//! Query building and execution.
//!
//! [`Query`] is the plain description of a query (filter, order, window) and
//! is what travels over the wire. [`Select`] binds a query to one collection
//! of a storage and runs it.
//!
//! Execution always filters, then orders, then applies `offset`/`limit`, so the
//! window never changes which records are considered.

use crate::filter::{Filter, Junction};
use crate::storage::Storage;
use crate::{error::Result, CollectionName, Error, OrderBy, Record, Schema};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Filter, order and window of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the filter.
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// AND a filter onto the current one, or set it if there is none.
    pub fn and_where(mut self, filter: impl Into<Filter>) -> Self {
        self.join(Junction::And, filter.into());
        self
    }

    /// OR a filter onto the current one, or set it if there is none.
    pub fn or_where(mut self, filter: impl Into<Filter>) -> Self {
        self.join(Junction::Or, filter.into());
        self
    }

    fn join(&mut self, op: Junction, filter: Filter) {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(current) => {
                let mut expr = current.into_expression();
                expr.push(op, filter);
                Filter::Expression(expr)
            }
        });
    }

    /// Replace the ordering with a single key.
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order = Some(OrderBy::new(field, descending));
        self
    }

    /// Add a tie-breaking key, or set the first key if there is none.
    pub fn then_order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order = Some(match self.order.take() {
            Some(order) => order.then(field, descending),
            None => OrderBy::new(field, descending),
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Zero-based page of `size` records.
    pub fn page(self, page: usize, size: usize) -> Self {
        self.offset(page.saturating_mul(size)).limit(size)
    }

    pub fn matches(&self, record: &Record) -> Result<bool> {
        match &self.filter {
            Some(filter) => filter.filter_record(record),
            None => Ok(true),
        }
    }

    /// Filter, order and window an in-memory set of records.
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Result<Vec<Record>> {
        let mut matched = Vec::new();
        for record in records {
            if self.matches(&record)? {
                matched.push(record);
            }
        }
        self.finish(matched)
    }

    fn finish(&self, mut matched: Vec<Record>) -> Result<Vec<Record>> {
        if let Some(order) = &self.order {
            order.sort(&mut matched);
        }
        Ok(self.window(matched))
    }

    /// Apply `offset` and `limit` to an already filtered and ordered list.
    pub fn window(&self, records: Vec<Record>) -> Vec<Record> {
        let offset = self.offset.unwrap_or(0);
        let windowed = records.into_iter().skip(offset);
        match self.limit {
            Some(limit) => windowed.take(limit).collect(),
            None => windowed.collect(),
        }
    }
}

/// A query over one collection of a storage.
///
/// Built through [`ObservableStore::select`](crate::ObservableStore::select),
/// which fails for collections the schema does not declare.
#[derive(Clone)]
pub struct Select {
    collection: CollectionName,
    storage: Arc<dyn Storage>,
    query: Query,
}

impl std::fmt::Debug for Select {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select")
            .field("collection", &self.collection)
            .field("query", &self.query)
            .finish()
    }
}

impl Select {
    /// Create a select, checking the collection against `schema` up front.
    pub fn new(
        schema: &Schema,
        collection: &str,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        schema.require_collection(collection)?;
        Ok(Self {
            collection: collection.to_string(),
            storage,
            query: Query::default(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Replace the whole query.
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.query = self.query.filter(filter);
        self
    }

    pub fn and_where(mut self, filter: impl Into<Filter>) -> Self {
        self.query = self.query.and_where(filter);
        self
    }

    pub fn or_where(mut self, filter: impl Into<Filter>) -> Self {
        self.query = self.query.or_where(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.query = self.query.order_by(field, descending);
        self
    }

    pub fn then_order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.query = self.query.then_order_by(field, descending);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn page(mut self, page: usize, size: usize) -> Self {
        self.query = self.query.page(page, size);
        self
    }

    /// Number of matching records. Ignores order and window.
    pub async fn count(&self) -> Result<usize> {
        let query = &self.query;
        self.storage
            .cursor(&self.collection)
            .try_fold(0usize, |count, record| async move {
                Ok::<_, Error>(if query.matches(&record)? { count + 1 } else { count })
            })
            .await
    }

    /// First record of the result, or `None` when it is empty.
    pub async fn first(&self) -> Result<Option<Record>> {
        Ok(self.all().await?.into_iter().next())
    }

    /// Every record of the result, filtered, ordered and windowed.
    pub async fn all(&self) -> Result<Vec<Record>> {
        let query = &self.query;
        let matched: Vec<Record> = self
            .storage
            .cursor(&self.collection)
            .try_filter_map(|record| async move {
                Ok::<_, Error>(query.matches(&record)?.then_some(record))
            })
            .try_collect()
            .await?;
        query.finish(matched)
    }

    /// Alias of [`Select::all`].
    pub async fn to_array(&self) -> Result<Vec<Record>> {
        self.all().await
    }

    /// Call `f` on each record of the result, in order.
    pub async fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Record),
    {
        for record in self.all().await? {
            f(&record);
        }
        Ok(())
    }
}
