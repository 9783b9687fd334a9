//! Filter expressions.
//!
//! A filter is either a single [`FilterTerm`] or a [`FilterExpression`]: a chain
//! of filters joined by AND/OR. Expressions are evaluated strictly left to
//! right with no operator precedence, so `a AND b OR c` means `(a AND b) OR c`.

use crate::{error::Result, record::type_name, value, Error, Record};
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// How a term compares a record field against its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Field is a member of the array value
    In,
    NotIn,
    /// Field's text matches the regular expression value
    Like,
    NotLike,
}

impl Comparison {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Eq => "EQ",
            Comparison::Neq => "NEQ",
            Comparison::Gt => "GT",
            Comparison::Gte => "GTE",
            Comparison::Lt => "LT",
            Comparison::Lte => "LTE",
            Comparison::In => "IN",
            Comparison::NotIn => "NOT_IN",
            Comparison::Like => "LIKE",
            Comparison::NotLike => "NOT_LIKE",
        }
    }
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EQ" | "EQUALS_TO" => Ok(Comparison::Eq),
            "NEQ" | "NOT_EQUALS_TO" => Ok(Comparison::Neq),
            "GT" | "GREATER_THAN" => Ok(Comparison::Gt),
            "GTE" | "GREATER_OR_EQUAL" => Ok(Comparison::Gte),
            "LT" | "LOWER_THAN" => Ok(Comparison::Lt),
            "LTE" | "LOWER_OR_EQUAL" => Ok(Comparison::Lte),
            "IN" => Ok(Comparison::In),
            "NOT_IN" => Ok(Comparison::NotIn),
            "LIKE" => Ok(Comparison::Like),
            "NOT_LIKE" => Ok(Comparison::NotLike),
            other => Err(Error::UnknownComparison(other.to_string())),
        }
    }
}

impl TryFrom<String> for Comparison {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Comparison> for String {
    fn from(c: Comparison) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operator joining a node to the result of everything before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Junction {
    And,
    Or,
}

/// Which shape a filter has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Term,
    Node,
    Expression,
}

/// A single field comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterTerm {
    /// Field name in the record
    #[serde(alias = "name")]
    pub field: String,
    pub comparison: Comparison,
    pub value: Value,
    /// Compiled `LIKE` pattern, built on first use
    #[serde(skip)]
    matcher: OnceLock<Regex>,
}

impl PartialEq for FilterTerm {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
            && self.comparison == other.comparison
            && self.value == other.value
    }
}

impl FilterTerm {
    pub fn new(field: impl Into<String>, comparison: Comparison, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            comparison,
            value: value.into(),
            matcher: OnceLock::new(),
        }
    }

    /// Evaluate the term against a record.
    ///
    /// A missing field never equals, orders against, or matches anything, so
    /// only the negated comparisons (`NEQ`, `NOT_IN`, `NOT_LIKE`) hold for it.
    pub fn filter_record(&self, record: &Record) -> Result<bool> {
        let field = record.get(&self.field);
        let matched = match self.comparison {
            Comparison::Eq => self.equals(field),
            Comparison::Neq => !self.equals(field),
            Comparison::Gt => self.ordering(field) == Some(Ordering::Greater),
            Comparison::Gte => matches!(
                self.ordering(field),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Lt => self.ordering(field) == Some(Ordering::Less),
            Comparison::Lte => matches!(
                self.ordering(field),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::In => self.member_of(field)?,
            Comparison::NotIn => !self.member_of(field)?,
            Comparison::Like => self.like(field)?,
            Comparison::NotLike => !self.like(field)?,
        };
        Ok(matched)
    }

    pub fn filter_type(&self) -> FilterType {
        FilterType::Term
    }

    fn equals(&self, field: Option<&Value>) -> bool {
        field.is_some_and(|v| value::values_equal(v, &self.value))
    }

    fn ordering(&self, field: Option<&Value>) -> Option<Ordering> {
        field.and_then(|v| value::compare_values(v, &self.value))
    }

    fn member_of(&self, field: Option<&Value>) -> Result<bool> {
        let members = self.value.as_array().ok_or_else(|| {
            Error::InvalidFilter(format!(
                "{} on '{}' expects an array, got {}",
                self.comparison,
                self.field,
                type_name(&self.value)
            ))
        })?;
        Ok(field.is_some_and(|v| members.iter().any(|m| value::values_equal(v, m))))
    }

    fn like(&self, field: Option<&Value>) -> Result<bool> {
        let matcher = self.matcher()?;
        Ok(field
            .and_then(value::match_text)
            .is_some_and(|text| matcher.is_match(&text)))
    }

    fn matcher(&self) -> Result<&Regex> {
        if let Some(regex) = self.matcher.get() {
            return Ok(regex);
        }
        let source = self.value.as_str().ok_or_else(|| {
            Error::InvalidFilter(format!(
                "{} on '{}' expects a pattern string, got {}",
                self.comparison,
                self.field,
                type_name(&self.value)
            ))
        })?;
        let regex = Regex::new(source).map_err(|e| {
            Error::InvalidFilter(format!("invalid pattern for '{}': {}", self.field, e))
        })?;
        Ok(self.matcher.get_or_init(|| regex))
    }
}

/// One link of an expression chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    /// Joins this node to the preceding result; absent on the first node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Junction>,
    pub filter: Filter,
}

impl FilterNode {
    pub fn filter_type(&self) -> FilterType {
        FilterType::Node
    }
}

/// A non-empty chain of filters folded left to right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpression {
    nodes: Vec<FilterNode>,
}

impl FilterExpression {
    /// Start an expression with a single filter.
    pub fn new(first: impl Into<Filter>) -> Self {
        Self {
            nodes: vec![FilterNode {
                op: None,
                filter: first.into(),
            }],
        }
    }

    /// Append `filter` joined to everything so far with AND.
    pub fn and(mut self, filter: impl Into<Filter>) -> Self {
        self.push(Junction::And, filter);
        self
    }

    /// Append `filter` joined to everything so far with OR.
    pub fn or(mut self, filter: impl Into<Filter>) -> Self {
        self.push(Junction::Or, filter);
        self
    }

    pub fn push(&mut self, op: Junction, filter: impl Into<Filter>) {
        self.nodes.push(FilterNode {
            op: Some(op),
            filter: filter.into(),
        });
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn filter_record(&self, record: &Record) -> Result<bool> {
        let mut nodes = self.nodes.iter();
        let Some(first) = nodes.next() else {
            return Ok(true);
        };
        let mut result = first.filter.filter_record(record)?;
        for node in nodes {
            result = match node.op.unwrap_or(Junction::And) {
                Junction::And => result && node.filter.filter_record(record)?,
                Junction::Or => result || node.filter.filter_record(record)?,
            };
        }
        Ok(result)
    }

    pub fn filter_type(&self) -> FilterType {
        FilterType::Expression
    }
}

/// A filter: a bare term or an expression chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Filter {
    Term(FilterTerm),
    Expression(FilterExpression),
}

impl Filter {
    /// Shorthand for a bare term.
    pub fn term(field: impl Into<String>, comparison: Comparison, value: impl Into<Value>) -> Self {
        Filter::Term(FilterTerm::new(field, comparison, value))
    }

    pub fn filter_record(&self, record: &Record) -> Result<bool> {
        match self {
            Filter::Term(term) => term.filter_record(record),
            Filter::Expression(expr) => expr.filter_record(record),
        }
    }

    pub fn filter_type(&self) -> FilterType {
        match self {
            Filter::Term(term) => term.filter_type(),
            Filter::Expression(expr) => expr.filter_type(),
        }
    }

    /// Join `other` with AND, promoting a bare term into an expression first.
    pub fn and(self, other: impl Into<Filter>) -> Self {
        Filter::Expression(self.into_expression().and(other))
    }

    /// Join `other` with OR, promoting a bare term into an expression first.
    pub fn or(self, other: impl Into<Filter>) -> Self {
        Filter::Expression(self.into_expression().or(other))
    }

    /// View this filter as an expression, wrapping a term in a one-node chain.
    pub fn into_expression(self) -> FilterExpression {
        match self {
            Filter::Expression(expr) => expr,
            term @ Filter::Term(_) => FilterExpression::new(term),
        }
    }
}

impl From<FilterTerm> for Filter {
    fn from(term: FilterTerm) -> Self {
        Filter::Term(term)
    }
}

impl From<FilterExpression> for Filter {
    fn from(expr: FilterExpression) -> Self {
        Filter::Expression(expr)
    }
}

// Dispatch on shape by hand so a bad comparison name surfaces as
// "Unknown comparison" instead of a generic untagged-enum mismatch.
impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let is_expression = raw.as_object().is_some_and(|o| o.contains_key("nodes"));
        if is_expression {
            let expr: FilterExpression = serde_json::from_value(raw).map_err(de::Error::custom)?;
            if expr.nodes.is_empty() {
                return Err(de::Error::custom("filter expression has no nodes"));
            }
            Ok(Filter::Expression(expr))
        } else {
            serde_json::from_value(raw)
                .map(Filter::Term)
                .map_err(de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::into_record;
    use serde_json::json;

    fn record(value: Value) -> Record {
        into_record(value).unwrap()
    }

    fn check(filter: &Filter, value: Value) -> bool {
        filter.filter_record(&record(value)).unwrap()
    }

    #[test]
    fn equality() {
        let eq = Filter::term("status", Comparison::Eq, "open");
        assert!(check(&eq, json!({"status": "open"})));
        assert!(!check(&eq, json!({"status": "closed"})));
        assert!(!check(&eq, json!({})));

        let neq = Filter::term("status", Comparison::Neq, "open");
        assert!(!check(&neq, json!({"status": "open"})));
        assert!(check(&neq, json!({"status": "closed"})));
        assert!(check(&neq, json!({})));
    }

    #[test]
    fn missing_field_is_not_null() {
        let is_null = Filter::term("deleted", Comparison::Eq, Value::Null);
        assert!(check(&is_null, json!({"deleted": null})));
        assert!(!check(&is_null, json!({})));
    }

    #[test]
    fn relational_numbers_and_strings() {
        let gt = Filter::term("age", Comparison::Gt, 30);
        assert!(check(&gt, json!({"age": 31})));
        assert!(check(&gt, json!({"age": 30.5})));
        assert!(!check(&gt, json!({"age": 30})));

        let gte = Filter::term("age", Comparison::Gte, 30);
        assert!(check(&gte, json!({"age": 30})));

        let lt = Filter::term("name", Comparison::Lt, "m");
        assert!(check(&lt, json!({"name": "alice"})));
        assert!(!check(&lt, json!({"name": "zed"})));

        let lte = Filter::term("name", Comparison::Lte, "m");
        assert!(check(&lte, json!({"name": "m"})));
    }

    #[test]
    fn mismatched_types_never_order() {
        let gt = Filter::term("age", Comparison::Gt, 10);
        assert!(!check(&gt, json!({"age": "99"})));
        let lt = Filter::term("age", Comparison::Lt, 10);
        assert!(!check(&lt, json!({"age": "1"})));
        assert!(!check(&lt, json!({})));
    }

    #[test]
    fn membership() {
        let within = Filter::term("tag", Comparison::In, json!(["a", "b"]));
        assert!(check(&within, json!({"tag": "a"})));
        assert!(!check(&within, json!({"tag": "c"})));
        assert!(!check(&within, json!({})));

        let outside = Filter::term("tag", Comparison::NotIn, json!(["a", "b"]));
        assert!(check(&outside, json!({"tag": "c"})));
        assert!(!check(&outside, json!({"tag": "b"})));
    }

    #[test]
    fn membership_requires_array() {
        let bad = Filter::term("tag", Comparison::In, "a");
        let err = bad.filter_record(&record(json!({"tag": "a"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(msg) if msg.contains("array")));
    }

    #[test]
    fn like_matches_text_form() {
        let like = Filter::term("email", Comparison::Like, "@example\\.com$");
        assert!(check(&like, json!({"email": "a@example.com"})));
        assert!(!check(&like, json!({"email": "a@example.org"})));
        assert!(!check(&like, json!({})));

        let digits = Filter::term("code", Comparison::Like, "^4\\d\\d$");
        assert!(check(&digits, json!({"code": 404})));

        let not_like = Filter::term("email", Comparison::NotLike, "@example\\.com$");
        assert!(check(&not_like, json!({"email": "a@example.org"})));
        assert!(check(&not_like, json!({})));
    }

    #[test]
    fn like_rejects_bad_pattern() {
        let bad = Filter::term("name", Comparison::Like, "([");
        let err = bad.filter_record(&record(json!({"name": "x"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));

        let not_text = Filter::term("name", Comparison::Like, 5);
        assert!(not_text.filter_record(&record(json!({"name": "x"}))).is_err());
    }

    #[test]
    fn unknown_comparison() {
        let err = "ALMOST".parse::<Comparison>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown comparison: ALMOST");

        let err = serde_json::from_value::<Filter>(json!({
            "field": "a", "comparison": "ALMOST", "value": 1
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown comparison: ALMOST"));
    }

    #[test]
    fn comparison_aliases() {
        assert_eq!("GREATER_THAN".parse::<Comparison>().unwrap(), Comparison::Gt);
        assert_eq!("LOWER_OR_EQUAL".parse::<Comparison>().unwrap(), Comparison::Lte);
        assert_eq!(Comparison::NotIn.to_string(), "NOT_IN");
    }

    #[test]
    fn expression_folds_left() {
        // t0 AND t1 OR t2 == (t0 AND t1) OR t2
        let t0 = Filter::term("a", Comparison::Eq, 1);
        let t1 = Filter::term("b", Comparison::Eq, 1);
        let t2 = Filter::term("c", Comparison::Eq, 1);
        let expr = FilterExpression::new(t0).and(t1).or(t2);
        let filter = Filter::from(expr);

        // Left grouping true through t2 alone; right grouping would need a == 1.
        assert!(check(&filter, json!({"a": 0, "b": 0, "c": 1})));
        // Left grouping true through t0 AND t1.
        assert!(check(&filter, json!({"a": 1, "b": 1, "c": 0})));
        assert!(!check(&filter, json!({"a": 1, "b": 0, "c": 0})));
    }

    #[test]
    fn promotion_of_bare_term() {
        let term = Filter::term("a", Comparison::Eq, 1);
        assert_eq!(term.filter_type(), FilterType::Term);

        let promoted = term.and(Filter::term("b", Comparison::Eq, 2));
        assert_eq!(promoted.filter_type(), FilterType::Expression);
        let expr = promoted.clone().into_expression();
        assert_eq!(expr.nodes().len(), 2);
        assert_eq!(expr.nodes()[0].op, None);
        assert_eq!(expr.nodes()[1].op, Some(Junction::And));
        assert_eq!(expr.nodes()[1].filter_type(), FilterType::Node);

        let chained = promoted.or(Filter::term("c", Comparison::Eq, 3));
        assert_eq!(chained.into_expression().nodes().len(), 3);
    }

    #[test]
    fn nested_expression_is_one_node() {
        let inner = Filter::term("b", Comparison::Eq, 1).or(Filter::term("c", Comparison::Eq, 1));
        let filter = Filter::term("a", Comparison::Eq, 1).and(inner);
        assert!(check(&filter, json!({"a": 1, "c": 1})));
        assert!(!check(&filter, json!({"a": 0, "c": 1})));
    }

    #[test]
    fn serde_shapes() {
        let filter = Filter::term("age", Comparison::Gte, 18)
            .and(Filter::term("name", Comparison::Like, "^A"));
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            json!({"nodes": [
                {"filter": {"field": "age", "comparison": "GTE", "value": 18}},
                {"op": "AND", "filter": {"field": "name", "comparison": "LIKE", "value": "^A"}}
            ]})
        );
        let parsed: Filter = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, filter);

        let legacy: Filter = serde_json::from_value(json!({
            "name": "age", "comparison": "GREATER_THAN", "value": 1
        }))
        .unwrap();
        assert_eq!(legacy, Filter::term("age", Comparison::Gt, 1));

        assert!(serde_json::from_value::<Filter>(json!({"nodes": []})).is_err());
    }
}
