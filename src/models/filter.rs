//! Flat predicate filters over record columns.
//!
//! A filter maps field names to exactly one predicate each; multiple fields
//! are conjoined with AND. The shape is deliberately flat: no OR, no nesting.
//! Translation to SQL lives in [`crate::storage::sqlite::build_filter_clause_numbered`].

use std::collections::BTreeMap;

/// Columns that may appear in a filter.
///
/// Unknown field names are rejected with a validation error rather than
/// interpolated into SQL.
pub const FILTERABLE_COLUMNS: &[&str] = &[
    "id",
    "kind",
    "thread_id",
    "session_id",
    "created_at",
    "updated_at",
    "expires_at",
    "compressed",
];

/// A literal value a predicate compares against.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text comparison.
    Text(String),
    /// Numeric comparison (timestamps are floating-point seconds).
    Number(f64),
    /// Boolean comparison (stored as 0/1).
    Bool(bool),
}

impl FieldValue {
    /// Converts to the SQLite value used for parameter binding.
    #[must_use]
    pub fn to_sql_value(&self) -> rusqlite::types::Value {
        match self {
            Self::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Self::Number(n) => rusqlite::types::Value::Real(*n),
            Self::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A single-field predicate.
///
/// A closed set of operators; each filter field carries exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value.
    Eq(FieldValue),
    /// Field is one of the listed values.
    In(Vec<FieldValue>),
    /// Field is strictly greater than the value.
    Gt(FieldValue),
    /// Field is greater than or equal to the value.
    Gte(FieldValue),
    /// Field is strictly less than the value.
    Lt(FieldValue),
    /// Field is less than or equal to the value.
    Lte(FieldValue),
    /// Field differs from the value.
    Ne(FieldValue),
    /// Field matches the SQL LIKE pattern (caller supplies `%`/`_` wildcards).
    Like(String),
}

/// Conjunction of per-field predicates.
///
/// # Examples
///
/// ```
/// use statehouse::models::Filter;
///
/// let filter = Filter::new()
///     .with_eq("kind", "snapshot")
///     .with_gt("created_at", 1_700_000_000.0);
/// assert_eq!(filter.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: BTreeMap<String, Predicate>,
}

impl Filter {
    /// Creates an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an arbitrary predicate for a field, replacing any previous one.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.fields.insert(field.into(), predicate);
        self
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn with_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Predicate::Eq(value.into()))
    }

    /// Adds a membership predicate.
    #[must_use]
    pub fn with_in(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<FieldValue>>,
    ) -> Self {
        self.with(
            field,
            Predicate::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Adds a greater-than predicate.
    #[must_use]
    pub fn with_gt(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Predicate::Gt(value.into()))
    }

    /// Adds a greater-than-or-equal predicate.
    #[must_use]
    pub fn with_gte(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Predicate::Gte(value.into()))
    }

    /// Adds a less-than predicate.
    #[must_use]
    pub fn with_lt(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Predicate::Lt(value.into()))
    }

    /// Adds a less-than-or-equal predicate.
    #[must_use]
    pub fn with_lte(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Predicate::Lte(value.into()))
    }

    /// Adds an inequality predicate.
    #[must_use]
    pub fn with_ne(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Predicate::Ne(value.into()))
    }

    /// Adds a LIKE predicate. The pattern is used verbatim.
    #[must_use]
    pub fn with_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with(field, Predicate::Like(pattern.into()))
    }

    /// Iterates over `(field, predicate)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Predicate)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of constrained fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the filter constrains nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validates that every constrained field is a known column.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] naming the first unknown field.
    pub fn validate(&self) -> crate::Result<()> {
        for field in self.fields.keys() {
            if !FILTERABLE_COLUMNS.contains(&field.as_str()) {
                return Err(crate::Error::Validation(format!(
                    "unknown filter field '{field}'"
                )));
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Filter {
    type Item = (&'a String, &'a Predicate);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Predicate>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert_eq!(filter.len(), 0);
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_builder_replaces_previous_predicate() {
        let filter = Filter::new()
            .with_eq("kind", "a")
            .with_eq("kind", "b");
        assert_eq!(filter.len(), 1);
        assert_eq!(
            filter.iter().next(),
            Some(("kind", &Predicate::Eq(FieldValue::Text("b".to_string()))))
        );
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let filter = Filter::new().with_eq("payload", "x");
        let err = filter.validate().unwrap_err();
        assert!(err.to_string().contains("unknown filter field 'payload'"));
    }

    #[test]
    fn test_validate_accepts_all_known_columns() {
        let mut filter = Filter::new();
        for col in FILTERABLE_COLUMNS {
            filter = filter.with_eq(*col, "v");
        }
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::from("x"), FieldValue::Text("x".to_string()));
        assert_eq!(FieldValue::from(1.5), FieldValue::Number(1.5));
        assert_eq!(FieldValue::from(true), FieldValue::Bool(true));

        assert_eq!(
            FieldValue::from(true).to_sql_value(),
            rusqlite::types::Value::Integer(1)
        );
        assert_eq!(
            FieldValue::from(2.0).to_sql_value(),
            rusqlite::types::Value::Real(2.0)
        );
    }

    #[test]
    fn test_in_predicate_collects_values() {
        let filter = Filter::new().with_in("kind", ["a", "b", "c"]);
        match filter.iter().next() {
            Some((_, Predicate::In(values))) => assert_eq!(values.len(), 3),
            other => panic!("expected In predicate, got {other:?}"),
        }
    }

    #[test]
    fn test_fields_iterate_in_name_order() {
        let filter = Filter::new()
            .with_eq("thread_id", "t")
            .with_eq("kind", "k");
        let names: Vec<&str> = filter.iter().map(|(f, _)| f).collect();
        assert_eq!(names, vec!["kind", "thread_id"]);
    }
}
