//! SQL construction helpers.
//!
//! Filters are translated to WHERE fragments with numbered parameters
//! (`?1`, `?2`, ...). Field names are validated against the filterable
//! column whitelist before interpolation; values always travel as bound
//! parameters.

use crate::models::{Filter, Predicate};
use crate::Result;
use rusqlite::types::Value;

/// Builds a WHERE fragment from a filter with numbered parameters.
///
/// Returns a tuple of:
/// - the clause string (prefixed with `" AND "` when non-empty)
/// - the parameter values in placeholder order
/// - the next available parameter index
///
/// # Errors
///
/// Returns [`crate::Error::Validation`] when the filter references an
/// unknown field.
///
/// # Examples
///
/// ```
/// use statehouse::models::Filter;
/// use statehouse::storage::sqlite::build_filter_clause_numbered;
///
/// let filter = Filter::new().with_eq("kind", "snapshot");
/// let (clause, params, next) = build_filter_clause_numbered(&filter, 1).unwrap();
/// assert_eq!(clause, " AND kind = ?1");
/// assert_eq!(params.len(), 1);
/// assert_eq!(next, 2);
/// ```
pub fn build_filter_clause_numbered(
    filter: &Filter,
    start_param: usize,
) -> Result<(String, Vec<Value>, usize)> {
    filter.validate()?;

    let mut conditions = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    let mut param_idx = start_param;

    for (field, predicate) in filter.iter() {
        match predicate {
            Predicate::Eq(value) => {
                conditions.push(format!("{field} = ?{param_idx}"));
                params.push(value.to_sql_value());
                param_idx += 1;
            },
            Predicate::Ne(value) => {
                conditions.push(format!("{field} != ?{param_idx}"));
                params.push(value.to_sql_value());
                param_idx += 1;
            },
            Predicate::Gt(value) => {
                conditions.push(format!("{field} > ?{param_idx}"));
                params.push(value.to_sql_value());
                param_idx += 1;
            },
            Predicate::Gte(value) => {
                conditions.push(format!("{field} >= ?{param_idx}"));
                params.push(value.to_sql_value());
                param_idx += 1;
            },
            Predicate::Lt(value) => {
                conditions.push(format!("{field} < ?{param_idx}"));
                params.push(value.to_sql_value());
                param_idx += 1;
            },
            Predicate::Lte(value) => {
                conditions.push(format!("{field} <= ?{param_idx}"));
                params.push(value.to_sql_value());
                param_idx += 1;
            },
            Predicate::In(values) => {
                // An empty IN list matches nothing, mirroring SQL semantics
                if values.is_empty() {
                    conditions.push("0 = 1".to_string());
                } else {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|_| {
                            let p = format!("?{param_idx}");
                            param_idx += 1;
                            p
                        })
                        .collect();
                    conditions.push(format!("{field} IN ({})", placeholders.join(",")));
                    for value in values {
                        params.push(value.to_sql_value());
                    }
                }
            },
            Predicate::Like(pattern) => {
                conditions.push(format!("{field} LIKE ?{param_idx}"));
                params.push(Value::Text(pattern.clone()));
                param_idx += 1;
            },
        }
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" AND {}", conditions.join(" AND "))
    };

    Ok((clause, params, param_idx))
}

/// WHERE fragment excluding TTL-expired rows; binds "now" at `param_idx`.
#[must_use]
pub fn not_expired_clause(param_idx: usize) -> String {
    format!(" AND (expires_at IS NULL OR expires_at > ?{param_idx})")
}
