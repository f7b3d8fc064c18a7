//! Data model types: records, filters, health reports.

mod filter;
mod health;
mod record;

pub use filter::{FieldValue, Filter, Predicate, FILTERABLE_COLUMNS};
pub use health::{HealthInfo, HealthStatus};
pub use record::{Metadata, RecordId, StateRecord};
