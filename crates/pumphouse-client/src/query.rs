//! Export query synthesis.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::ObjectSchema;

/// Build the bulk export query for an object type.
///
/// Selects every field the schema names (all columns are backed up, not a
/// projection) and, when a window is given, filters on records modified
/// after it so daily runs export only what changed.
pub fn export_query(schema: &ObjectSchema, modified_after: Option<DateTime<Utc>>) -> String {
    let columns = if schema.fields.is_empty() {
        "Id".to_string()
    } else {
        schema
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut query = format!("SELECT {columns} FROM {}", schema.name);
    if let Some(after) = modified_after {
        let stamp = after.to_rfc3339_opts(SecondsFormat::Secs, true);
        query.push_str(&format!(" WHERE LastModifiedDate > {stamp}"));
    }
    query
}
