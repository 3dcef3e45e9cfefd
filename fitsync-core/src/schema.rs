//! Per-collection schema and the codec between records and mirror columns.
//!
//! Declared fields get a typed column in the collection's mirror table;
//! everything else rides along in a JSON `extra` column. Json-kind fields are
//! encoded and decoded explicitly here, so reading a row never has to guess
//! whether a string "looks like JSON".

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::CodecError;
use crate::filter::Filter;
use crate::record::{
    format_timestamp, parse_timestamp, Document, CREATED_AT_KEY, LAST_SYNCED_AT_KEY,
    UPDATED_AT_KEY,
};

/// Mirror columns every table has. Declared fields may not reuse them.
pub const SYSTEM_COLUMNS: [&str; 6] = [
    "id",
    "extra",
    "created_at",
    "updated_at",
    "sync_status",
    "last_synced_at",
];

/// Storage type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Boolean,
    /// Structured value (array/object) stored as JSON text.
    Json,
    /// RFC 3339 timestamp stored as normalized text.
    Timestamp,
}

impl FieldKind {
    /// SQLite column type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Json | FieldKind::Timestamp => "TEXT",
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
            FieldKind::Real => "REAL",
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Text => "a string",
            FieldKind::Integer => "an integer",
            FieldKind::Real => "a number",
            FieldKind::Boolean => "a boolean",
            FieldKind::Json => "any JSON value",
            FieldKind::Timestamp => "an RFC 3339 timestamp",
        }
    }

    /// Encodes a JSON value into its column representation.
    pub fn encode(&self, field: &str, value: &Value) -> Result<ColumnValue, CodecError> {
        let mismatch = || CodecError::TypeMismatch {
            field: field.to_string(),
            expected: self.expected(),
            found: json_type_name(value).to_string(),
        };

        if value.is_null() {
            return Ok(ColumnValue::Null);
        }

        match self {
            FieldKind::Text => value
                .as_str()
                .map(|s| ColumnValue::Text(s.to_string()))
                .ok_or_else(mismatch),
            FieldKind::Integer => value.as_i64().map(ColumnValue::Integer).ok_or_else(mismatch),
            FieldKind::Real => value.as_f64().map(ColumnValue::Real).ok_or_else(mismatch),
            FieldKind::Boolean => value
                .as_bool()
                .map(|b| ColumnValue::Integer(i64::from(b)))
                .ok_or_else(mismatch),
            FieldKind::Json => Ok(ColumnValue::Text(value.to_string())),
            FieldKind::Timestamp => {
                let text = value.as_str().ok_or_else(mismatch)?;
                let parsed = parse_timestamp(field, text)?;
                Ok(ColumnValue::Text(format_timestamp(&parsed)))
            }
        }
    }

    /// Decodes a column back into the JSON value the record carried.
    pub fn decode(&self, column: &str, raw: ColumnValue) -> Result<Value, CodecError> {
        match (self, raw) {
            (_, ColumnValue::Null) => Ok(Value::Null),
            (FieldKind::Boolean, ColumnValue::Integer(i)) => Ok(Value::Bool(i != 0)),
            (FieldKind::Integer, ColumnValue::Integer(i)) => Ok(Value::from(i)),
            (FieldKind::Real, ColumnValue::Real(f)) => Ok(Value::from(f)),
            (FieldKind::Real, ColumnValue::Integer(i)) => Ok(Value::from(i as f64)),
            (FieldKind::Json, ColumnValue::Text(text)) => {
                serde_json::from_str(&text).map_err(|source| CodecError::MalformedJson {
                    column: column.to_string(),
                    source,
                })
            }
            (FieldKind::Text | FieldKind::Timestamp, ColumnValue::Text(text)) => {
                Ok(Value::String(text))
            }
            (kind, other) => Err(CodecError::TypeMismatch {
                field: column.to_string(),
                expected: kind.expected(),
                found: other.type_name().to_string(),
            }),
        }
    }
}

/// A value as it sits in a mirror column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
}

impl ColumnValue {
    fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Text(_) => "text",
            ColumnValue::Integer(_) => "integer",
            ColumnValue::Real(_) => "real",
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn check_identifier(name: &str) -> Result<(), CodecError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(CodecError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// How one collection is laid out in the local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    /// A schema with no declared fields, mirrored into a table of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            fields: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks table and field names before they are used in SQL.
    pub fn validate(&self) -> Result<(), CodecError> {
        check_identifier(&self.table)?;
        for field in &self.fields {
            check_identifier(&field.name)?;
            if SYSTEM_COLUMNS.contains(&field.name.as_str()) {
                return Err(CodecError::InvalidIdentifier(format!(
                    "{} (reserved column)",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Checks a payload against the declared field kinds.
    pub fn validate_fields(&self, fields: &Document) -> Result<(), CodecError> {
        for def in &self.fields {
            if let Some(value) = fields.get(&def.name) {
                def.kind.encode(&def.name, value)?;
            }
        }
        Ok(())
    }

    /// Rewrites declared timestamp fields into the form the mirror stores,
    /// so the remote copy holds the same text.
    pub fn normalize(&self, fields: &mut Document) -> Result<(), CodecError> {
        for def in &self.fields {
            if def.kind != FieldKind::Timestamp {
                continue;
            }
            let normalized = match fields.get(&def.name) {
                Some(Value::String(text)) => format_timestamp(&parse_timestamp(&def.name, text)?),
                _ => continue,
            };
            fields.insert(def.name.clone(), Value::String(normalized));
        }
        Ok(())
    }

    /// True for declared timestamp fields and the record timestamps.
    pub fn is_timestamp(&self, field: &str) -> bool {
        matches!(field, CREATED_AT_KEY | UPDATED_AT_KEY | LAST_SYNCED_AT_KEY)
            || self
                .field_def(field)
                .is_some_and(|def| def.kind == FieldKind::Timestamp)
    }

    /// A copy of `filter` whose timestamp value is in stored form. Values
    /// that are not full timestamps, such as a bare date bound, pass through.
    pub fn normalize_filter(&self, filter: &Filter) -> Filter {
        let mut filter = filter.clone();
        if !self.is_timestamp(&filter.field) {
            return filter;
        }
        let normalized = match &filter.value {
            Value::String(text) => parse_timestamp(&filter.field, text)
                .ok()
                .map(|at| format_timestamp(&at)),
            _ => None,
        };
        if let Some(text) = normalized {
            filter.value = Value::String(text);
        }
        filter
    }

    /// Splits a record's fields into typed columns and the `extra` object.
    pub fn encode(&self, fields: &Document) -> Result<EncodedFields, CodecError> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for def in &self.fields {
            let value = fields.get(&def.name).unwrap_or(&Value::Null);
            columns.push((def.name.clone(), def.kind.encode(&def.name, value)?));
        }

        let extra: Document = fields
            .iter()
            .filter(|(key, _)| self.field_def(key).is_none())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(EncodedFields {
            columns,
            extra: Value::Object(extra).to_string(),
        })
    }

    /// Reassembles record fields from decoded columns and the `extra` text.
    ///
    /// Null columns are left out so a field that was never set stays absent.
    pub fn decode(
        &self,
        columns: Vec<(String, ColumnValue)>,
        extra: &str,
    ) -> Result<Document, CodecError> {
        let mut fields = match serde_json::from_str::<Value>(extra) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(CodecError::InvalidRecord(
                    "extra column is not a JSON object".to_string(),
                ))
            }
            Err(source) => {
                return Err(CodecError::MalformedJson {
                    column: "extra".to_string(),
                    source,
                })
            }
        };

        for (name, raw) in columns {
            let Some(def) = self.field_def(&name) else {
                continue;
            };
            let value = def.kind.decode(&name, raw)?;
            if !value.is_null() {
                fields.insert(name, value);
            }
        }
        Ok(fields)
    }
}

/// Column values ready to bind, in declared-field order.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFields {
    pub columns: Vec<(String, ColumnValue)>,
    pub extra: String,
}

/// Collection name to schema lookup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<CollectionSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in fitness collections.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for schema in crate::models::builtin_schemas() {
            // Built-in schemas use fixed, valid identifiers.
            let _ = registry.register(schema);
        }
        registry
    }

    pub fn register(&mut self, schema: CollectionSchema) -> Result<(), CodecError> {
        schema.validate()?;
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// The schema for `collection`, or an undeclared one mirrored into a
    /// table named after the collection.
    pub fn resolve(&self, collection: &str) -> Result<Arc<CollectionSchema>, CodecError> {
        if let Some(schema) = self.schemas.get(collection) {
            return Ok(Arc::clone(schema));
        }
        let schema = CollectionSchema::new(collection);
        schema.validate()?;
        Ok(Arc::new(schema))
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn workout_schema() -> CollectionSchema {
        CollectionSchema::new("workoutLogs")
            .with_table("workout_logs")
            .field("name", FieldKind::Text)
            .field("durationMinutes", FieldKind::Integer)
            .field("exercises", FieldKind::Json)
            .field("completed", FieldKind::Boolean)
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("workout_logs"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("logs; DROP TABLE x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a.b"));
    }

    #[test]
    fn test_schema_rejects_reserved_column() {
        let schema = CollectionSchema::new("logs").field("sync_status", FieldKind::Text);
        assert!(matches!(
            schema.validate(),
            Err(CodecError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_encode_splits_declared_and_extra() {
        let schema = workout_schema();
        let fields = doc(json!({
            "name": "Leg Day",
            "durationMinutes": 45,
            "exercises": [{"name": "Squat", "reps": 5}],
            "completed": true,
            "mood": "great"
        }));

        let encoded = schema.encode(&fields).unwrap();
        assert_eq!(
            encoded.columns,
            vec![
                ("name".to_string(), ColumnValue::Text("Leg Day".into())),
                ("durationMinutes".to_string(), ColumnValue::Integer(45)),
                (
                    "exercises".to_string(),
                    ColumnValue::Text(r#"[{"name":"Squat","reps":5}]"#.into())
                ),
                ("completed".to_string(), ColumnValue::Integer(1)),
            ]
        );
        assert_eq!(encoded.extra, r#"{"mood":"great"}"#);
    }

    #[test]
    fn test_decode_restores_structured_fields() {
        let schema = workout_schema();
        let columns = vec![
            ("name".to_string(), ColumnValue::Text("Leg Day".into())),
            ("durationMinutes".to_string(), ColumnValue::Null),
            (
                "exercises".to_string(),
                ColumnValue::Text(r#"[{"name":"Squat"}]"#.into()),
            ),
            ("completed".to_string(), ColumnValue::Integer(0)),
        ];

        let fields = schema.decode(columns, r#"{"mood":"ok"}"#).unwrap();
        assert_eq!(fields["name"], json!("Leg Day"));
        assert_eq!(fields["exercises"], json!([{"name": "Squat"}]));
        assert_eq!(fields["completed"], json!(false));
        assert_eq!(fields["mood"], json!("ok"));
        assert!(!fields.contains_key("durationMinutes"));
    }

    #[test]
    fn test_text_that_looks_like_json_stays_text() {
        let schema = CollectionSchema::new("notes").field("body", FieldKind::Text);
        let columns = vec![("body".to_string(), ColumnValue::Text("[1,2,3]".into()))];
        let fields = schema.decode(columns, "{}").unwrap();
        assert_eq!(fields["body"], json!("[1,2,3]"));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let schema = workout_schema();
        let err = schema
            .validate_fields(&doc(json!({"durationMinutes": "forty"})))
            .unwrap_err();
        match err {
            CodecError::TypeMismatch { field, found, .. } => {
                assert_eq!(field, "durationMinutes");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timestamp_is_normalized() {
        let value = FieldKind::Timestamp
            .encode("checkedInAt", &json!("2025-01-15T09:30:00+02:00"))
            .unwrap();
        assert_eq!(
            value,
            ColumnValue::Text("2025-01-15T07:30:00.000Z".to_string())
        );
        assert!(FieldKind::Timestamp
            .encode("checkedInAt", &json!("tuesday"))
            .is_err());
    }

    #[test]
    fn test_normalize_rewrites_declared_timestamps() {
        let schema = CollectionSchema::new("attendance")
            .field("checkedInAt", FieldKind::Timestamp)
            .field("className", FieldKind::Text);

        let mut fields = doc(json!({
            "checkedInAt": "2025-01-15T18:30:00Z",
            "className": "2025-01-15T18:30:00Z",
            "note": "2025-01-15T18:30:00Z"
        }));
        schema.normalize(&mut fields).unwrap();
        assert_eq!(fields["checkedInAt"], json!("2025-01-15T18:30:00.000Z"));
        assert_eq!(fields["className"], json!("2025-01-15T18:30:00Z"));
        assert_eq!(fields["note"], json!("2025-01-15T18:30:00Z"));

        let mut bad = doc(json!({"checkedInAt": "tuesday"}));
        assert!(schema.normalize(&mut bad).is_err());
    }

    #[test]
    fn test_normalize_filter_values() {
        let schema = CollectionSchema::new("attendance").field("checkedInAt", FieldKind::Timestamp);

        let exact = schema.normalize_filter(&Filter::eq("checkedInAt", "2025-01-15T20:30:00+02:00"));
        assert_eq!(exact.value, json!("2025-01-15T18:30:00.000Z"));

        let updated = schema.normalize_filter(&Filter::eq("updatedAt", "2025-01-15T08:00:00Z"));
        assert_eq!(updated.value, json!("2025-01-15T08:00:00.000Z"));

        // Bare dates stay usable as range bounds
        let bound = schema.normalize_filter(&"checkedInAt>=2025-01-15".parse().unwrap());
        assert_eq!(bound.value, json!("2025-01-15"));

        let other = schema.normalize_filter(&Filter::eq("memberId", "2025-01-15T08:00:00Z"));
        assert_eq!(other.value, json!("2025-01-15T08:00:00Z"));
    }

    #[test]
    fn test_malformed_json_column() {
        let result = FieldKind::Json.decode("exercises", ColumnValue::Text("{oops".into()));
        assert!(matches!(result, Err(CodecError::MalformedJson { .. })));
    }

    #[test]
    fn test_registry_resolves_unknown_collection() {
        let registry = SchemaRegistry::with_defaults();
        let schema = registry.resolve("bodyMeasurements").unwrap();
        assert_eq!(schema.table, "bodyMeasurements");
        assert!(schema.fields.is_empty());

        assert!(registry.resolve("../etc").is_err());
        assert_eq!(
            registry.resolve("workoutLogs").unwrap().table,
            "workout_logs"
        );
    }
}
