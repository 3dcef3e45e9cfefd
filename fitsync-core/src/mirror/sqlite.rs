use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row};
use tokio::sync::Mutex;

use super::LocalMirror;
use crate::error::{CodecError, MirrorError, MirrorResult};
use crate::filter::{Filter, FilterOp};
use crate::record::{format_timestamp, parse_timestamp, Document, Record, SyncState};
use crate::schema::{check_identifier, CollectionSchema, ColumnValue, FieldKind};

/// Open (creating if needed) the mirror database.
pub async fn init_db(path: &Path) -> MirrorResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| MirrorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// SQLite-backed mirror with one table per collection.
///
/// Tables are created on first use from the collection schema, and columns
/// declared later are added to existing tables.
pub struct SqliteMirror {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    prepared: Mutex<HashSet<String>>,
}

impl SqliteMirror {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
            prepared: Mutex::new(HashSet::new()),
        }
    }

    pub async fn open(path: &Path) -> MirrorResult<Self> {
        Ok(Self::new(init_db(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_table(&self, schema: &CollectionSchema) -> MirrorResult<()> {
        schema.validate()?;

        let mut prepared = self.prepared.lock().await;
        if prepared.contains(&schema.table) {
            return Ok(());
        }

        let table = quote(&schema.table);
        let mut columns = vec!["id TEXT PRIMARY KEY NOT NULL".to_string()];
        for field in &schema.fields {
            columns.push(format!("{} {}", quote(&field.name), field.kind.sql_type()));
        }
        columns.extend(
            [
                "extra TEXT NOT NULL DEFAULT '{}'",
                "created_at TEXT NOT NULL",
                "updated_at TEXT NOT NULL",
                "sync_status TEXT NOT NULL DEFAULT 'pending'",
                "last_synced_at TEXT",
            ]
            .map(String::from),
        );

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            columns.join(", ")
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let existing: Vec<String> = sqlx::query(&format!("PRAGMA table_info({})", table))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;

        for field in &schema.fields {
            if existing.iter().any(|c| c.eq_ignore_ascii_case(&field.name)) {
                continue;
            }
            tracing::info!(
                table = %schema.table,
                column = %field.name,
                "Adding column to mirror table"
            );
            let alter = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table,
                quote(&field.name),
                field.kind.sql_type()
            );
            sqlx::query(&alter).execute(&self.pool).await?;
        }

        prepared.insert(schema.table.clone());
        Ok(())
    }

    async fn fetch(&self, schema: &CollectionSchema, id: &str) -> MirrorResult<Option<Record>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", quote(&schema.table));
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_record(schema, &row)).transpose()
    }

    /// Writes a record. Callers hold `write_lock`.
    async fn write(&self, schema: &CollectionSchema, record: &Record) -> MirrorResult<()> {
        let encoded = schema.encode(&record.fields)?;

        let mut names = vec!["id".to_string()];
        names.extend(encoded.columns.iter().map(|(name, _)| quote(name)));
        names.extend(
            [
                "extra",
                "created_at",
                "updated_at",
                "sync_status",
                "last_synced_at",
            ]
            .map(String::from),
        );

        let placeholders = vec!["?"; names.len()].join(", ");
        let updates = names[1..]
            .iter()
            .map(|name| format!("{name} = excluded.{name}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            quote(&schema.table),
            names.join(", "),
            placeholders,
            updates
        );

        let mut query = sqlx::query(&sql).bind(record.id.as_str());
        for (_, value) in encoded.columns {
            query = bind_column(query, value);
        }
        query
            .bind(encoded.extra)
            .bind(format_timestamp(&record.created_at))
            .bind(format_timestamp(&record.updated_at))
            .bind(record.sync_state.as_str())
            .bind(record.last_synced_at.as_ref().map(format_timestamp))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Caller holds the write lock.
    async fn write_sync_state(
        &self,
        schema: &CollectionSchema,
        id: &str,
        state: SyncState,
        synced_at: Option<DateTime<Utc>>,
    ) -> MirrorResult<bool> {
        let sql = format!(
            "UPDATE {} SET sync_status = ?, last_synced_at = COALESCE(?, last_synced_at) WHERE id = ?",
            quote(&schema.table)
        );
        let result = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(synced_at.as_ref().map(format_timestamp))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl LocalMirror for SqliteMirror {
    fn upsert<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        record: &'a Record,
    ) -> BoxFuture<'a, MirrorResult<()>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;
            let _guard = self.write_lock.lock().await;
            self.write(schema, record).await
        })
    }

    fn get<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
    ) -> BoxFuture<'a, MirrorResult<Option<Record>>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;
            self.fetch(schema, id).await
        })
    }

    fn merge<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
        patch: &'a Document,
        updated_at: DateTime<Utc>,
        state: SyncState,
    ) -> BoxFuture<'a, MirrorResult<Option<Record>>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;
            let _guard = self.write_lock.lock().await;

            let Some(mut record) = self.fetch(schema, id).await? else {
                return Ok(None);
            };
            record.apply_patch(patch, updated_at);
            record.sync_state = state;
            self.write(schema, &record).await?;
            Ok(Some(record))
        })
    }

    fn delete<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
    ) -> BoxFuture<'a, MirrorResult<bool>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;
            let _guard = self.write_lock.lock().await;

            let sql = format!("DELETE FROM {} WHERE id = ?", quote(&schema.table));
            let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, MirrorResult<Vec<Record>>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;

            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT * FROM {} WHERE 1 = 1",
                quote(&schema.table)
            ));
            for filter in filters {
                push_filter(&mut qb, schema, filter)?;
            }
            qb.push(" ORDER BY created_at, id");

            let rows = qb.build().fetch_all(&self.pool).await?;
            rows.iter().map(|row| row_to_record(schema, row)).collect()
        })
    }

    fn set_sync_state<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
        state: SyncState,
        synced_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, MirrorResult<bool>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;
            let _guard = self.write_lock.lock().await;
            self.write_sync_state(schema, id, state, synced_at).await
        })
    }

    fn set_sync_state_if<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
        state: SyncState,
        synced_at: Option<DateTime<Utc>>,
        guard: &'a (dyn Fn() -> bool + Send + Sync),
    ) -> BoxFuture<'a, MirrorResult<bool>> {
        Box::pin(async move {
            self.ensure_table(schema).await?;
            let _guard = self.write_lock.lock().await;
            if !guard() {
                return Ok(false);
            }
            self.write_sync_state(schema, id, state, synced_at).await
        })
    }
}

/// Only ever called with validated identifiers.
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn bind_column<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: ColumnValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        ColumnValue::Null => query.bind(None::<String>),
        ColumnValue::Text(s) => query.bind(s),
        ColumnValue::Integer(i) => query.bind(i),
        ColumnValue::Real(f) => query.bind(f),
    }
}

/// The SQL expression a filter field reads from.
fn filter_target(schema: &CollectionSchema, field: &str) -> MirrorResult<String> {
    check_identifier(field)?;
    Ok(match field {
        "id" => quote("id"),
        "createdAt" => quote("created_at"),
        "updatedAt" => quote("updated_at"),
        "syncState" => quote("sync_status"),
        "lastSyncedAt" => quote("last_synced_at"),
        _ if schema.field_def(field).is_some() => quote(field),
        _ => format!("json_extract(extra, '$.{}')", field),
    })
}

fn filter_value(schema: &CollectionSchema, filter: &Filter) -> MirrorResult<ColumnValue> {
    if let Some(def) = schema.field_def(&filter.field) {
        // Already normalized when it parses; bare dates stay usable as bounds.
        if let (FieldKind::Timestamp, Value::String(s)) = (def.kind, &filter.value) {
            return Ok(ColumnValue::Text(s.clone()));
        }
        return Ok(def.kind.encode(&def.name, &filter.value)?);
    }

    Ok(match &filter.value {
        Value::Null => ColumnValue::Null,
        Value::Bool(b) => ColumnValue::Integer(i64::from(*b)),
        Value::String(s) => ColumnValue::Text(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ColumnValue::Integer(i),
            None => ColumnValue::Real(n.as_f64().unwrap_or_default()),
        },
        other => {
            return Err(CodecError::TypeMismatch {
                field: filter.field.clone(),
                expected: "a scalar",
                found: other.to_string(),
            }
            .into())
        }
    })
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: ColumnValue) {
    match value {
        ColumnValue::Null => qb.push_bind(None::<String>),
        ColumnValue::Text(s) => qb.push_bind(s),
        ColumnValue::Integer(i) => qb.push_bind(i),
        ColumnValue::Real(f) => qb.push_bind(f),
    };
}

/// Appends ` AND <predicate>`. Missing values behave like null, matching
/// [`Filter::matches`].
fn push_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    schema: &CollectionSchema,
    filter: &Filter,
) -> MirrorResult<()> {
    let filter = &schema.normalize_filter(filter);
    let target = filter_target(schema, &filter.field)?;
    qb.push(" AND ");

    match (filter.op, filter.value.is_null()) {
        (FilterOp::Eq, true) => {
            qb.push(&target).push(" IS NULL");
        }
        (FilterOp::Ne, true) => {
            qb.push(&target).push(" IS NOT NULL");
        }
        (FilterOp::Ne, false) => {
            qb.push("(")
                .push(&target)
                .push(" IS NULL OR ")
                .push(&target)
                .push(" != ");
            push_value(qb, filter_value(schema, filter)?);
            qb.push(")");
        }
        (op, _) => {
            qb.push(&target).push(" ").push(op.symbol()).push(" ");
            push_value(qb, filter_value(schema, filter)?);
        }
    }
    Ok(())
}

fn row_to_record(schema: &CollectionSchema, row: &SqliteRow) -> MirrorResult<Record> {
    let id: String = row.try_get("id")?;

    let mut columns = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let name = field.name.as_str();
        let raw = match field.kind {
            FieldKind::Integer | FieldKind::Boolean => row
                .try_get::<Option<i64>, _>(name)?
                .map(ColumnValue::Integer),
            FieldKind::Real => row.try_get::<Option<f64>, _>(name)?.map(ColumnValue::Real),
            FieldKind::Text | FieldKind::Json | FieldKind::Timestamp => row
                .try_get::<Option<String>, _>(name)?
                .map(ColumnValue::Text),
        };
        columns.push((field.name.clone(), raw.unwrap_or(ColumnValue::Null)));
    }

    let extra: String = row.try_get("extra")?;
    let fields = schema.decode(columns, &extra)?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let sync_status: String = row.try_get("sync_status")?;
    let last_synced_at: Option<String> = row.try_get("last_synced_at")?;

    Ok(Record {
        id,
        fields,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        sync_state: sync_status
            .parse::<SyncState>()
            .map_err(CodecError::InvalidRecord)?,
        last_synced_at: last_synced_at
            .map(|s| parse_timestamp("last_synced_at", &s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteMirror) {
        let dir = TempDir::new().unwrap();
        let mirror = SqliteMirror::open(&dir.path().join("mirror.db"))
            .await
            .unwrap();
        (dir, mirror)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 8, minute, 0).unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new("workoutLogs")
            .with_table("workout_logs")
            .field("name", FieldKind::Text)
            .field("durationMinutes", FieldKind::Integer)
            .field("exercises", FieldKind::Json)
            .field("completed", FieldKind::Boolean)
    }

    #[tokio::test]
    async fn test_init_db_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("fitsync.db");
        init_db(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_upsert_and_get_round_trip() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        let record = Record::new(
            "w1",
            doc(json!({
                "name": "Leg Day",
                "durationMinutes": 45,
                "exercises": [{"name": "Squat", "sets": 5}],
                "completed": true,
                "mood": "strong"
            })),
            at(0),
        );

        mirror.upsert(&schema, &record).await.unwrap();
        let stored = mirror.get(&schema, "w1").await.unwrap().unwrap();
        assert_eq!(stored, record);

        assert!(mirror.get(&schema, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        let mut record = Record::new("w1", doc(json!({"name": "Run", "mood": "ok"})), at(0));
        mirror.upsert(&schema, &record).await.unwrap();

        record.fields = doc(json!({"name": "Long Run"}));
        record.mark_synced(at(5));
        mirror.upsert(&schema, &record).await.unwrap();

        let stored = mirror.get(&schema, "w1").await.unwrap().unwrap();
        assert_eq!(stored.fields, doc(json!({"name": "Long Run"})));
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert_eq!(stored.last_synced_at, Some(at(5)));
    }

    #[tokio::test]
    async fn test_merge_patches_fields_and_state() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        let mut record = Record::new("w1", doc(json!({"name": "Run", "durationMinutes": 20})), at(0));
        record.mark_synced(at(1));
        mirror.upsert(&schema, &record).await.unwrap();

        let merged = mirror
            .merge(
                &schema,
                "w1",
                &doc(json!({"durationMinutes": 30, "notes": "windy"})),
                at(10),
                SyncState::Pending,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.fields["durationMinutes"], json!(30));
        assert_eq!(merged.fields["name"], json!("Run"));
        assert_eq!(merged.fields["notes"], json!("windy"));
        assert_eq!(merged.updated_at, at(10));
        assert_eq!(merged.sync_state, SyncState::Pending);
        assert_eq!(mirror.get(&schema, "w1").await.unwrap().unwrap(), merged);

        let missing = mirror
            .merge(&schema, "nope", &doc(json!({})), at(10), SyncState::Pending)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        mirror
            .upsert(&schema, &Record::new("w1", Document::new(), at(0)))
            .await
            .unwrap();

        assert!(mirror.delete(&schema, "w1").await.unwrap());
        assert!(!mirror.delete(&schema, "w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_declared_and_extra_fields() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        let rows = [
            ("w1", json!({"name": "Run", "durationMinutes": 20, "place": "park"})),
            ("w2", json!({"name": "Swim", "durationMinutes": 40, "place": "pool"})),
            ("w3", json!({"name": "Lift", "durationMinutes": 60})),
        ];
        for (i, (id, fields)) in rows.into_iter().enumerate() {
            let record = Record::new(id, doc(fields), at(i as u32));
            mirror.upsert(&schema, &record).await.unwrap();
        }

        let ids = |records: Vec<Record>| records.into_iter().map(|r| r.id).collect::<Vec<_>>();

        let all = mirror.list(&schema, &[]).await.unwrap();
        assert_eq!(ids(all), vec!["w1", "w2", "w3"]);

        let long = mirror
            .list(&schema, &[Filter::new("durationMinutes", FilterOp::Gte, 40)])
            .await
            .unwrap();
        assert_eq!(ids(long), vec!["w2", "w3"]);

        let pool = mirror
            .list(&schema, &[Filter::eq("place", "pool")])
            .await
            .unwrap();
        assert_eq!(ids(pool), vec!["w2"]);

        let not_park = mirror
            .list(&schema, &[Filter::new("place", FilterOp::Ne, "park")])
            .await
            .unwrap();
        assert_eq!(ids(not_park), vec!["w2", "w3"]);

        let no_place = mirror
            .list(&schema, &[Filter::eq("place", Value::Null)])
            .await
            .unwrap();
        assert_eq!(ids(no_place), vec!["w3"]);
    }

    #[tokio::test]
    async fn test_list_agrees_with_in_memory_filters() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        let docs = [
            json!({"name": "A", "durationMinutes": 10, "completed": true, "rpe": 7}),
            json!({"name": "B", "durationMinutes": 30, "completed": false, "rpe": 9}),
            json!({"name": "C", "completed": true}),
        ];
        let mut records = Vec::new();
        for (i, fields) in docs.into_iter().enumerate() {
            let record = Record::new(format!("w{i}"), doc(fields), at(i as u32));
            mirror.upsert(&schema, &record).await.unwrap();
            records.push(record);
        }

        let cases = vec![
            vec![Filter::eq("completed", true)],
            vec![Filter::new("durationMinutes", FilterOp::Lt, 30)],
            vec![Filter::new("rpe", FilterOp::Gt, 7)],
            vec![Filter::new("rpe", FilterOp::Ne, 7)],
            vec![Filter::new("name", FilterOp::Lte, "B"), Filter::eq("completed", true)],
        ];
        for filters in cases {
            let from_sql: Vec<String> = mirror
                .list(&schema, &filters)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();
            let in_memory: Vec<String> = records
                .iter()
                .filter(|r| crate::filter::matches_all(&filters, &r.fields))
                .map(|r| r.id.clone())
                .collect();
            assert_eq!(from_sql, in_memory, "filters: {filters:?}");
        }
    }

    #[tokio::test]
    async fn test_set_sync_state() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        mirror
            .upsert(&schema, &Record::new("w1", Document::new(), at(0)))
            .await
            .unwrap();

        assert!(mirror
            .set_sync_state(&schema, "w1", SyncState::Synced, Some(at(3)))
            .await
            .unwrap());
        assert!(mirror
            .set_sync_state(&schema, "w1", SyncState::Error, None)
            .await
            .unwrap());

        let stored = mirror.get(&schema, "w1").await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Error);
        assert_eq!(stored.last_synced_at, Some(at(3)));

        assert!(!mirror
            .set_sync_state(&schema, "nope", SyncState::Synced, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_set_sync_state_if_checks_guard_under_lock() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        mirror
            .upsert(&schema, &Record::new("w1", Document::new(), at(0)))
            .await
            .unwrap();

        let held = || false;
        assert!(!mirror
            .set_sync_state_if(&schema, "w1", SyncState::Synced, Some(at(2)), &held)
            .await
            .unwrap());
        let stored = mirror.get(&schema, "w1").await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Pending);
        assert_eq!(stored.last_synced_at, None);

        let clear = || true;
        assert!(mirror
            .set_sync_state_if(&schema, "w1", SyncState::Synced, Some(at(2)), &clear)
            .await
            .unwrap());
        let stored = mirror.get(&schema, "w1").await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert_eq!(stored.last_synced_at, Some(at(2)));
    }

    #[tokio::test]
    async fn test_list_filters_on_last_synced_at() {
        let (_dir, mirror) = setup().await;
        let schema = schema();
        for (i, id) in ["w1", "w2", "w3"].into_iter().enumerate() {
            mirror
                .upsert(&schema, &Record::new(id, Document::new(), at(i as u32)))
                .await
                .unwrap();
        }
        mirror
            .set_sync_state(&schema, "w1", SyncState::Synced, Some(at(5)))
            .await
            .unwrap();
        mirror
            .set_sync_state(&schema, "w2", SyncState::Synced, Some(at(9)))
            .await
            .unwrap();

        let ids = |records: Vec<Record>| records.into_iter().map(|r| r.id).collect::<Vec<_>>();

        let recent = mirror
            .list(
                &schema,
                &[Filter::new("lastSyncedAt", FilterOp::Gte, "2025-01-15T08:06:00Z")],
            )
            .await
            .unwrap();
        assert_eq!(ids(recent), vec!["w2"]);

        let never = mirror
            .list(&schema, &[Filter::eq("lastSyncedAt", Value::Null)])
            .await
            .unwrap();
        assert_eq!(ids(never), vec!["w3"]);
    }

    #[tokio::test]
    async fn test_timestamp_filters_match_any_offset() {
        let (_dir, mirror) = setup().await;
        let schema = CollectionSchema::new("attendance")
            .field("memberId", FieldKind::Text)
            .field("checkedInAt", FieldKind::Timestamp);
        let record = Record::new(
            "a1",
            doc(json!({"memberId": "m1", "checkedInAt": "2025-01-15T18:30:00Z"})),
            at(0),
        );
        mirror.upsert(&schema, &record).await.unwrap();

        for value in [
            "2025-01-15T18:30:00Z",
            "2025-01-15T18:30:00.000Z",
            "2025-01-15T20:30:00+02:00",
        ] {
            let found = mirror
                .list(&schema, &[Filter::eq("checkedInAt", value)])
                .await
                .unwrap();
            assert_eq!(found.len(), 1, "value: {value}");
        }

        let by_day = mirror
            .list(
                &schema,
                &[
                    Filter::new("checkedInAt", FilterOp::Gte, "2025-01-15"),
                    Filter::new("checkedInAt", FilterOp::Lt, "2025-01-16"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(by_day.len(), 1);

        let created = mirror
            .list(&schema, &[Filter::eq("createdAt", "2025-01-15T08:00:00Z")])
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn test_new_declared_column_is_added() {
        let dir = TempDir::new().unwrap();
        let pool = init_db(&dir.path().join("mirror.db")).await.unwrap();

        let v1 = CollectionSchema::new("attendance").field("memberId", FieldKind::Text);
        let old = SqliteMirror::new(pool.clone());
        let record = Record::new("a1", doc(json!({"memberId": "m1", "classType": "yoga"})), at(0));
        old.upsert(&v1, &record).await.unwrap();

        let v2 = v1.clone().field("classType", FieldKind::Text);
        let new = SqliteMirror::new(pool);
        let stored = new.get(&v2, "a1").await.unwrap().unwrap();
        assert_eq!(stored.fields["classType"], json!("yoga"));

        let yoga = new
            .list(&v2, &[Filter::eq("memberId", "m1")])
            .await
            .unwrap();
        assert_eq!(yoga.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_identifiers() {
        let (_dir, mirror) = setup().await;
        let bad = CollectionSchema::new("logs\"; DROP TABLE x; --");
        assert!(matches!(
            mirror.get(&bad, "1").await,
            Err(MirrorError::Codec(CodecError::InvalidIdentifier(_)))
        ));

        let schema = schema();
        let result = mirror
            .list(&schema, &[Filter::eq("name' OR 1=1 --", "x")])
            .await;
        assert!(matches!(
            result,
            Err(MirrorError::Codec(CodecError::InvalidIdentifier(_)))
        ));
    }
}
