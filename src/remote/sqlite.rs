// SQLite stand-in for the hosted backend
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use url::Url;

use super::{
    ChangeKind, Direction, Filter, Query, RemoteDataService, RemoteError, Row, RowChange,
    RowSubscription,
};
use crate::db::DbPool;
use crate::models::UserId;

const TABLES: &[&str] = &[
    "profiles",
    "posts",
    "post_images",
    "categories",
    "tags",
    "post_categories",
    "post_tags",
    "likes",
    "dislikes",
    "comments",
    "followers",
];

const CHANGE_CAPACITY: usize = 256;

pub struct SqliteDataService {
    pool: DbPool,
    columns: HashMap<String, Vec<String>>,
    storage_root: PathBuf,
    public_base: Url,
    session: RwLock<Option<UserId>>,
    changes: broadcast::Sender<RowChange>,
}

impl SqliteDataService {
    /// Wrap a migrated pool. Objects are written under `storage_root` and
    /// served from `public_url`.
    pub fn new(
        pool: DbPool,
        storage_root: impl Into<PathBuf>,
        public_url: &str,
    ) -> Result<Self, RemoteError> {
        let conn = pool.get()?;
        let columns = load_columns(&conn)?;
        drop(conn);

        let mut base = public_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let public_base = Url::parse(&base).map_err(|e| {
            RemoteError::InvalidArgument(format!("public url {}: {}", public_url, e))
        })?;

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);

        Ok(Self {
            pool,
            columns,
            storage_root: storage_root.into(),
            public_base,
            session: RwLock::new(None),
            changes,
        })
    }

    pub async fn sign_in(&self, user_id: UserId) {
        tracing::info!("Signed in as {}", user_id);
        *self.session.write().await = Some(user_id);
    }

    pub async fn sign_out(&self) {
        tracing::info!("Signed out");
        *self.session.write().await = None;
    }

    fn check_table(&self, table: &str) -> Result<&[String], RemoteError> {
        self.columns
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| RemoteError::UnknownTable(table.to_string()))
    }

    fn check_column(&self, table: &str, column: &str) -> Result<(), RemoteError> {
        if self.check_table(table)?.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(RemoteError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
    }

    fn where_clause(
        &self,
        table: &str,
        filters: &[Filter],
        params: &mut Vec<SqlValue>,
    ) -> Result<String, RemoteError> {
        let mut parts = Vec::with_capacity(filters.len());
        for filter in filters {
            self.check_column(table, filter.column())?;
            match filter {
                Filter::Eq(column, Value::Null) => parts.push(format!("\"{}\" IS NULL", column)),
                Filter::Eq(column, value) => {
                    parts.push(format!("\"{}\" = ?", column));
                    params.push(sql_value(value));
                }
                Filter::In(_, values) if values.is_empty() => parts.push("0".to_string()),
                Filter::In(column, values) => {
                    let marks = vec!["?"; values.len()].join(", ");
                    parts.push(format!("\"{}\" IN ({})", column, marks));
                    params.extend(values.iter().map(sql_value));
                }
            }
        }
        Ok(parts.join(" AND "))
    }

    fn publish(&self, table: &str, kind: ChangeKind, rows: &[Row]) {
        for row in rows {
            // No receivers is fine
            let _ = self.changes.send(RowChange {
                table: table.to_string(),
                kind,
                row: row.clone(),
            });
        }
    }

    fn run_select(&self, table: &str, query: &Query) -> Result<Vec<Row>, RemoteError> {
        self.check_table(table)?;
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM \"{}\"", table);

        let clause = self.where_clause(table, &query.filters, &mut params)?;
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !query.order.is_empty() {
            let mut terms = Vec::with_capacity(query.order.len());
            for order in &query.order {
                self.check_column(table, &order.column)?;
                let direction = match order.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                terms.push(format!("\"{}\" {}", order.column, direction));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.pool.get()?;
        query_rows(&conn, &sql, params)
    }

    fn run_insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError> {
        self.check_table(table)?;
        for row in &rows {
            for column in row.keys() {
                self.check_column(table, column)?;
            }
        }

        let mut conn = self.pool.get()?;
        // Bulk inserts are all-or-nothing
        let tx = conn.transaction()?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in &rows {
            let sql = if row.is_empty() {
                format!("INSERT INTO \"{}\" DEFAULT VALUES RETURNING *", table)
            } else {
                let columns: Vec<String> = row.keys().map(|c| format!("\"{}\"", c)).collect();
                let marks = vec!["?"; row.len()].join(", ");
                format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *",
                    table,
                    columns.join(", "),
                    marks
                )
            };
            let params = row.values().map(sql_value).collect();
            stored.extend(query_rows(&tx, &sql, params)?);
        }
        tx.commit()?;

        self.publish(table, ChangeKind::Insert, &stored);
        Ok(stored)
    }

    fn run_update(
        &self,
        table: &str,
        changes: Row,
        filters: Vec<Filter>,
    ) -> Result<Vec<Row>, RemoteError> {
        self.check_table(table)?;
        if filters.is_empty() {
            return Err(RemoteError::MissingFilter("update"));
        }
        if changes.is_empty() {
            return Err(RemoteError::InvalidArgument("update without changes".into()));
        }

        let mut params = Vec::with_capacity(changes.len() + filters.len());
        let mut assignments = Vec::with_capacity(changes.len());
        for (column, value) in &changes {
            self.check_column(table, column)?;
            assignments.push(format!("\"{}\" = ?", column));
            params.push(sql_value(value));
        }
        let clause = self.where_clause(table, &filters, &mut params)?;
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE {} RETURNING *",
            table,
            assignments.join(", "),
            clause
        );

        let conn = self.pool.get()?;
        let rows = query_rows(&conn, &sql, params)?;
        self.publish(table, ChangeKind::Update, &rows);
        Ok(rows)
    }

    fn run_delete(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError> {
        self.check_table(table)?;
        if filters.is_empty() {
            return Err(RemoteError::MissingFilter("delete"));
        }

        let mut params = Vec::new();
        let clause = self.where_clause(table, &filters, &mut params)?;
        let sql = format!("DELETE FROM \"{}\" WHERE {} RETURNING *", table, clause);

        let conn = self.pool.get()?;
        let rows = query_rows(&conn, &sql, params)?;
        self.publish(table, ChangeKind::Delete, &rows);
        Ok(rows.len() as u64)
    }

    fn run_count(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError> {
        self.check_table(table)?;
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM \"{}\"", table);
        let clause = self.where_clause(table, &filters, &mut params)?;
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn increment_view_count(&self, args: &Value) -> Result<Value, RemoteError> {
        let slug = args
            .get("post_slug")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::InvalidArgument("post_slug is required".into()))?;

        let conn = self.pool.get()?;
        let rows = query_rows(
            &conn,
            "UPDATE posts SET views_count = views_count + 1 WHERE slug = ?1 RETURNING *",
            vec![SqlValue::Text(slug.to_string())],
        )?;
        self.publish("posts", ChangeKind::Update, &rows);
        Ok(Value::Null)
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, RemoteError> {
        check_bucket(bucket)?;
        check_object_path(path)?;
        Ok(self.storage_root.join(bucket).join(path))
    }
}

#[async_trait]
impl RemoteDataService for SqliteDataService {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, RemoteError> {
        self.run_select(table, query)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError> {
        self.run_insert(table, rows)
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        filters: Vec<Filter>,
    ) -> Result<Vec<Row>, RemoteError> {
        self.run_update(table, changes, filters)
    }

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError> {
        self.run_delete(table, filters)
    }

    async fn count(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError> {
        self.run_count(table, filters)
    }

    async fn current_user(&self) -> Result<Option<UserId>, RemoteError> {
        Ok(self.session.read().await.clone())
    }

    fn subscribe_row(&self, table: &str, id: Value) -> Result<RowSubscription, RemoteError> {
        self.check_table(table)?;
        Ok(RowSubscription::new(table, id, self.changes.subscribe()))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, RemoteError> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;
        tracing::debug!(
            "Stored {} bytes ({}) at {}/{}",
            data.len(),
            content_type,
            bucket,
            path
        );
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<String, RemoteError> {
        check_bucket(bucket)?;
        check_object_path(path)?;
        self.public_base
            .join(&format!("{}/{}", bucket, path))
            .map(String::from)
            .map_err(|e| RemoteError::InvalidArgument(format!("object path {}: {}", path, e)))
    }

    async fn rpc(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        match name {
            "increment_view_count" => self.increment_view_count(&args),
            other => Err(RemoteError::UnknownProcedure(other.to_string())),
        }
    }
}

fn load_columns(conn: &Connection) -> Result<HashMap<String, Vec<String>>, RemoteError> {
    let mut columns = HashMap::new();
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    for table in TABLES {
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if names.is_empty() {
            return Err(RemoteError::UnknownTable(table.to_string()));
        }
        columns.insert(table.to_string(), names);
    }
    Ok(columns)
}

fn query_rows(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>, RemoteError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let mut out = Row::new();
            for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), json_value(row.get_ref(i)?));
            }
            Ok(out)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

fn check_bucket(bucket: &str) -> Result<(), RemoteError> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::InvalidArgument(format!("bucket {}", bucket)))
    }
}

fn check_object_path(path: &str) -> Result<(), RemoteError> {
    let relative = Path::new(path);
    let valid = !path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(RemoteError::InvalidArgument(format!("object path {}", path)))
    }
}
