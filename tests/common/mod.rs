#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use agora::config::Config;
use agora::db;
use agora::models::UserId;
use agora::remote::{
    DynRemote, Filter, Query, RemoteDataService, RemoteError, Row, RowSubscription,
    SqliteDataService,
};
use agora::session::Session;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
    Count,
    Upload,
    Rpc,
}

/// Wraps the SQLite service, failing chosen (operation, table) pairs and
/// counting every call that reaches it.
pub struct FlakyService {
    inner: Arc<SqliteDataService>,
    failing: Mutex<HashSet<(Op, String)>>,
    calls: Mutex<HashMap<(Op, String), usize>>,
    writes: Arc<RwLock<()>>,
}

impl FlakyService {
    pub fn new(inner: Arc<SqliteDataService>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
            writes: Arc::new(RwLock::new(())),
        }
    }

    pub fn fail(&self, op: Op, table: &str) {
        self.failing.lock().unwrap().insert((op, table.to_string()));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn calls(&self, op: Op, table: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(op, table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Block inserts and deletes until the guard is dropped.
    pub async fn hold_writes(&self) -> tokio::sync::OwnedRwLockWriteGuard<()> {
        self.writes.clone().write_owned().await
    }

    fn enter(&self, op: Op, table: &str) -> Result<(), RemoteError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((op, table.to_string()))
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(&(op, table.to_string())) {
            return Err(RemoteError::Unavailable(format!("{:?} on {}", op, table)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDataService for FlakyService {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, RemoteError> {
        self.enter(Op::Select, table)?;
        self.inner.select(table, query).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError> {
        let _held = self.writes.read().await;
        self.enter(Op::Insert, table)?;
        self.inner.insert(table, rows).await
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        filters: Vec<Filter>,
    ) -> Result<Vec<Row>, RemoteError> {
        self.enter(Op::Update, table)?;
        self.inner.update(table, changes, filters).await
    }

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError> {
        let _held = self.writes.read().await;
        self.enter(Op::Delete, table)?;
        self.inner.delete(table, filters).await
    }

    async fn count(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError> {
        self.enter(Op::Count, table)?;
        self.inner.count(table, filters).await
    }

    async fn current_user(&self) -> Result<Option<UserId>, RemoteError> {
        self.inner.current_user().await
    }

    fn subscribe_row(&self, table: &str, id: Value) -> Result<RowSubscription, RemoteError> {
        self.inner.subscribe_row(table, id)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, RemoteError> {
        self.enter(Op::Upload, bucket)?;
        self.inner.upload(bucket, path, data, content_type).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<String, RemoteError> {
        self.inner.public_url(bucket, path)
    }

    async fn rpc(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        self.enter(Op::Rpc, name)?;
        self.inner.rpc(name, args).await
    }
}

/// A migrated database in a temp dir, the SQLite service over it and a
/// failure-injecting wrapper in front.
pub struct Harness {
    pub temp_dir: TempDir,
    pub service: Arc<SqliteDataService>,
    pub flaky: Arc<FlakyService>,
}

impl Harness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db"))
            .expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");
        let service = Arc::new(
            SqliteDataService::new(
                pool,
                temp_dir.path().join("uploads"),
                "http://localhost:8000/storage/",
            )
            .unwrap(),
        );
        let flaky = Arc::new(FlakyService::new(service.clone()));
        Self {
            temp_dir,
            service,
            flaky,
        }
    }

    pub fn remote(&self) -> DynRemote {
        self.flaky.clone()
    }

    pub fn session(&self) -> Session {
        self.session_with(&Config::default())
    }

    pub fn session_with(&self, config: &Config) -> Session {
        Session::new(self.remote(), config)
    }

    /// Sign the user in on the backend and start the session for them.
    pub async fn sign_in(&self, session: &Session, user: &str) {
        self.service.sign_in(UserId::new(user)).await;
        session.sign_in(UserId::new(user)).await.unwrap();
    }

    pub async fn profile(&self, id: &str, name: &str) {
        self.service
            .insert(
                "profiles",
                vec![row(json!({ "id": id, "name": name, "slug": id }))],
            )
            .await
            .unwrap();
    }

    pub async fn post(&self, author: &str, slug: &str) -> i64 {
        let rows = self
            .service
            .insert(
                "posts",
                vec![row(json!({
                    "user_id": author,
                    "title": slug,
                    "content": format!("Body of {}", slug),
                    "description": format!("About {}", slug),
                    "slug": slug,
                }))],
            )
            .await
            .unwrap();
        rows[0]["id"].as_i64().unwrap()
    }

    /// Overwrite a post's counters directly on the backend.
    pub async fn set_counters(&self, post_id: i64, likes: i64, dislikes: i64, comments: i64) {
        self.service
            .update(
                "posts",
                row(json!({
                    "likes_count": likes,
                    "dislikes_count": dislikes,
                    "comments_count": comments,
                })),
                vec![Filter::eq("id", post_id)],
            )
            .await
            .unwrap();
    }

    pub async fn react(&self, table: &str, user: &str, post_id: i64) {
        self.service
            .insert(table, vec![row(json!({ "user_id": user, "post_id": post_id }))])
            .await
            .unwrap();
    }

    pub async fn comment(&self, user: &str, post_id: i64, content: &str) -> i64 {
        let rows = self
            .service
            .insert(
                "comments",
                vec![row(json!({ "user_id": user, "post_id": post_id, "content": content }))],
            )
            .await
            .unwrap();
        rows[0]["id"].as_i64().unwrap()
    }

    pub async fn remote_rows(&self, table: &str, query: Query) -> Vec<Row> {
        self.service.select(table, &query).await.unwrap()
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}
