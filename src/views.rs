use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use crate::models::PostId;
use crate::posts::PostStore;
use crate::remote::{int_field, DynRemote, Query};

/// Post view counting. Increments happen server-side by slug.
pub struct ViewStore {
    remote: DynRemote,
    posts: Arc<PostStore>,
    counts: RwLock<HashMap<PostId, i64>>,
}

impl ViewStore {
    pub fn new(remote: DynRemote, posts: Arc<PostStore>) -> Self {
        Self {
            remote,
            posts,
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Count a view of the post. Failures are logged only.
    pub async fn increment_view(&self, slug: &str) {
        if let Err(e) = self
            .remote
            .rpc("increment_view_count", json!({ "post_slug": slug }))
            .await
        {
            tracing::error!("Error incrementing view count for {}: {}", slug, e);
            return;
        }

        if let Some(post) = self.posts.get_post_by_slug(slug).await {
            self.posts.increment_post_view(post.id).await;
            if let Some(count) = self.counts.write().await.get_mut(&post.id) {
                *count += 1;
            }
        }
    }

    /// Read the current count from the backend, caching it. 0 on error.
    pub async fn fetch_views_count(&self, post_id: PostId) -> i64 {
        let query = Query::new().eq("id", post_id).limit(1);
        let rows = match self.remote.select("posts", &query).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Error fetching views count for post {}: {}", post_id, e);
                return 0;
            }
        };

        match rows.first().and_then(|row| int_field(row, "views_count")) {
            Some(count) => {
                self.counts.write().await.insert(post_id, count);
                count
            }
            None => 0,
        }
    }

    pub async fn get_views_count(&self, post_id: PostId) -> i64 {
        self.counts
            .read()
            .await
            .get(&post_id)
            .copied()
            .unwrap_or(0)
    }
}
