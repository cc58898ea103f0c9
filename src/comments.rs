use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::loading::Loading;
use crate::models::{timestamp, Comment, CommentId, PostId, ProfileSummary, UserId};
use crate::posts::PostStore;
use crate::remote::{from_row, Direction, DynRemote, Filter, Query, Row};

/// Comments of the post currently open, kept in step with the post's
/// comment counter.
pub struct CommentStore {
    remote: DynRemote,
    posts: Arc<PostStore>,
    comments: RwLock<Vec<Comment>>,
    loading: Loading,
}

impl CommentStore {
    pub fn new(remote: DynRemote, posts: Arc<PostStore>) -> Self {
        Self {
            remote,
            posts,
            comments: RwLock::new(Vec::new()),
            loading: Loading::new(),
        }
    }

    pub async fn comments(&self) -> Vec<Comment> {
        self.comments.read().await.clone()
    }

    pub fn loading(&self) -> bool {
        self.loading.is_loading()
    }

    /// Replace the local list with the post's comments, oldest first.
    pub async fn fetch_comments(&self, post_id: PostId) {
        let _loading = self.loading.start();

        let query = Query::new()
            .eq("post_id", post_id)
            .order_by("created_at", Direction::Asc)
            .order_by("id", Direction::Asc);
        match self.load(&query).await {
            Ok(comments) => {
                tracing::debug!("Fetched {} comments for post {}", comments.len(), post_id);
                *self.comments.write().await = comments;
            }
            Err(e) => tracing::error!("Error fetching comments: {}", e),
        }
    }

    pub async fn add_comment(
        &self,
        post_id: PostId,
        content: &str,
        parent_comment_id: Option<CommentId>,
    ) -> AppResult<Comment> {
        let result = {
            let _loading = self.loading.start();
            self.insert(post_id, content, parent_comment_id).await
        };

        let comment = result.map_err(|e| {
            tracing::error!("Error adding comment: {}", e);
            e
        })?;

        self.comments.write().await.push(comment.clone());
        if let Some(counters) = self.posts.counters(post_id).await {
            self.posts
                .update_post_comments_count(post_id, counters.comments + 1)
                .await;
        }
        Ok(comment)
    }

    /// Change a comment's text. Only the author's rows match on the backend.
    pub async fn update_comment(
        &self,
        comment_id: CommentId,
        new_content: &str,
    ) -> AppResult<Comment> {
        let result = {
            let _loading = self.loading.start();
            self.edit(comment_id, new_content).await
        };

        let comment = result.map_err(|e| {
            tracing::error!("Error updating comment {}: {}", comment_id, e);
            e
        })?;

        let mut comments = self.comments.write().await;
        if let Some(existing) = comments.iter_mut().find(|c| c.id == comment.id) {
            *existing = comment.clone();
        }
        Ok(comment)
    }

    /// Delete a comment held in the local list.
    pub async fn delete_comment(&self, comment_id: CommentId) -> AppResult<()> {
        let user_id = self.session_user().await?;

        let post_id = self
            .comments
            .read()
            .await
            .iter()
            .find(|c| c.id == comment_id)
            .map(|c| c.post_id)
            .ok_or_else(|| AppError::NotFound(format!("comment {}", comment_id)))?;

        let result = {
            let _loading = self.loading.start();
            self.remote
                .delete(
                    "comments",
                    vec![
                        Filter::eq("id", comment_id),
                        Filter::eq("user_id", user_id.as_str()),
                    ],
                )
                .await
        };

        let removed = result.map_err(|e| {
            tracing::error!("Error deleting comment {}: {}", comment_id, e);
            e
        })?;
        if removed == 0 {
            tracing::warn!("Comment {} not deleted, not owned by {}", comment_id, user_id);
            return Err(AppError::NotFound(format!("comment {}", comment_id)));
        }

        self.comments.write().await.retain(|c| c.id != comment_id);
        if let Some(counters) = self.posts.counters(post_id).await {
            self.posts
                .update_post_comments_count(post_id, counters.comments - 1)
                .await;
        }
        Ok(())
    }

    pub async fn clear(&self) {
        self.comments.write().await.clear();
    }

    async fn session_user(&self) -> AppResult<UserId> {
        self.remote
            .current_user()
            .await?
            .ok_or(AppError::AuthRequired)
    }

    async fn insert(
        &self,
        post_id: PostId,
        content: &str,
        parent_comment_id: Option<CommentId>,
    ) -> AppResult<Comment> {
        let user_id = self.session_user().await?;

        let mut row = Row::new();
        row.insert("post_id".into(), Value::from(post_id));
        row.insert("user_id".into(), Value::from(user_id.as_str()));
        row.insert("content".into(), Value::from(content));
        row.insert("parent_comment_id".into(), Value::from(parent_comment_id));

        let rows = self.remote.insert("comments", vec![row]).await?;
        self.with_authors(rows)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("no row returned after comment creation".into()))
    }

    async fn edit(&self, comment_id: CommentId, new_content: &str) -> AppResult<Comment> {
        let user_id = self.session_user().await?;

        let mut changes = Row::new();
        changes.insert("content".into(), Value::from(new_content));
        changes.insert("updated_at".into(), Value::String(timestamp()));

        let updated = self
            .remote
            .update(
                "comments",
                changes,
                vec![
                    Filter::eq("id", comment_id),
                    Filter::eq("user_id", user_id.as_str()),
                ],
            )
            .await?;
        if updated.is_empty() {
            return Err(AppError::NotFound(format!("comment {}", comment_id)));
        }

        // Re-read the row to pick up the author summary
        let query = Query::new().eq("id", comment_id).limit(1);
        self.load(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("comment {}", comment_id)))
    }

    async fn load(&self, query: &Query) -> AppResult<Vec<Comment>> {
        let rows = self.remote.select("comments", query).await?;
        self.with_authors(rows).await
    }

    /// Parse comment rows and embed each author's profile summary.
    async fn with_authors(&self, rows: Vec<Row>) -> AppResult<Vec<Comment>> {
        let mut comments = rows
            .into_iter()
            .map(from_row::<Comment>)
            .collect::<Result<Vec<_>, _>>()?;
        if comments.is_empty() {
            return Ok(comments);
        }

        let mut author_ids: Vec<String> = comments.iter().map(|c| c.user_id.0.clone()).collect();
        author_ids.sort();
        author_ids.dedup();

        let profiles = self
            .remote
            .select("profiles", &Query::new().is_in("id", author_ids))
            .await?;
        let mut authors: HashMap<String, ProfileSummary> = HashMap::new();
        for row in profiles {
            let summary: ProfileSummary = from_row(row)?;
            authors.insert(summary.id.0.clone(), summary);
        }

        for comment in &mut comments {
            comment.profiles = authors.get(comment.user_id.as_str()).cloned();
        }
        Ok(comments)
    }
}
