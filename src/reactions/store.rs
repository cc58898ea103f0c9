use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::RwLock;

use super::domain::{ReactionKind, ReactionSets, ReactionState, ReactionWrite, WriteOp};
use crate::error::{AppError, AppResult};
use crate::models::{PostId, Reaction, UserId};
use crate::posts::PostStore;
use crate::remote::{from_row, DynRemote, Filter, Query, RemoteError, Row};

/// Result of a toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// All writes committed; the pair now sits in this state
    Applied(ReactionState),
    /// Another reaction on the same post is still in flight; nothing changed
    InFlight,
}

#[derive(Debug, Default)]
struct ReactionSession {
    user: Option<UserId>,
    sets: ReactionSets,
}

/// The session user's likes and dislikes, with optimistic toggles that keep
/// the post counters in step.
pub struct ReactionStore {
    remote: DynRemote,
    posts: Arc<PostStore>,
    rollback_on_failure: bool,
    session: RwLock<ReactionSession>,
    in_flight: Arc<Mutex<HashSet<PostId>>>,
}

/// Holds a post's in-flight slot and frees it on drop, so a cancelled
/// toggle does not leave the post blocked.
struct InFlight {
    posts: Arc<Mutex<HashSet<PostId>>>,
    post_id: PostId,
}

impl InFlight {
    fn claim(posts: &Arc<Mutex<HashSet<PostId>>>, post_id: PostId) -> Option<Self> {
        let claimed = lock(posts).insert(post_id);
        claimed.then(|| Self {
            posts: Arc::clone(posts),
            post_id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.posts).remove(&self.post_id);
    }
}

fn lock(posts: &Mutex<HashSet<PostId>>) -> std::sync::MutexGuard<'_, HashSet<PostId>> {
    posts.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReactionStore {
    pub fn new(remote: DynRemote, posts: Arc<PostStore>, rollback_on_failure: bool) -> Self {
        Self {
            remote,
            posts,
            rollback_on_failure,
            session: RwLock::new(ReactionSession::default()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Rebuild both sets from the user's reaction rows.
    pub async fn load_for_user(&self, user_id: UserId) -> AppResult<()> {
        {
            let mut session = self.session.write().await;
            session.user = Some(user_id.clone());
            session.sets.clear();
        }

        let like_query = Query::new().eq("user_id", user_id.as_str());
        let dislike_query = like_query.clone();
        let (likes, dislikes) = futures::try_join!(
            self.remote.select(ReactionKind::Like.table(), &like_query),
            self.remote.select(ReactionKind::Dislike.table(), &dislike_query),
        )
        .map_err(|e| {
            tracing::error!("Error loading reactions for {}: {}", user_id, e);
            e
        })?;

        let mut sets = ReactionSets::new();
        for post_id in reaction_posts(likes)? {
            sets.apply(post_id, ReactionWrite::insert(ReactionKind::Like));
        }
        for post_id in reaction_posts(dislikes)? {
            if !sets.apply(post_id, ReactionWrite::insert(ReactionKind::Dislike)) {
                tracing::warn!(
                    "Post {} is both liked and disliked by {}, keeping the like",
                    post_id,
                    user_id
                );
            }
        }

        let mut session = self.session.write().await;
        // Signed out or switched user while loading
        if session.user.as_ref() != Some(&user_id) {
            return Ok(());
        }
        tracing::info!(
            "Loaded {} likes and {} dislikes for {}",
            sets.likes().len(),
            sets.dislikes().len(),
            user_id
        );
        session.sets = sets;
        Ok(())
    }

    pub async fn clear(&self) {
        let mut session = self.session.write().await;
        session.user = None;
        session.sets.clear();
        lock(&self.in_flight).clear();
    }

    pub async fn user(&self) -> Option<UserId> {
        self.session.read().await.user.clone()
    }

    pub async fn has_liked(&self, post_id: PostId) -> bool {
        self.session
            .read()
            .await
            .sets
            .contains(ReactionKind::Like, post_id)
    }

    pub async fn has_disliked(&self, post_id: PostId) -> bool {
        self.session
            .read()
            .await
            .sets
            .contains(ReactionKind::Dislike, post_id)
    }

    pub async fn state_of(&self, post_id: PostId) -> ReactionState {
        self.session.read().await.sets.state_of(post_id)
    }

    pub async fn liked_posts(&self) -> HashSet<PostId> {
        self.session.read().await.sets.likes().clone()
    }

    pub async fn disliked_posts(&self) -> HashSet<PostId> {
        self.session.read().await.sets.dislikes().clone()
    }

    /// Whether a reaction on this post is waiting on the backend.
    pub async fn is_loading(&self, post_id: PostId) -> bool {
        lock(&self.in_flight).contains(&post_id)
    }

    /// Whether any reaction is waiting on the backend.
    pub async fn loading(&self) -> bool {
        !lock(&self.in_flight).is_empty()
    }

    pub async fn toggle_like(&self, post_id: PostId) -> AppResult<ToggleOutcome> {
        self.toggle(post_id, ReactionKind::Like).await
    }

    pub async fn toggle_dislike(&self, post_id: PostId) -> AppResult<ToggleOutcome> {
        self.toggle(post_id, ReactionKind::Dislike).await
    }

    async fn toggle(&self, post_id: PostId, kind: ReactionKind) -> AppResult<ToggleOutcome> {
        let Some(user_id) = self.user().await else {
            tracing::warn!("User not authenticated, cannot toggle {:?}", kind);
            return Err(AppError::AuthRequired);
        };

        let Some(_slot) = InFlight::claim(&self.in_flight, post_id) else {
            tracing::debug!("Reaction on post {} already in flight", post_id);
            return Ok(ToggleOutcome::InFlight);
        };

        self.run_toggle(&user_id, post_id, kind).await
    }

    async fn run_toggle(
        &self,
        user_id: &UserId,
        post_id: PostId,
        kind: ReactionKind,
    ) -> AppResult<ToggleOutcome> {
        let transition = self.state_of(post_id).await.toggle(kind);

        // Optimistic: local sets and counters move before the backend answers
        for write in &transition.writes {
            self.apply_local(user_id, post_id, *write).await;
        }

        let mut failures: Vec<(ReactionWrite, RemoteError)> = Vec::new();
        for write in &transition.writes {
            if let Err(e) = self.write_remote(user_id, post_id, *write).await {
                tracing::error!(
                    "Error writing {:?} {:?} for post {}: {}",
                    write.op,
                    write.kind,
                    post_id,
                    e
                );
                failures.push((*write, e));
            }
        }

        if failures.is_empty() {
            tracing::debug!(
                "Post {} moved {:?} -> {:?}",
                post_id,
                transition.from,
                transition.to
            );
            return Ok(ToggleOutcome::Applied(transition.to));
        }

        if self.rollback_on_failure {
            for (write, _) in failures.iter().rev() {
                if !self.apply_local(user_id, post_id, write.inverse()).await {
                    tracing::warn!(
                        "Did not undo {:?} {:?} on post {} locally",
                        write.op,
                        write.kind,
                        post_id
                    );
                }
            }
        }

        let attempted = transition.writes.len();
        let failed = failures.len();
        let source = match failures.into_iter().next() {
            Some((_, e)) => e,
            None => return Err(AppError::Internal("reaction failure without error".into())),
        };

        if failed == attempted {
            Err(AppError::Remote(source))
        } else {
            Err(AppError::PartialWrite {
                post_id,
                committed: attempted - failed,
                attempted,
                source,
            })
        }
    }

    /// Apply one write to the sets and, if membership changed, to the post's
    /// counter through the post store. Skipped once `user_id` no longer holds
    /// the session.
    async fn apply_local(&self, user_id: &UserId, post_id: PostId, write: ReactionWrite) -> bool {
        let mut session = self.session.write().await;
        if session.user.as_ref() != Some(user_id) {
            tracing::debug!(
                "Session moved on from {}, not applying {:?} {:?} on post {}",
                user_id,
                write.op,
                write.kind,
                post_id
            );
            return false;
        }
        if !session.sets.apply(post_id, write) {
            return false;
        }

        // Session lock stays held while the counter moves
        if let Some(counters) = self.posts.counters(post_id).await {
            let delta = write.counter_delta();
            match write.kind {
                ReactionKind::Like => {
                    self.posts
                        .update_post_likes(post_id, counters.likes + delta)
                        .await
                }
                ReactionKind::Dislike => {
                    self.posts
                        .update_post_dislikes(post_id, counters.dislikes + delta)
                        .await
                }
            }
        }
        true
    }

    async fn write_remote(
        &self,
        user_id: &UserId,
        post_id: PostId,
        write: ReactionWrite,
    ) -> Result<(), RemoteError> {
        let table = write.kind.table();
        match write.op {
            WriteOp::Insert => {
                let mut row = Row::new();
                row.insert("user_id".into(), Value::from(user_id.as_str()));
                row.insert("post_id".into(), Value::from(post_id));
                self.remote.insert(table, vec![row]).await?;
            }
            WriteOp::Delete => {
                self.remote
                    .delete(
                        table,
                        vec![
                            Filter::eq("user_id", user_id.as_str()),
                            Filter::eq("post_id", post_id),
                        ],
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

fn reaction_posts(rows: Vec<Row>) -> AppResult<Vec<PostId>> {
    rows.into_iter()
        .map(|row| -> AppResult<PostId> { Ok(from_row::<Reaction>(row)?.post_id) })
        .collect()
}
