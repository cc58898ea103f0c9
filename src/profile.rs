use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::loading::Loading;
use crate::models::{timestamp, Follow, Post, Profile, ProfilePatch, UserId};
use crate::posts::hydrate_posts;
use crate::remote::{
    from_row, to_row, ChangeKind, Direction, DynRemote, Filter, Query, RemoteDataService, Row,
};

#[derive(Debug, Clone, Default)]
struct ProfileState {
    profile: Option<Profile>,
    follower_count: u64,
    following_count: u64,
}

/// The signed-in user's own profile and follow counts.
pub struct ProfileStore {
    remote: DynRemote,
    state: RwLock<ProfileState>,
    loading: Loading,
}

impl ProfileStore {
    pub fn new(remote: DynRemote) -> Self {
        Self {
            remote,
            state: RwLock::new(ProfileState::default()),
            loading: Loading::new(),
        }
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.state.read().await.profile.clone()
    }

    pub async fn follower_count(&self) -> u64 {
        self.state.read().await.follower_count
    }

    pub async fn following_count(&self) -> u64 {
        self.state.read().await.following_count
    }

    pub fn loading(&self) -> bool {
        self.loading.is_loading()
    }

    /// Fetch profile, follower count and following count together. Each
    /// failure is logged and leaves that part untouched.
    pub async fn load(&self) -> AppResult<()> {
        let Some(user_id) = self.remote.current_user().await? else {
            self.clear().await;
            return Ok(());
        };

        let _loading = self.loading.start();
        let profile_query = Query::new().eq("id", user_id.as_str()).limit(1);
        let (profile, followers, following) = tokio::join!(
            self.remote.select("profiles", &profile_query),
            self.remote.count(
                "followers",
                vec![Filter::eq("following_id", user_id.as_str())]
            ),
            self.remote.count(
                "followers",
                vec![Filter::eq("follower_id", user_id.as_str())]
            ),
        );

        let mut state = self.state.write().await;
        match profile {
            Ok(rows) => match rows.into_iter().next().map(from_row::<Profile>) {
                Some(Ok(profile)) => state.profile = Some(profile),
                Some(Err(e)) => tracing::error!("Malformed profile for {}: {}", user_id, e),
                None => {
                    tracing::debug!("No profile row for {}", user_id);
                    state.profile = None;
                }
            },
            Err(e) => tracing::error!("Error fetching profile: {}", e),
        }
        match followers {
            Ok(count) => state.follower_count = count,
            Err(e) => tracing::error!("Error counting followers: {}", e),
        }
        match following {
            Ok(count) => state.following_count = count,
            Err(e) => tracing::error!("Error counting following: {}", e),
        }
        Ok(())
    }

    pub async fn update_profile(&self, patch: &ProfilePatch) -> AppResult<Profile> {
        let user_id = self
            .remote
            .current_user()
            .await?
            .ok_or(AppError::AuthRequired)?;

        let mut changes = to_row(patch)?;
        changes.insert("updated_at".into(), Value::String(timestamp()));

        let rows = self
            .remote
            .update("profiles", changes, vec![Filter::eq("id", user_id.as_str())])
            .await
            .map_err(|e| {
                tracing::error!("Error updating profile: {}", e);
                e
            })?;
        let profile: Profile = match rows.into_iter().next() {
            Some(row) => from_row(row)?,
            None => return Err(AppError::NotFound(format!("profile {}", user_id))),
        };

        self.state.write().await.profile = Some(profile.clone());
        Ok(profile)
    }

    /// Follow live changes to the own profile row until the feed closes.
    pub async fn watch(self: &Arc<Self>) -> AppResult<JoinHandle<()>> {
        let user_id = self
            .remote
            .current_user()
            .await?
            .ok_or(AppError::AuthRequired)?;
        let mut subscription = self
            .remote
            .subscribe_row("profiles", Value::from(user_id.as_str()))?;

        let store = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                store.apply_change(change.kind, change.row).await;
            }
            tracing::debug!("Profile subscription for {} closed", user_id);
        }))
    }

    pub async fn clear(&self) {
        *self.state.write().await = ProfileState::default();
    }

    async fn apply_change(&self, kind: ChangeKind, row: Row) {
        let mut state = self.state.write().await;
        match kind {
            ChangeKind::Delete => state.profile = None,
            ChangeKind::Insert | ChangeKind::Update => match from_row::<Profile>(row) {
                Ok(profile) => state.profile = Some(profile),
                Err(e) => tracing::warn!("Ignoring malformed profile change: {}", e),
            },
        }
    }
}

/// Another user's profile page: their profile, their posts and whether the
/// session user follows them.
#[derive(Debug, Clone)]
pub struct PublicProfile {
    pub profile: Profile,
    pub posts: Vec<Post>,
    pub is_following: bool,
    pub follower_count: u64,
    pub following_count: u64,
}

impl PublicProfile {
    pub async fn load(remote: &dyn RemoteDataService, slug: &str) -> AppResult<Self> {
        let profile_query = Query::new().eq("slug", slug).limit(1);
        let rows = remote.select("profiles", &profile_query).await?;
        let profile: Profile = match rows.into_iter().next() {
            Some(row) => from_row(row)?,
            None => return Err(AppError::NotFound(format!("profile {}", slug))),
        };
        let profile_id = profile.id.as_str();

        let posts_query = Query::new()
            .eq("user_id", profile_id)
            .order_by("created_at", Direction::Desc)
            .order_by("id", Direction::Desc);
        let rows = remote.select("posts", &posts_query).await?;
        let posts = hydrate_posts(remote, rows).await?;

        let is_following = match remote.current_user().await? {
            Some(viewer) => {
                let query = Query::new()
                    .eq("follower_id", viewer.as_str())
                    .eq("following_id", profile_id)
                    .limit(1);
                !remote.select("followers", &query).await?.is_empty()
            }
            None => false,
        };

        let (follower_count, following_count) = futures::try_join!(
            remote.count("followers", vec![Filter::eq("following_id", profile_id)]),
            remote.count("followers", vec![Filter::eq("follower_id", profile_id)]),
        )?;

        Ok(Self {
            profile,
            posts,
            is_following,
            follower_count,
            following_count,
        })
    }

    /// Follow or unfollow. Returns whether the session user now follows.
    pub async fn toggle_follow(&mut self, remote: &dyn RemoteDataService) -> AppResult<bool> {
        let viewer: UserId = remote
            .current_user()
            .await?
            .ok_or(AppError::AuthRequired)?;
        if viewer == self.profile.id {
            return Err(AppError::BadRequest("You cannot follow yourself".into()));
        }

        if self.is_following {
            remote
                .delete(
                    "followers",
                    vec![
                        Filter::eq("follower_id", viewer.as_str()),
                        Filter::eq("following_id", self.profile.id.as_str()),
                    ],
                )
                .await?;
            self.is_following = false;
            self.follower_count = self.follower_count.saturating_sub(1);
            tracing::info!("Unfollowed {}", self.profile.display_name());
        } else {
            let follow = Follow {
                follower_id: viewer,
                following_id: self.profile.id.clone(),
            };
            remote.insert("followers", vec![to_row(&follow)?]).await?;
            self.is_following = true;
            self.follower_count += 1;
            tracing::info!("Now following {}", self.profile.display_name());
        }
        Ok(self.is_following)
    }
}
