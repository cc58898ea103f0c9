use std::sync::Arc;

use crate::comments::CommentStore;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::UserId;
use crate::posts::PostStore;
use crate::profile::ProfileStore;
use crate::reactions::ReactionStore;
use crate::remote::DynRemote;
use crate::views::ViewStore;

/// One instance of every store, shared for the lifetime of a session.
#[derive(Clone)]
pub struct Session {
    pub remote: DynRemote,
    pub posts: Arc<PostStore>,
    pub reactions: Arc<ReactionStore>,
    pub comments: Arc<CommentStore>,
    pub views: Arc<ViewStore>,
    pub profile: Arc<ProfileStore>,
}

impl Session {
    pub fn new(remote: DynRemote, config: &Config) -> Self {
        let posts = Arc::new(PostStore::new(remote.clone()));
        let reactions = Arc::new(ReactionStore::new(
            remote.clone(),
            posts.clone(),
            config.reactions.rollback_on_failure,
        ));
        let comments = Arc::new(CommentStore::new(remote.clone(), posts.clone()));
        let views = Arc::new(ViewStore::new(remote.clone(), posts.clone()));
        let profile = Arc::new(ProfileStore::new(remote.clone()));

        Self {
            remote,
            posts,
            reactions,
            comments,
            views,
            profile,
        }
    }

    /// Pick up whoever the backend already has signed in.
    pub async fn restore(&self) -> AppResult<()> {
        match self.remote.current_user().await? {
            Some(user_id) => self.sign_in(user_id).await,
            None => {
                self.sign_out().await;
                Ok(())
            }
        }
    }

    /// Load the user's reactions and profile after the backend signed them in.
    pub async fn sign_in(&self, user_id: UserId) -> AppResult<()> {
        tracing::info!("Starting session for {}", user_id);
        let (reactions, profile) =
            tokio::join!(self.reactions.load_for_user(user_id), self.profile.load());
        reactions?;
        profile?;
        Ok(())
    }

    pub async fn sign_out(&self) {
        self.reactions.clear().await;
        self.profile.clear().await;
        self.comments.clear().await;
        tracing::info!("Session cleared");
    }
}
