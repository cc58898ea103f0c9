// Reaction domain - pure state transitions, no side effects
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::PostId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    /// Backend table holding reactions of this kind
    pub fn table(self) -> &'static str {
        match self {
            ReactionKind::Like => "likes",
            ReactionKind::Dislike => "dislikes",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            ReactionKind::Like => ReactionKind::Dislike,
            ReactionKind::Dislike => ReactionKind::Like,
        }
    }
}

/// Where a (user, post) pair stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionState {
    #[default]
    Neutral,
    Liked,
    Disliked,
}

impl ReactionState {
    pub fn holding(kind: ReactionKind) -> Self {
        match kind {
            ReactionKind::Like => ReactionState::Liked,
            ReactionKind::Dislike => ReactionState::Disliked,
        }
    }

    pub fn held(self) -> Option<ReactionKind> {
        match self {
            ReactionState::Neutral => None,
            ReactionState::Liked => Some(ReactionKind::Like),
            ReactionState::Disliked => Some(ReactionKind::Dislike),
        }
    }

    /// Writes needed to toggle `kind` from this state, in the order they
    /// must be applied.
    pub fn toggle(self, kind: ReactionKind) -> Transition {
        let (to, writes) = match self.held() {
            Some(held) if held == kind => (
                ReactionState::Neutral,
                vec![ReactionWrite::delete(kind)],
            ),
            Some(held) => (
                ReactionState::holding(kind),
                vec![ReactionWrite::delete(held), ReactionWrite::insert(kind)],
            ),
            None => (
                ReactionState::holding(kind),
                vec![ReactionWrite::insert(kind)],
            ),
        };
        Transition {
            from: self,
            to,
            writes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Delete,
}

/// One row-level write against a reaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionWrite {
    pub kind: ReactionKind,
    pub op: WriteOp,
}

impl ReactionWrite {
    pub fn insert(kind: ReactionKind) -> Self {
        Self {
            kind,
            op: WriteOp::Insert,
        }
    }

    pub fn delete(kind: ReactionKind) -> Self {
        Self {
            kind,
            op: WriteOp::Delete,
        }
    }

    pub fn inverse(self) -> Self {
        match self.op {
            WriteOp::Insert => Self::delete(self.kind),
            WriteOp::Delete => Self::insert(self.kind),
        }
    }

    /// Change this write makes to the post's counter for `kind`
    pub fn counter_delta(self) -> i64 {
        match self.op {
            WriteOp::Insert => 1,
            WriteOp::Delete => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ReactionState,
    pub to: ReactionState,
    pub writes: Vec<ReactionWrite>,
}

/// Posts the session user has liked or disliked. A post is never in both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSets {
    likes: HashSet<PostId>,
    dislikes: HashSet<PostId>,
}

impl ReactionSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: ReactionKind, post_id: PostId) -> bool {
        self.set(kind).contains(&post_id)
    }

    pub fn state_of(&self, post_id: PostId) -> ReactionState {
        if self.likes.contains(&post_id) {
            ReactionState::Liked
        } else if self.dislikes.contains(&post_id) {
            ReactionState::Disliked
        } else {
            ReactionState::Neutral
        }
    }

    /// Apply one write locally. Returns whether membership changed; an
    /// insert is refused while the post holds the opposite reaction.
    pub fn apply(&mut self, post_id: PostId, write: ReactionWrite) -> bool {
        match write.op {
            WriteOp::Insert => {
                if self.set(write.kind.opposite()).contains(&post_id) {
                    return false;
                }
                self.set_mut(write.kind).insert(post_id)
            }
            WriteOp::Delete => self.set_mut(write.kind).remove(&post_id),
        }
    }

    pub fn likes(&self) -> &HashSet<PostId> {
        &self.likes
    }

    pub fn dislikes(&self) -> &HashSet<PostId> {
        &self.dislikes
    }

    pub fn clear(&mut self) {
        self.likes.clear();
        self.dislikes.clear();
    }

    fn set(&self, kind: ReactionKind) -> &HashSet<PostId> {
        match kind {
            ReactionKind::Like => &self.likes,
            ReactionKind::Dislike => &self.dislikes,
        }
    }

    fn set_mut(&mut self, kind: ReactionKind) -> &mut HashSet<PostId> {
        match kind {
            ReactionKind::Like => &mut self.likes,
            ReactionKind::Dislike => &mut self.dislikes,
        }
    }
}
