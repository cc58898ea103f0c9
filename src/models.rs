use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PostId = i64;
pub type CommentId = i64;

/// Opaque user identifier issued by the backend's auth module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current time in the format the backend stores timestamps in.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADM")]
    Admin,
    #[default]
    #[serde(rename = "US")]
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Profile {
    /// Name shown in follow confirmations: name, then slug, then id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.slug.as_deref())
            .unwrap_or(self.id.as_str())
    }
}

/// Author fields embedded in posts and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostImage {
    pub id: i64,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub dislikes_count: i64,
    #[serde(default)]
    pub views_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub post_images: Vec<PostImage>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub profile: Option<ProfileSummary>,
}

impl Post {
    pub fn counters(&self) -> PostCounters {
        PostCounters {
            likes: self.likes_count,
            dislikes: self.dislikes_count,
            views: self.views_count,
            comments: self.comments_count,
        }
    }
}

/// Snapshot of a post's denormalized counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostCounters {
    pub likes: i64,
    pub dislikes: i64,
    pub views: i64,
    pub comments: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub description: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dislikes_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default)]
    pub parent_comment_id: Option<CommentId>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub profiles: Option<ProfileSummary>,
}

/// A row of the `likes` or `dislikes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub post_id: PostId,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: UserId,
    pub following_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_deserializes_without_joined_fields() {
        let post: Post = serde_json::from_value(json!({
            "id": 1,
            "user_id": "u1",
            "title": "Hello",
            "content": "body",
            "description": "",
            "slug": "hello",
            "likes_count": 3,
            "dislikes_count": 1,
            "views_count": 0,
            "comments_count": 2,
            "created_at": "2025-01-01T00:00:00.000Z",
            "updated_at": "2025-01-01T00:00:00.000Z"
        }))
        .unwrap();

        assert!(post.post_images.is_empty());
        assert!(post.profile.is_none());
        assert_eq!(
            post.counters(),
            PostCounters {
                likes: 3,
                dislikes: 1,
                views: 0,
                comments: 2
            }
        );
    }

    #[test]
    fn post_patch_skips_unset_fields() {
        let patch = PostPatch {
            title: Some("New".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({ "title": "New" }));
    }

    #[test]
    fn role_uses_backend_codes() {
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), json!("ADM"));
        let role: Role = serde_json::from_value(json!("US")).unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn display_name_falls_back_to_slug_then_id() {
        let mut profile: Profile = serde_json::from_value(json!({ "id": "u9" })).unwrap();
        assert_eq!(profile.display_name(), "u9");
        profile.slug = Some("ana".into());
        assert_eq!(profile.display_name(), "ana");
        profile.name = Some("Ana".into());
        assert_eq!(profile.display_name(), "Ana");
    }

    #[test]
    fn timestamp_is_rfc3339_utc_millis() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2025-01-01T00:00:00.000Z".len());
    }
}
