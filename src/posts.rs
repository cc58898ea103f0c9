use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::loading::Loading;
use crate::models::{
    timestamp, Category, NewPost, Post, PostCounters, PostId, PostImage, PostPatch,
    ProfileSummary, Tag,
};
use crate::remote::{
    from_row, int_field, to_row, Direction, DynRemote, Filter, Query, RemoteDataService, Row,
};

/// Join tables linking a post to shared rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Category,
    Tag,
}

impl Link {
    fn link_table(self) -> &'static str {
        match self {
            Link::Category => "post_categories",
            Link::Tag => "post_tags",
        }
    }

    fn target_table(self) -> &'static str {
        match self {
            Link::Category => "categories",
            Link::Tag => "tags",
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            Link::Category => "category_id",
            Link::Tag => "tag_id",
        }
    }
}

/// Fetched post list and the single owner of its denormalized counters.
pub struct PostStore {
    remote: DynRemote,
    posts: RwLock<Vec<Post>>,
    loading: Loading,
}

impl PostStore {
    pub fn new(remote: DynRemote) -> Self {
        Self {
            remote,
            posts: RwLock::new(Vec::new()),
            loading: Loading::new(),
        }
    }

    /// Replace the local list with a fresh fetch, newest first. Errors are
    /// logged and leave the previous list in place.
    pub async fn fetch_posts(&self) {
        let _loading = self.loading.start();

        let query = Query::new()
            .order_by("created_at", Direction::Desc)
            .order_by("id", Direction::Desc);
        let result = match self.remote.select("posts", &query).await {
            Ok(rows) => hydrate_posts(self.remote.as_ref(), rows).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(posts) => {
                tracing::debug!("Fetched {} posts", posts.len());
                *self.posts.write().await = posts;
            }
            Err(e) => tracing::error!("Error fetching posts: {}", e),
        }
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.posts.read().await.clone()
    }

    pub fn loading(&self) -> bool {
        self.loading.is_loading()
    }

    /// Local lookup only; callers fetch first.
    pub async fn get_post_by_slug(&self, slug: &str) -> Option<Post> {
        self.posts
            .read()
            .await
            .iter()
            .find(|p| p.slug == slug)
            .cloned()
    }

    pub async fn get_post(&self, post_id: PostId) -> Option<Post> {
        self.posts
            .read()
            .await
            .iter()
            .find(|p| p.id == post_id)
            .cloned()
    }

    pub async fn counters(&self, post_id: PostId) -> Option<PostCounters> {
        self.posts
            .read()
            .await
            .iter()
            .find(|p| p.id == post_id)
            .map(Post::counters)
    }

    pub async fn update_post_likes(&self, post_id: PostId, likes_count: i64) {
        self.set_counter(post_id, |post| post.likes_count = likes_count.max(0))
            .await;
    }

    pub async fn update_post_dislikes(&self, post_id: PostId, dislikes_count: i64) {
        self.set_counter(post_id, |post| post.dislikes_count = dislikes_count.max(0))
            .await;
    }

    pub async fn update_post_comments_count(&self, post_id: PostId, comments_count: i64) {
        self.set_counter(post_id, |post| post.comments_count = comments_count.max(0))
            .await;
    }

    pub async fn increment_post_view(&self, post_id: PostId) {
        self.set_counter(post_id, |post| post.views_count += 1).await;
    }

    async fn set_counter(&self, post_id: PostId, apply: impl FnOnce(&mut Post)) {
        let mut posts = self.posts.write().await;
        match posts.iter_mut().find(|p| p.id == post_id) {
            Some(post) => apply(post),
            None => tracing::debug!("Post {} not cached, counter left alone", post_id),
        }
    }

    /// Insert a post with its images, categories and tags, and put it at
    /// the head of the local list.
    pub async fn create_post(
        &self,
        new_post: &NewPost,
        image_urls: &[String],
        category_ids: &[i64],
        tag_ids: &[i64],
    ) -> AppResult<Post> {
        let rows = self.remote.insert("posts", vec![to_row(new_post)?]).await?;
        let mut post: Post = match rows.into_iter().next() {
            Some(row) => from_row(row)?,
            None => {
                return Err(AppError::Internal(
                    "no row returned after post creation".into(),
                ))
            }
        };

        post.post_images = self.insert_images(post.id, image_urls).await;
        post.categories = self.insert_links(post.id, Link::Category, category_ids).await;
        post.tags = self.insert_links(post.id, Link::Tag, tag_ids).await;

        tracing::info!("Created post {} ({})", post.id, post.slug);
        self.posts.write().await.insert(0, post.clone());
        Ok(post)
    }

    /// Update a post and replace all of its images, categories and tags.
    pub async fn update_post(
        &self,
        post_id: PostId,
        patch: &PostPatch,
        image_urls: &[String],
        category_ids: &[i64],
        tag_ids: &[i64],
    ) -> AppResult<Post> {
        let mut changes = to_row(patch)?;
        changes.insert("updated_at".into(), Value::String(timestamp()));

        let rows = self
            .remote
            .update("posts", changes, vec![Filter::eq("id", post_id)])
            .await?;
        let mut post: Post = match rows.into_iter().next() {
            Some(row) => from_row(row)?,
            None => return Err(AppError::NotFound(format!("post {}", post_id))),
        };

        // Replace-all: drop every child row, then insert the new set
        self.clear_children("post_images", post_id).await;
        post.post_images = self.insert_images(post_id, image_urls).await;
        self.clear_children(Link::Category.link_table(), post_id).await;
        post.categories = self.insert_links(post_id, Link::Category, category_ids).await;
        self.clear_children(Link::Tag.link_table(), post_id).await;
        post.tags = self.insert_links(post_id, Link::Tag, tag_ids).await;

        let cached = self.get_post(post_id).await;
        let counters = cached
            .as_ref()
            .map(Post::counters)
            .unwrap_or_else(|| post.counters());
        post.likes_count = patch.likes_count.unwrap_or(counters.likes);
        post.dislikes_count = patch.dislikes_count.unwrap_or(counters.dislikes);
        post.views_count = patch.views_count.unwrap_or(counters.views);
        post.comments_count = patch.comments_count.unwrap_or(counters.comments);
        post.profile = cached.and_then(|p| p.profile);

        let mut posts = self.posts.write().await;
        if let Some(existing) = posts.iter_mut().find(|p| p.id == post_id) {
            *existing = post.clone();
        }
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: PostId) -> AppResult<()> {
        if let Err(e) = self
            .remote
            .delete("posts", vec![Filter::eq("id", post_id)])
            .await
        {
            tracing::error!("Error deleting post {}: {}", post_id, e);
            return Err(e.into());
        }

        self.posts.write().await.retain(|p| p.id != post_id);
        tracing::info!("Deleted post {}", post_id);
        Ok(())
    }

    async fn clear_children(&self, table: &str, post_id: PostId) {
        if let Err(e) = self
            .remote
            .delete(table, vec![Filter::eq("post_id", post_id)])
            .await
        {
            tracing::error!("Error clearing {} for post {}: {}", table, post_id, e);
        }
    }

    async fn insert_images(&self, post_id: PostId, image_urls: &[String]) -> Vec<PostImage> {
        if image_urls.is_empty() {
            return Vec::new();
        }
        let rows = image_urls
            .iter()
            .map(|url| row_of(json!({ "post_id": post_id, "image_url": url })))
            .collect();

        match self.remote.insert("post_images", rows).await {
            Ok(stored) => parse_rows(stored, "post_images"),
            Err(e) => {
                tracing::error!("Error inserting post images for post {}: {}", post_id, e);
                Vec::new()
            }
        }
    }

    async fn insert_links<T: DeserializeOwned>(
        &self,
        post_id: PostId,
        link: Link,
        ids: &[i64],
    ) -> Vec<T> {
        if ids.is_empty() {
            return Vec::new();
        }
        let rows = ids
            .iter()
            .map(|id| {
                let mut row = Row::new();
                row.insert("post_id".into(), Value::from(post_id));
                row.insert(link.target_column().into(), Value::from(*id));
                row
            })
            .collect();

        if let Err(e) = self.remote.insert(link.link_table(), rows).await {
            tracing::error!(
                "Error inserting {} for post {}: {}",
                link.link_table(),
                post_id,
                e
            );
            return Vec::new();
        }

        let query = Query::new()
            .is_in("id", ids.iter().copied())
            .order_by("id", Direction::Asc);
        match self.remote.select(link.target_table(), &query).await {
            Ok(rows) => parse_rows(rows, link.target_table()),
            Err(e) => {
                tracing::error!("Error loading {}: {}", link.target_table(), e);
                Vec::new()
            }
        }
    }
}

/// Join images, categories, tags and author summaries onto post rows.
pub(crate) async fn hydrate_posts(
    remote: &dyn RemoteDataService,
    rows: Vec<Row>,
) -> AppResult<Vec<Post>> {
    let mut posts = rows
        .into_iter()
        .map(from_row::<Post>)
        .collect::<Result<Vec<_>, _>>()?;
    if posts.is_empty() {
        return Ok(posts);
    }

    let post_ids: Vec<PostId> = posts.iter().map(|p| p.id).collect();
    let mut author_ids: Vec<String> = posts.iter().map(|p| p.user_id.0.clone()).collect();
    author_ids.sort();
    author_ids.dedup();

    let image_query = Query::new()
        .is_in("post_id", post_ids.iter().copied())
        .order_by("id", Direction::Asc);
    let author_query = Query::new().is_in("id", author_ids);

    let (images, mut categories, mut tags, authors) = futures::try_join!(
        async { Ok::<_, AppError>(remote.select("post_images", &image_query).await?) },
        linked_rows(remote, Link::Category, &post_ids),
        linked_rows(remote, Link::Tag, &post_ids),
        async { Ok::<_, AppError>(remote.select("profiles", &author_query).await?) },
    )?;

    let mut images_by_post: HashMap<PostId, Vec<PostImage>> = HashMap::new();
    for row in images {
        let Some(post_id) = int_field(&row, "post_id") else {
            continue;
        };
        match from_row::<PostImage>(row) {
            Ok(image) => images_by_post.entry(post_id).or_default().push(image),
            Err(e) => tracing::warn!("Skipping malformed post image: {}", e),
        }
    }

    let authors: HashMap<String, ProfileSummary> = parse_rows::<ProfileSummary>(authors, "profiles")
        .into_iter()
        .map(|p| (p.id.0.clone(), p))
        .collect();

    for post in &mut posts {
        post.post_images = images_by_post.remove(&post.id).unwrap_or_default();
        post.categories =
            parse_rows::<Category>(categories.remove(&post.id).unwrap_or_default(), "categories");
        post.tags = parse_rows::<Tag>(tags.remove(&post.id).unwrap_or_default(), "tags");
        post.profile = authors.get(post.user_id.as_str()).cloned();
    }

    Ok(posts)
}

/// Rows of `link`'s target table grouped by the post they are linked to.
async fn linked_rows(
    remote: &dyn RemoteDataService,
    link: Link,
    post_ids: &[PostId],
) -> AppResult<HashMap<PostId, Vec<Row>>> {
    let link_query = Query::new().is_in("post_id", post_ids.iter().copied());
    let links = remote.select(link.link_table(), &link_query).await?;

    let mut target_ids: Vec<i64> = links
        .iter()
        .filter_map(|l| int_field(l, link.target_column()))
        .collect();
    target_ids.sort_unstable();
    target_ids.dedup();

    let targets = if target_ids.is_empty() {
        Vec::new()
    } else {
        let target_query = Query::new().is_in("id", target_ids);
        remote.select(link.target_table(), &target_query).await?
    };
    let by_id: HashMap<i64, Row> = targets
        .into_iter()
        .filter_map(|row| int_field(&row, "id").map(|id| (id, row)))
        .collect();

    let mut grouped: HashMap<PostId, Vec<Row>> = HashMap::new();
    for l in &links {
        let (Some(post_id), Some(target_id)) =
            (int_field(l, "post_id"), int_field(l, link.target_column()))
        else {
            continue;
        };
        if let Some(target) = by_id.get(&target_id) {
            grouped.entry(post_id).or_default().push(target.clone());
        }
    }
    Ok(grouped)
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Row>, table: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match from_row(row) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Skipping malformed {} row: {}", table, e);
                None
            }
        })
        .collect()
}

fn row_of(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
