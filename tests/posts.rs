mod common;

use agora::error::AppError;
use agora::models::{NewPost, PostPatch, UserId};
use agora::remote::{Query, RemoteDataService};
use common::{row, Harness, Op};
use serde_json::json;

async fn named(harness: &Harness, table: &str, name: &str) -> i64 {
    let rows = harness
        .service
        .insert(table, vec![row(json!({ "name": name }))])
        .await
        .unwrap();
    rows[0]["id"].as_i64().unwrap()
}

fn new_post(slug: &str) -> NewPost {
    NewPost {
        user_id: UserId::new("a"),
        title: format!("Title {}", slug),
        content: "Body".into(),
        description: "Short".into(),
        slug: slug.into(),
    }
}

#[tokio::test]
async fn fetch_joins_children_newest_first() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    let older = harness.post("a", "older").await;
    let newer = harness.post("a", "newer").await;
    let rust = named(&harness, "categories", "Rust").await;
    let intro = named(&harness, "tags", "intro").await;
    harness
        .service
        .insert(
            "post_images",
            vec![row(json!({ "post_id": older, "image_url": "http://img/1.png" }))],
        )
        .await
        .unwrap();
    harness
        .service
        .insert("post_categories", vec![row(json!({ "post_id": older, "category_id": rust }))])
        .await
        .unwrap();
    harness
        .service
        .insert("post_tags", vec![row(json!({ "post_id": older, "tag_id": intro }))])
        .await
        .unwrap();

    let session = harness.session();
    session.posts.fetch_posts().await;
    let posts = session.posts.posts().await;

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].id, newer);
    assert_eq!(posts[1].id, older);
    assert!(posts[0].post_images.is_empty());

    let post = &posts[1];
    assert_eq!(post.post_images.len(), 1);
    assert_eq!(post.post_images[0].image_url, "http://img/1.png");
    assert_eq!(post.categories.len(), 1);
    assert_eq!(post.categories[0].name, "Rust");
    assert_eq!(post.tags[0].name, "intro");
    let author = post.profile.as_ref().unwrap();
    assert_eq!(author.name.as_deref(), Some("Author"));
    assert!(!session.posts.loading());
}

#[tokio::test]
async fn failed_fetch_keeps_previous_list() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    harness.post("a", "kept").await;

    let session = harness.session();
    session.posts.fetch_posts().await;
    assert_eq!(session.posts.posts().await.len(), 1);

    harness.flaky.fail(Op::Select, "posts");
    session.posts.fetch_posts().await;
    assert_eq!(session.posts.posts().await.len(), 1);
    assert!(!session.posts.loading());
}

#[tokio::test]
async fn slug_lookup_is_local_only() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    let id = harness.post("a", "hello").await;

    let session = harness.session();
    session.posts.fetch_posts().await;
    harness.flaky.reset_calls();

    let post = session.posts.get_post_by_slug("hello").await.unwrap();
    assert_eq!(post.id, id);
    assert!(session.posts.get_post_by_slug("missing").await.is_none());
    assert_eq!(harness.flaky.total_calls(), 0);
}

#[tokio::test]
async fn counter_setters_clamp_at_zero() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    let id = harness.post("a", "hello").await;

    let session = harness.session();
    session.posts.fetch_posts().await;

    session.posts.update_post_likes(id, 7).await;
    session.posts.update_post_dislikes(id, -1).await;
    session.posts.update_post_comments_count(id, 2).await;
    session.posts.increment_post_view(id).await;

    let post = session.posts.get_post(id).await.unwrap();
    assert_eq!(post.likes_count, 7);
    assert_eq!(post.dislikes_count, 0);
    assert_eq!(post.comments_count, 2);
    assert_eq!(post.views_count, 1);

    // Unknown ids are ignored
    session.posts.update_post_likes(9999, 3).await;
    assert_eq!(session.posts.posts().await.len(), 1);
}

#[tokio::test]
async fn create_post_inserts_children_and_prepends() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    harness.post("a", "existing").await;
    let rust = named(&harness, "categories", "Rust").await;
    let intro = named(&harness, "tags", "intro").await;
    let news = named(&harness, "tags", "news").await;

    let session = harness.session();
    session.posts.fetch_posts().await;

    let created = session
        .posts
        .create_post(
            &new_post("fresh"),
            &["http://img/a.png".to_string(), "http://img/b.png".to_string()],
            &[rust],
            &[intro, news],
        )
        .await
        .unwrap();

    assert_eq!(created.slug, "fresh");
    assert_eq!(created.likes_count, 0);
    assert_eq!(created.post_images.len(), 2);
    assert_eq!(created.categories.len(), 1);
    assert_eq!(created.tags.len(), 2);

    let posts = session.posts.posts().await;
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].id, created.id);

    let links = harness
        .remote_rows("post_tags", Query::new().eq("post_id", created.id))
        .await;
    assert_eq!(links.len(), 2);
}

#[tokio::test]
async fn create_post_survives_child_failures() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;

    let session = harness.session();
    harness.flaky.fail(Op::Insert, "post_images");

    let created = session
        .posts
        .create_post(&new_post("fresh"), &["http://img/a.png".to_string()], &[], &[])
        .await
        .unwrap();
    assert!(created.post_images.is_empty());
    assert!(session.posts.get_post_by_slug("fresh").await.is_some());
}

#[tokio::test]
async fn duplicate_slug_is_an_error() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    harness.post("a", "taken").await;

    let session = harness.session();
    let err = session
        .posts
        .create_post(&new_post("taken"), &[], &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Remote(_)));
    assert!(session.posts.posts().await.is_empty());
}

#[tokio::test]
async fn update_post_replaces_children_and_keeps_counters() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    let rust = named(&harness, "categories", "Rust").await;
    let go = named(&harness, "categories", "Go").await;
    let intro = named(&harness, "tags", "intro").await;

    let session = harness.session();
    let created = session
        .posts
        .create_post(
            &new_post("draft"),
            &["http://img/old.png".to_string()],
            &[rust],
            &[intro],
        )
        .await
        .unwrap();
    session.posts.update_post_likes(created.id, 4).await;

    let patch = PostPatch {
        title: Some("Final title".into()),
        ..Default::default()
    };
    let updated = session
        .posts
        .update_post(
            created.id,
            &patch,
            &["http://img/new.png".to_string()],
            &[go],
            &[],
        )
        .await
        .unwrap();

    assert_eq!(updated.title, "Final title");
    assert_eq!(updated.likes_count, 4);
    assert_eq!(updated.post_images.len(), 1);
    assert_eq!(updated.post_images[0].image_url, "http://img/new.png");
    assert_eq!(updated.categories.len(), 1);
    assert_eq!(updated.categories[0].name, "Go");
    assert!(updated.tags.is_empty());
    assert_eq!(updated.profile, created.profile);

    let images = harness
        .remote_rows("post_images", Query::new().eq("post_id", created.id))
        .await;
    assert_eq!(images.len(), 1);
    let tags = harness
        .remote_rows("post_tags", Query::new().eq("post_id", created.id))
        .await;
    assert!(tags.is_empty());

    let cached = session.posts.get_post(created.id).await.unwrap();
    assert_eq!(cached.title, "Final title");
}

#[tokio::test]
async fn update_post_takes_counters_from_patch() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    let id = harness.post("a", "counted").await;

    let session = harness.session();
    session.posts.fetch_posts().await;

    let patch = PostPatch {
        views_count: Some(42),
        ..Default::default()
    };
    let updated = session
        .posts
        .update_post(id, &patch, &[], &[], &[])
        .await
        .unwrap();
    assert_eq!(updated.views_count, 42);
    assert_eq!(session.posts.get_post(id).await.unwrap().views_count, 42);
}

#[tokio::test]
async fn update_unknown_post_is_not_found() {
    let harness = Harness::new();
    let session = harness.session();

    let patch = PostPatch {
        title: Some("x".into()),
        ..Default::default()
    };
    let err = session
        .posts
        .update_post(404, &patch, &[], &[], &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_post_removes_locally_only_on_success() {
    let harness = Harness::new();
    harness.profile("a", "Author").await;
    let id = harness.post("a", "doomed").await;

    let session = harness.session();
    session.posts.fetch_posts().await;

    harness.flaky.fail(Op::Delete, "posts");
    assert!(session.posts.delete_post(id).await.is_err());
    assert!(session.posts.get_post(id).await.is_some());

    harness.flaky.heal();
    session.posts.delete_post(id).await.unwrap();
    assert!(session.posts.get_post(id).await.is_none());
    assert!(harness
        .remote_rows("posts", Query::new().eq("id", id))
        .await
        .is_empty());
}
