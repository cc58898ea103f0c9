use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use agora::config::{Cli, Command, Config};
use agora::db;
use agora::error::{AppError, AppResult};
use agora::models::{NewPost, Post, UserId};
use agora::reactions::{ReactionState, ToggleOutcome};
use agora::remote::{int_field, DynRemote, Query, Row, SqliteDataService};
use agora::session::Session;

const DEMO_USER: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli)?;
    std::fs::create_dir_all(&data_dir)?;
    tracing::debug!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let service = Arc::new(SqliteDataService::new(
        pool,
        config.uploads_path(),
        &config.storage.public_url,
    )?);
    if let Some(user) = &cli.user {
        service.sign_in(UserId::new(user.as_str())).await;
    }

    let remote: DynRemote = service;
    let session = Session::new(remote, &config);
    session.restore().await?;

    if let Err(e) = run(&session, cli.command).await {
        eprintln!("{}", e.user_message());
        if e.is_auth_required() {
            eprintln!("Pass --user <id> to act as a user");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(session: &Session, command: Command) -> AppResult<()> {
    match command {
        Command::Seed => seed(session).await,
        Command::Posts => {
            session.posts.fetch_posts().await;
            for post in session.posts.posts().await {
                print_post(session, &post).await;
            }
            Ok(())
        }
        Command::Like { slug } => {
            let post = find_post(session, &slug).await?;
            let outcome = session.reactions.toggle_like(post.id).await?;
            report(session, post.id, outcome).await;
            Ok(())
        }
        Command::Dislike { slug } => {
            let post = find_post(session, &slug).await?;
            let outcome = session.reactions.toggle_dislike(post.id).await?;
            report(session, post.id, outcome).await;
            Ok(())
        }
        Command::Comment { slug, text } => {
            let post = find_post(session, &slug).await?;
            let comment = session.comments.add_comment(post.id, &text, None).await?;
            println!("Comment {} added to {}", comment.id, post.slug);
            Ok(())
        }
        Command::Comments { slug } => {
            let post = find_post(session, &slug).await?;
            session.comments.fetch_comments(post.id).await;
            for comment in session.comments.comments().await {
                let author = comment
                    .profiles
                    .as_ref()
                    .and_then(|p| p.name.clone())
                    .unwrap_or_else(|| comment.user_id.to_string());
                println!("[{}] {}: {}", comment.created_at, author, comment.content);
            }
            Ok(())
        }
        Command::View { slug } => {
            let post = find_post(session, &slug).await?;
            session.views.increment_view(&slug).await;
            let views = session.views.fetch_views_count(post.id).await;
            println!("{} has {} views", slug, views);
            Ok(())
        }
    }
}

async fn find_post(session: &Session, slug: &str) -> AppResult<Post> {
    session.posts.fetch_posts().await;
    session
        .posts
        .get_post_by_slug(slug)
        .await
        .ok_or_else(|| AppError::NotFound(format!("post {}", slug)))
}

async fn report(session: &Session, post_id: i64, outcome: ToggleOutcome) {
    match outcome {
        ToggleOutcome::Applied(state) => {
            if let Some(post) = session.posts.get_post(post_id).await {
                println!("{} is now {:?}", post.slug, state);
                print_post(session, &post).await;
            }
        }
        ToggleOutcome::InFlight => println!("Still saving the previous reaction"),
    }
}

async fn print_post(session: &Session, post: &Post) {
    let mark = match session.reactions.state_of(post.id).await {
        ReactionState::Liked => "+",
        ReactionState::Disliked => "-",
        ReactionState::Neutral => " ",
    };
    println!(
        "{} {:<24} {:>4} likes {:>4} dislikes {:>4} comments {:>5} views",
        mark,
        post.slug,
        post.likes_count,
        post.dislikes_count,
        post.comments_count,
        post.views_count
    );
}

/// Demo profile, a couple of categories and tags, and three posts. Safe to
/// run more than once.
async fn seed(session: &Session) -> AppResult<()> {
    let remote = session.remote.as_ref();

    let existing = remote
        .select("profiles", &Query::new().eq("id", DEMO_USER).limit(1))
        .await?;
    if existing.is_empty() {
        remote
            .insert(
                "profiles",
                vec![row(json!({ "id": DEMO_USER, "name": "Demo User", "slug": "demo" }))],
            )
            .await?;
    }

    let category_ids = ensure_named(session, "categories", &["General", "Rust"]).await?;
    let tag_ids = ensure_named(session, "tags", &["intro", "async"]).await?;

    session.posts.fetch_posts().await;
    let samples = [
        ("hello-world", "Hello, world", "The first post."),
        ("ownership", "Notes on ownership", "Borrowing without tears."),
        ("async-stores", "Async stores", "Optimistic state over a backend."),
    ];
    for (slug, title, description) in samples {
        if session.posts.get_post_by_slug(slug).await.is_some() {
            continue;
        }
        let new_post = NewPost {
            user_id: UserId::new(DEMO_USER),
            title: title.to_string(),
            content: format!("{}\n\n{}", title, description),
            description: description.to_string(),
            slug: slug.to_string(),
        };
        session
            .posts
            .create_post(&new_post, &[], &category_ids, &tag_ids)
            .await?;
    }

    println!("Seeded demo data; run with --user {} to act as the demo user", DEMO_USER);
    Ok(())
}

async fn ensure_named(session: &Session, table: &str, names: &[&str]) -> AppResult<Vec<i64>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let found = session
            .remote
            .select(table, &Query::new().eq("name", *name).limit(1))
            .await?;
        let rows = if found.is_empty() {
            session
                .remote
                .insert(table, vec![row(json!({ "name": name }))])
                .await?
        } else {
            found
        };
        ids.extend(rows.first().and_then(|r| int_field(r, "id")));
    }
    Ok(ids)
}

fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}
