use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::db::{Database, User};
use crate::error::{GatorError, Result};
use crate::fetcher::Fetcher;
use crate::scheduler::{parse_interval, shutdown_on_ctrl_c, Aggregator};

const DEFAULT_BROWSE_LIMIT: i64 = 2;

/// Everything a handler can touch.
pub struct State {
    pub db: Arc<Database>,
    pub config: Mutex<Config>,
}

impl State {
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        Self {
            db,
            config: Mutex::new(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

type Handler = Box<dyn Fn(Arc<State>, Command) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Command name to handler mapping.
#[derive(Default)]
pub struct Commands {
    handlers: HashMap<String, Handler>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name twice replaces the earlier handler.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Arc<State>, Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers.insert(
            name.to_string(),
            Box::new(move |state, cmd| handler(state, cmd).boxed()),
        );
    }

    pub async fn run(&self, state: Arc<State>, cmd: Command) -> Result<()> {
        let handler = self
            .handlers
            .get(&cmd.name)
            .ok_or_else(|| GatorError::UnknownCommand(cmd.name.clone()))?;
        handler(state, cmd).await
    }
}

/// Wrap a handler that needs the logged-in user. The user is looked up fresh on
/// every call, so a reset between invocations is noticed.
pub fn require_user<F, Fut>(
    handler: F,
) -> impl Fn(Arc<State>, Command) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static
where
    F: Fn(Arc<State>, Command, User) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    move |state, cmd| {
        let handler = handler.clone();
        async move {
            let user = current_user(&state).await?;
            handler(state, cmd, user).await
        }
        .boxed()
    }
}

async fn current_user(state: &State) -> Result<User> {
    let name = {
        let config = state.config.lock().await;
        config.current_user().map(str::to_string)
    }
    .ok_or(GatorError::NotLoggedIn)?;

    let user = state.db.get_user(&name).await?;
    user.ok_or(GatorError::UnknownUser(name))
}

/// Register every CLI command.
pub fn register_handlers(commands: &mut Commands) {
    commands.register("register", handle_register);
    commands.register("login", handle_login);
    commands.register("reset", handle_reset);
    commands.register("users", handle_users);
    commands.register("agg", handle_agg);
    commands.register("addfeed", require_user(handle_add_feed));
    commands.register("feeds", handle_feeds);
    commands.register("follow", require_user(handle_follow));
    commands.register("unfollow", require_user(handle_unfollow));
    commands.register("following", require_user(handle_following));
    commands.register("browse", require_user(handle_browse));
}

fn expect_args<'a>(cmd: &'a Command, count: usize, usage: &str) -> Result<&'a [String]> {
    if cmd.args.len() != count {
        return Err(GatorError::InvalidArguments(format!("usage: {}", usage)));
    }
    Ok(&cmd.args)
}

pub async fn handle_register(state: Arc<State>, cmd: Command) -> Result<()> {
    let args = expect_args(&cmd, 1, "register <name>")?;
    let user = state.db.create_user(&args[0]).await?;
    state.config.lock().await.set_user(&user.name)?;

    info!("Registered user {} (id {})", user.name, user.id);
    println!("User {} registered and logged in", user.name);
    Ok(())
}

pub async fn handle_login(state: Arc<State>, cmd: Command) -> Result<()> {
    let args = expect_args(&cmd, 1, "login <name>")?;
    let name = &args[0];
    if state.db.get_user(name).await?.is_none() {
        return Err(GatorError::UnknownUser(name.clone()));
    }
    state.config.lock().await.set_user(name)?;

    println!("Logged in as {}", name);
    Ok(())
}

pub async fn handle_reset(state: Arc<State>, cmd: Command) -> Result<()> {
    expect_args(&cmd, 0, "reset")?;
    let deleted = state.db.delete_all_users().await?;
    state.config.lock().await.set_user("")?;

    println!("Deleted {} users", deleted);
    Ok(())
}

pub async fn handle_users(state: Arc<State>, cmd: Command) -> Result<()> {
    expect_args(&cmd, 0, "users")?;
    let users = state.db.get_users().await?;
    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    let config = state.config.lock().await;
    for user in users {
        if config.current_user() == Some(user.name.as_str()) {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

pub async fn handle_agg(state: Arc<State>, cmd: Command) -> Result<()> {
    let args = expect_args(&cmd, 1, "agg <interval-seconds>")?;
    let interval = parse_interval(&args[0])?;

    let aggregator = Aggregator::new(state.db.clone(), Fetcher::new()?);
    aggregator.run(interval, shutdown_on_ctrl_c()).await;
    Ok(())
}

pub async fn handle_add_feed(state: Arc<State>, cmd: Command, user: User) -> Result<()> {
    let args = expect_args(&cmd, 2, "addfeed <name> <url>")?;
    let feed = state.db.create_feed(&args[0], &args[1], user.id).await?;
    state.db.create_feed_follow(feed.id, user.id).await?;

    println!("Added feed {} ({}) and followed it", feed.name, feed.url);
    Ok(())
}

pub async fn handle_feeds(state: Arc<State>, cmd: Command) -> Result<()> {
    expect_args(&cmd, 0, "feeds")?;
    let feeds = state.db.get_feeds_with_creator().await?;
    if feeds.is_empty() {
        println!("No feeds found.");
    }
    for feed in feeds {
        println!("* {} ({}) - added by {}", feed.name, feed.url, feed.user_name);
    }
    Ok(())
}

pub async fn handle_follow(state: Arc<State>, cmd: Command, user: User) -> Result<()> {
    let args = expect_args(&cmd, 1, "follow <url>")?;
    let url = &args[0];
    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| GatorError::NotFound(format!("feed with URL {}", url)))?;

    let follow = state.db.create_feed_follow(feed.id, user.id).await?;
    println!(
        "{} now follows {} ({})",
        follow.user_name, follow.feed_name, follow.feed_url
    );
    Ok(())
}

pub async fn handle_unfollow(state: Arc<State>, cmd: Command, user: User) -> Result<()> {
    let args = expect_args(&cmd, 1, "unfollow <url>")?;
    let url = &args[0];
    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| GatorError::NotFound(format!("feed with URL {}", url)))?;

    if !state.db.delete_feed_follow(feed.id, user.id).await? {
        return Err(GatorError::NotFound(format!(
            "follow of {} for {}",
            feed.url, user.name
        )));
    }
    println!("Unfollowed {} ({})", feed.name, feed.url);
    Ok(())
}

pub async fn handle_following(state: Arc<State>, cmd: Command, user: User) -> Result<()> {
    expect_args(&cmd, 0, "following")?;
    let follows = state.db.get_feed_follows_for_user(user.id).await?;
    if follows.is_empty() {
        println!("You are not following any feeds.");
    }
    for follow in follows {
        println!("* {} ({})", follow.feed_name, follow.feed_url);
    }
    Ok(())
}

pub async fn handle_browse(state: Arc<State>, cmd: Command, user: User) -> Result<()> {
    let limit = match cmd.args.as_slice() {
        [] => DEFAULT_BROWSE_LIMIT,
        [raw] => match raw.parse::<i64>() {
            Ok(limit) if limit > 0 => limit,
            _ => {
                return Err(GatorError::InvalidArguments(
                    "limit must be a positive integer".to_string(),
                ))
            }
        },
        _ => {
            return Err(GatorError::InvalidArguments(
                "usage: browse [limit]".to_string(),
            ))
        }
    };

    let posts = state.db.get_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        println!("No posts found.");
    }
    for post in posts {
        println!("- {} ({})", post.title, post.url);
        println!(
            "  {} | {}",
            post.feed_name,
            post.published_at.as_deref().unwrap_or("undated")
        );
        if let Some(description) = post.description {
            println!("  {}", description);
        }
    }
    Ok(())
}
