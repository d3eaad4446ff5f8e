use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::error::{GatorError, Result};

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub last_fetched_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A feed joined with the name of the user who added it.
#[derive(Debug, Clone, FromRow)]
pub struct FeedWithCreator {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_name: String,
}

/// A follow joined with the feed and user it links.
#[derive(Debug, Clone, FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub feed_id: i64,
    pub user_id: i64,
    pub feed_name: String,
    pub feed_url: String,
    pub user_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub feed_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A post as shown by `browse`, with the name of its feed.
#[derive(Debug, Clone, FromRow)]
pub struct PostWithFeed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub feed_name: String,
}

#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub feed_id: i64,
    pub title: &'a str,
    pub url: &'a str,
    pub description: Option<&'a str>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Fixed-width UTC timestamp, so string order matches time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    format_timestamp(Utc::now())
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_fetched_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                description TEXT,
                published_at TEXT,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched ON feeds(last_fetched_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let now = now();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatorError::from_insert(e, format!("user {}", name)))
    }

    pub async fn get_user(&self, name: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Deletes every user. Feeds, follows and posts go with them.
    pub async fn delete_all_users(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Feeds

    pub async fn create_feed(&self, name: &str, url: &str, user_id: i64) -> Result<Feed> {
        let now = now();
        sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatorError::from_insert(e, format!("feed with URL {}", url)))
    }

    #[cfg(test)]
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_feeds_with_creator(&self) -> Result<Vec<FeedWithCreator>> {
        let feeds = sqlx::query_as::<_, FeedWithCreator>(
            r#"
            SELECT feeds.id, feeds.name, feeds.url, users.name AS user_name
            FROM feeds
            JOIN users ON users.id = feeds.user_id
            ORDER BY feeds.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Picks the feed that was polled longest ago (never-polled feeds first) and
    /// stamps it as fetched now, in one statement.
    pub async fn claim_next_feed(&self) -> Result<Feed> {
        let now = now();
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM feeds
                ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        feed.ok_or_else(|| GatorError::NotFound("feed to fetch".to_string()))
    }

    // Follows

    pub async fn create_feed_follow(&self, feed_id: i64, user_id: i64) -> Result<FeedFollow> {
        let now = now();
        let (follow_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_follows (feed_id, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(feed_id)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatorError::from_insert(e, "follow for this feed"))?;

        let follow = sqlx::query_as::<_, FeedFollow>(
            r#"
            SELECT feed_follows.id, feed_follows.feed_id, feed_follows.user_id,
                   feeds.name AS feed_name, feeds.url AS feed_url, users.name AS user_name
            FROM feed_follows
            JOIN feeds ON feeds.id = feed_follows.feed_id
            JOIN users ON users.id = feed_follows.user_id
            WHERE feed_follows.id = ?
            "#,
        )
        .bind(follow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(follow)
    }

    /// Returns false when the user was not following the feed.
    pub async fn delete_feed_follow(&self, feed_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE feed_id = ? AND user_id = ?")
            .bind(feed_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_feed_follows_for_user(&self, user_id: i64) -> Result<Vec<FeedFollow>> {
        let follows = sqlx::query_as::<_, FeedFollow>(
            r#"
            SELECT feed_follows.id, feed_follows.feed_id, feed_follows.user_id,
                   feeds.name AS feed_name, feeds.url AS feed_url, users.name AS user_name
            FROM feed_follows
            JOIN feeds ON feeds.id = feed_follows.feed_id
            JOIN users ON users.id = feed_follows.user_id
            WHERE feed_follows.user_id = ?
            ORDER BY feeds.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    // Posts

    pub async fn create_post(&self, post: &NewPost<'_>) -> Result<Post> {
        let now = now();
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (title, url, description, published_at, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(post.title)
        .bind(post.url)
        .bind(post.description)
        .bind(post.published_at.map(format_timestamp))
        .bind(post.feed_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatorError::from_insert(e, format!("post {}", post.url)))
    }

    #[cfg(test)]
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM posts
            WHERE feed_id = ?
            ORDER BY published_at DESC NULLS LAST, id DESC
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    /// Newest posts from the feeds `user_id` follows. Undated posts sort last.
    pub async fn get_posts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<PostWithFeed>> {
        let posts = sqlx::query_as::<_, PostWithFeed>(
            r#"
            SELECT posts.id, posts.title, posts.url, posts.description, posts.published_at,
                   feeds.name AS feed_name
            FROM posts
            JOIN feed_follows ON feed_follows.feed_id = posts.feed_id
            JOIN feeds ON feeds.id = posts.feed_id
            WHERE feed_follows.user_id = ?
            ORDER BY posts.published_at DESC NULLS LAST, posts.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn create_test_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    async fn set_last_fetched(db: &Database, feed_id: i64, at: Option<&str>) {
        sqlx::query("UPDATE feeds SET last_fetched_at = ? WHERE id = ?")
            .bind(at)
            .bind(feed_id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    fn new_post(feed_id: i64, url: &str) -> NewPost<'_> {
        NewPost {
            feed_id,
            title: "Title",
            url,
            description: None,
            published_at: None,
        }
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_database_initialization() {
            let db = create_test_db().await;
            assert!(db.get_users().await.unwrap().is_empty());
            assert!(db.get_feeds_with_creator().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_double_initialization_is_safe() {
            let db = create_test_db().await;
            assert!(db.initialize().await.is_ok());
        }

        #[test]
        fn test_timestamps_sort_chronologically() {
            let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
            let later = earlier + chrono::Duration::microseconds(1500);
            assert_eq!(format_timestamp(earlier), "2024-01-01T09:00:00.000000Z");
            assert!(format_timestamp(earlier) < format_timestamp(later));
        }
    }

    mod user_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_and_get_user() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let by_name = db.get_user("alice").await.unwrap().unwrap();
            let by_id = db.get_user_by_id(user.id).await.unwrap().unwrap();
            assert_eq!(by_name.id, user.id);
            assert_eq!(by_id.name, "alice");
            assert!(db.get_user("bob").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_duplicate_user_name() {
            let db = create_test_db().await;
            db.create_user("alice").await.unwrap();

            let result = db.create_user("alice").await;
            assert!(matches!(result, Err(GatorError::DuplicateKey(_))));
        }

        #[tokio::test]
        async fn test_delete_all_users_cascades() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db
                .create_feed("Blog", "https://blog.test/rss", user.id)
                .await
                .unwrap();
            db.create_feed_follow(feed.id, user.id).await.unwrap();
            db.create_post(&new_post(feed.id, "https://blog.test/1"))
                .await
                .unwrap();

            assert_eq!(db.delete_all_users().await.unwrap(), 1);

            assert!(db.get_users().await.unwrap().is_empty());
            assert!(db.get_feed(feed.id).await.unwrap().is_none());
            assert!(db.get_posts_for_feed(feed.id).await.unwrap().is_empty());
            assert!(db
                .get_feed_follows_for_user(user.id)
                .await
                .unwrap()
                .is_empty());
        }
    }

    mod feed_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_feed_and_list_with_creator() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db
                .create_feed("Blog", "https://blog.test/rss", user.id)
                .await
                .unwrap();

            assert!(feed.last_fetched_at.is_none());
            let feeds = db.get_feeds_with_creator().await.unwrap();
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].name, "Blog");
            assert_eq!(feeds[0].user_name, "alice");

            let by_url = db.get_feed_by_url("https://blog.test/rss").await.unwrap();
            assert_eq!(by_url.unwrap().id, feed.id);
        }

        #[tokio::test]
        async fn test_duplicate_feed_url_rejected() {
            let db = create_test_db().await;
            let alice = db.create_user("alice").await.unwrap();
            let bob = db.create_user("bob").await.unwrap();
            db.create_feed("Blog", "https://blog.test/rss", alice.id)
                .await
                .unwrap();

            let result = db
                .create_feed("Other name", "https://blog.test/rss", bob.id)
                .await;
            assert!(matches!(result, Err(GatorError::DuplicateKey(_))));
        }

        #[tokio::test]
        async fn test_feed_requires_existing_user() {
            let db = create_test_db().await;
            let result = db.create_feed("Blog", "https://blog.test/rss", 42).await;
            assert!(matches!(result, Err(GatorError::Store(_))));
        }
    }

    mod claim_tests {
        use super::*;

        #[tokio::test]
        async fn test_claim_with_no_feeds() {
            let db = create_test_db().await;
            let result = db.claim_next_feed().await;
            assert!(matches!(result, Err(GatorError::NotFound(_))));
        }

        #[tokio::test]
        async fn test_claim_marks_feed_fetched() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db
                .create_feed("Blog", "https://blog.test/rss", user.id)
                .await
                .unwrap();

            let claimed = db.claim_next_feed().await.unwrap();
            assert_eq!(claimed.id, feed.id);
            assert!(claimed.last_fetched_at.is_some());
            assert_eq!(claimed.last_fetched_at.as_deref(), Some(claimed.updated_at.as_str()));

            let stored = db.get_feed(feed.id).await.unwrap().unwrap();
            assert_eq!(stored.last_fetched_at, claimed.last_fetched_at);
        }

        #[tokio::test]
        async fn test_claim_order_is_oldest_first_with_never_fetched_leading() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let mut ids = Vec::new();
            for i in 0..4 {
                let feed = db
                    .create_feed(&format!("Feed {}", i), &format!("https://f{}.test/rss", i), user.id)
                    .await
                    .unwrap();
                ids.push(feed.id);
            }
            set_last_fetched(&db, ids[0], Some("2024-03-01T00:00:00.000000Z")).await;
            set_last_fetched(&db, ids[1], Some("2024-01-01T00:00:00.000000Z")).await;
            set_last_fetched(&db, ids[2], None).await;
            set_last_fetched(&db, ids[3], Some("2024-02-01T00:00:00.000000Z")).await;

            let mut visited = Vec::new();
            for _ in 0..4 {
                visited.push(db.claim_next_feed().await.unwrap().id);
            }
            assert_eq!(visited, vec![ids[2], ids[1], ids[3], ids[0]]);

            // Every feed comes around once more before any repeats.
            let mut second = Vec::new();
            for _ in 0..4 {
                second.push(db.claim_next_feed().await.unwrap().id);
            }
            let mut sorted = second.clone();
            sorted.sort();
            let mut all = ids.clone();
            all.sort();
            assert_eq!(sorted, all);
        }
    }

    mod follow_tests {
        use super::*;

        #[tokio::test]
        async fn test_follow_and_unfollow() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db
                .create_feed("Blog", "https://blog.test/rss", user.id)
                .await
                .unwrap();

            let follow = db.create_feed_follow(feed.id, user.id).await.unwrap();
            assert_eq!(follow.feed_name, "Blog");
            assert_eq!(follow.user_name, "alice");
            assert_eq!(follow.feed_url, "https://blog.test/rss");

            let follows = db.get_feed_follows_for_user(user.id).await.unwrap();
            assert_eq!(follows.len(), 1);

            assert!(db.delete_feed_follow(feed.id, user.id).await.unwrap());
            assert!(!db.delete_feed_follow(feed.id, user.id).await.unwrap());
            assert!(db
                .get_feed_follows_for_user(user.id)
                .await
                .unwrap()
                .is_empty());
        }

        #[tokio::test]
        async fn test_follow_twice_rejected() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let feed = db
                .create_feed("Blog", "https://blog.test/rss", user.id)
                .await
                .unwrap();
            db.create_feed_follow(feed.id, user.id).await.unwrap();

            let result = db.create_feed_follow(feed.id, user.id).await;
            assert!(matches!(result, Err(GatorError::DuplicateKey(_))));
        }
    }

    mod post_tests {
        use super::*;

        async fn setup_followed_feed(db: &Database) -> (User, Feed) {
            let user = db.create_user("alice").await.unwrap();
            let feed = db
                .create_feed("Blog", "https://blog.test/rss", user.id)
                .await
                .unwrap();
            db.create_feed_follow(feed.id, user.id).await.unwrap();
            (user, feed)
        }

        #[tokio::test]
        async fn test_create_post() {
            let db = create_test_db().await;
            let (_, feed) = setup_followed_feed(&db).await;
            let published = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

            let post = db
                .create_post(&NewPost {
                    feed_id: feed.id,
                    title: "Hello",
                    url: "https://blog.test/hello",
                    description: Some("First post"),
                    published_at: Some(published),
                })
                .await
                .unwrap();

            assert_eq!(post.title, "Hello");
            assert_eq!(post.description.as_deref(), Some("First post"));
            assert_eq!(
                post.published_at.as_deref(),
                Some("2024-05-01T12:00:00.000000Z")
            );
        }

        #[tokio::test]
        async fn test_duplicate_post_url_rejected() {
            let db = create_test_db().await;
            let (_, feed) = setup_followed_feed(&db).await;
            db.create_post(&new_post(feed.id, "https://blog.test/1"))
                .await
                .unwrap();

            let result = db.create_post(&new_post(feed.id, "https://blog.test/1")).await;
            assert!(matches!(result, Err(GatorError::DuplicateKey(_))));
            assert_eq!(db.get_posts_for_feed(feed.id).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_posts_for_user_newest_first_with_limit() {
            let db = create_test_db().await;
            let (user, feed) = setup_followed_feed(&db).await;
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

            db.create_post(&new_post(feed.id, "https://blog.test/undated"))
                .await
                .unwrap();
            for i in 1..=3 {
                let url = format!("https://blog.test/{}", i);
                db.create_post(&NewPost {
                    feed_id: feed.id,
                    title: "Dated",
                    url: &url,
                    description: None,
                    published_at: Some(base + chrono::Duration::days(i)),
                })
                .await
                .unwrap();
            }

            let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
            let urls: Vec<_> = posts.iter().map(|p| p.url.as_str()).collect();
            assert_eq!(
                urls,
                vec![
                    "https://blog.test/3",
                    "https://blog.test/2",
                    "https://blog.test/1",
                    "https://blog.test/undated",
                ]
            );
            assert_eq!(posts[0].feed_name, "Blog");

            let limited = db.get_posts_for_user(user.id, 2).await.unwrap();
            assert_eq!(limited.len(), 2);
        }

        #[tokio::test]
        async fn test_posts_for_user_only_followed_feeds() {
            let db = create_test_db().await;
            let (user, _) = setup_followed_feed(&db).await;
            let other = db
                .create_feed("Other", "https://other.test/rss", user.id)
                .await
                .unwrap();
            db.create_post(&new_post(other.id, "https://other.test/1"))
                .await
                .unwrap();

            assert!(db.get_posts_for_user(user.id, 10).await.unwrap().is_empty());
        }
    }
}
