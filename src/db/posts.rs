use serde::Serialize;
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct PostStore {
    pool: SqlitePool,
}

/// A blog post, with its author's public id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub uuid: String,
    #[serde(skip)]
    pub author_id: i64,
    #[serde(rename = "authorId")]
    pub author_uuid: String,
    pub title: String,
    pub content: String,
    pub featured_image: Option<String>,
    pub published: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Editable post fields.
#[derive(Debug, Clone, Copy)]
pub struct PostFields<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub featured_image: Option<&'a str>,
    pub published: bool,
}

const POST_SELECT: &str = "SELECT p.id, p.uuid, p.author_id, a.uuid AS author_uuid, p.title, p.content, p.featured_image, p.published, p.created_at, p.updated_at
     FROM posts p JOIN accounts a ON a.id = p.author_id";

impl PostStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new post. Returns the post UUID.
    pub async fn create(
        &self,
        author_id: i64,
        fields: PostFields<'_>,
        now: u64,
    ) -> Result<String, sqlx::Error> {
        let uuid = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO posts (uuid, author_id, title, content, featured_image, published, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&uuid)
        .bind(author_id)
        .bind(fields.title)
        .bind(fields.content)
        .bind(fields.featured_image)
        .bind(fields.published)
        .bind(now as i64)
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(uuid)
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Post>, sqlx::Error> {
        sqlx::query_as(&format!("{} WHERE p.uuid = ?", POST_SELECT))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
    }

    /// List published posts, newest first.
    pub async fn list_published(&self) -> Result<Vec<Post>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{} WHERE p.published = 1 ORDER BY p.created_at DESC, p.id DESC",
            POST_SELECT
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// List all posts by one author, newest first.
    pub async fn list_by_author(&self, author_id: i64) -> Result<Vec<Post>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{} WHERE p.author_id = ? ORDER BY p.created_at DESC, p.id DESC",
            POST_SELECT
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Update a post. Ownership is checked by the caller.
    pub async fn update(
        &self,
        uuid: &str,
        fields: PostFields<'_>,
        now: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE posts SET title = ?, content = ?, featured_image = ?, published = ?, updated_at = ?
             WHERE uuid = ?",
        )
        .bind(fields.title)
        .bind(fields.content)
        .bind(fields.featured_image)
        .bind(fields.published)
        .bind(now as i64)
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a post. Ownership is checked by the caller.
    pub async fn delete(&self, uuid: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM posts WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::PostFields;
    use crate::db::{Database, NewAccount, Role};

    async fn author(db: &Database) -> i64 {
        db.accounts()
            .create(
                NewAccount {
                    uuid: "uuid-1",
                    name: "Alice",
                    email: "a@x.com",
                    password_hash: "hash",
                    role: Role::User,
                },
                100,
            )
            .await
            .unwrap()
    }

    fn fields<'a>(title: &'a str, published: bool) -> PostFields<'a> {
        PostFields {
            title,
            content: "Hello, world!",
            featured_image: None,
            published,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_post() {
        let db = Database::open(":memory:").await.unwrap();
        let author_id = author(&db).await;

        let uuid = db
            .posts()
            .create(author_id, fields("First", true), 200)
            .await
            .unwrap();

        let post = db.posts().get_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(post.title, "First");
        assert_eq!(post.author_id, author_id);
        assert_eq!(post.author_uuid, "uuid-1");
        assert!(post.published);
        assert_eq!(post.created_at, 200);
    }

    #[tokio::test]
    async fn test_list_published_skips_drafts() {
        let db = Database::open(":memory:").await.unwrap();
        let author_id = author(&db).await;

        db.posts()
            .create(author_id, fields("Public", true), 200)
            .await
            .unwrap();
        db.posts()
            .create(author_id, fields("Draft", false), 201)
            .await
            .unwrap();

        let published = db.posts().list_published().await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].title, "Public");

        let mine = db.posts().list_by_author(author_id).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].title, "Draft");
    }

    #[tokio::test]
    async fn test_update_and_delete_post() {
        let db = Database::open(":memory:").await.unwrap();
        let author_id = author(&db).await;
        let uuid = db
            .posts()
            .create(author_id, fields("Before", false), 200)
            .await
            .unwrap();

        assert!(
            db.posts()
                .update(&uuid, fields("After", true), 300)
                .await
                .unwrap()
        );
        let post = db.posts().get_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(post.title, "After");
        assert_eq!(post.updated_at, 300);

        assert!(db.posts().delete(&uuid).await.unwrap());
        assert!(db.posts().get_by_uuid(&uuid).await.unwrap().is_none());
    }
}
