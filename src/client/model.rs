//! Typed views of server responses.
//!
//! Responses are normalized here, once, as they cross into the client:
//! ids may arrive as `id` or `_id`, and a featured image may be a plain
//! URL or an object carrying `url`, `secure_url` or `path`.

use serde::Deserialize;
use serde_json::Value;

use super::error::ClientError;
use crate::db::{AccountStatus, Role};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default = "default_status")]
    pub status: AccountStatus,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_status() -> AccountStatus {
    AccountStatus::Active
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(deserialize_with = "author_id", alias = "author")]
    pub author_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "featured_image")]
    pub featured_image: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Tokens and account returned by login, registration and refresh.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: User,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawImage {
    Url(String),
    Object {
        url: Option<String>,
        secure_url: Option<String>,
        path: Option<String>,
    },
}

fn featured_image<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<RawImage> = Option::deserialize(deserializer)?;
    let url = match raw {
        None => None,
        Some(RawImage::Url(url)) => Some(url),
        Some(RawImage::Object {
            url,
            secure_url,
            path,
        }) => url.or(secure_url).or(path),
    };
    Ok(url.filter(|u| !u.trim().is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAuthor {
    Id(String),
    Object {
        #[serde(alias = "_id")]
        id: String,
    },
}

fn author_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match RawAuthor::deserialize(deserializer)? {
        RawAuthor::Id(id) | RawAuthor::Object { id } => id,
    })
}

/// Decode a typed value from a JSON fragment.
pub fn normalize<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, ClientError> {
    T::deserialize(value).map_err(|e| ClientError::Parse(e.to_string()))
}

/// Account from a `{"user": ...}` payload.
pub fn normalize_user(data: &Value) -> Result<User, ClientError> {
    normalize(&data["user"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_id_aliases() {
        let a: User = normalize(&json!({"id": "u1", "email": "a@x.com", "role": "user"})).unwrap();
        let b: User = normalize(&json!({"_id": "u1", "email": "a@x.com", "role": "user"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.status, AccountStatus::Active);
    }

    #[test]
    fn test_featured_image_shapes() {
        let base = json!({"id": "p1", "authorId": "u1", "title": "T"});
        let with = |image: Value| {
            let mut post = base.clone();
            post["featuredImage"] = image;
            normalize::<Post>(&post).unwrap().featured_image
        };

        assert_eq!(with(json!("https://img/a.png")), Some("https://img/a.png".into()));
        assert_eq!(with(json!({"url": "https://img/b.png"})), Some("https://img/b.png".into()));
        assert_eq!(
            with(json!({"secure_url": "https://img/c.png"})),
            Some("https://img/c.png".into())
        );
        assert_eq!(with(json!({"path": "/uploads/d.png"})), Some("/uploads/d.png".into()));
        assert_eq!(with(json!(null)), None);
        assert_eq!(with(json!({})), None);
        assert_eq!(normalize::<Post>(&base).unwrap().featured_image, None);
    }

    #[test]
    fn test_author_shapes() {
        let post: Post =
            normalize(&json!({"_id": "p1", "author": {"_id": "u9"}, "title": "T"})).unwrap();
        assert_eq!(post.id, "p1");
        assert_eq!(post.author_id, "u9");
    }

    #[test]
    fn test_missing_required_field() {
        let err = normalize::<User>(&json!({"email": "a@x.com"})).unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }
}
