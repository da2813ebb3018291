//! Posts API.
//!
//! Reading published posts is public. Creating needs authentication;
//! updating and deleting also need ownership (or the admin role).

use axum::{
    Extension, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::error::{ApiError, ApiJson, ResultExt, ack, success};
use crate::auth::{
    Identity, Loaded, OptionalIdentity, Owned, authenticate, authorize_ownership,
};
use crate::db::{Database, Post, PostFields};
use crate::impl_has_auth_backend;
use crate::jwt::TokenService;

const TITLE_MAX_CHARS: usize = 200;
const CONTENT_MAX_LEN: usize = 100_000;
const IMAGE_URL_MAX_LEN: usize = 2048;

/// State for posts endpoints.
#[derive(Clone)]
pub struct PostsState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
}

impl_has_auth_backend!(PostsState);

impl Owned for Post {
    fn owner_id(&self) -> Option<&str> {
        if self.author_uuid.is_empty() {
            None
        } else {
            Some(&self.author_uuid)
        }
    }
}

pub fn router(state: PostsState) -> Router {
    let public = Router::new()
        .route("/", get(list_posts))
        .route("/{id}", get(get_post));

    let authenticated = Router::new()
        .route("/", post(create_post))
        .route("/mine", get(list_my_posts))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate::<PostsState>,
        ));

    // Layers run bottom-up: authenticate, then load, then the owner check
    let owned = Router::new()
        .route("/{id}", put(update_post).delete(delete_post))
        .route_layer(middleware::from_fn(authorize_ownership::<Post>))
        .route_layer(middleware::from_fn_with_state(state.clone(), load_post))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate::<PostsState>,
        ));

    public.merge(authenticated).merge(owned).with_state(state)
}

/// Attach the post named in the path, if it exists.
async fn load_post(
    State(state): State<PostsState>,
    Path(id): Path<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(post) = state
        .db
        .posts()
        .get_by_uuid(&id)
        .await
        .db_err("Failed to load post")?
    {
        request.extensions_mut().insert(Loaded(post));
    }
    Ok(next.run(request).await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRequest {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    featured_image: Option<String>,
    #[serde(default)]
    published: bool,
}

impl PostRequest {
    fn validate(&self) -> Result<PostFields<'_>, ApiError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ApiError::bad_request("Title is required"));
        }
        if title.chars().count() > TITLE_MAX_CHARS {
            return Err(ApiError::bad_request(format!(
                "Title cannot be longer than {} characters",
                TITLE_MAX_CHARS
            )));
        }
        if self.content.len() > CONTENT_MAX_LEN {
            return Err(ApiError::bad_request("Content is too long"));
        }

        let featured_image = self
            .featured_image
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());
        if let Some(url) = featured_image {
            if url.len() > IMAGE_URL_MAX_LEN || url::Url::parse(url).is_err() {
                return Err(ApiError::bad_request("Featured image must be a valid URL"));
            }
        }

        Ok(PostFields {
            title,
            content: &self.content,
            featured_image,
            published: self.published,
        })
    }
}

#[derive(Serialize)]
struct PostsResponse {
    posts: Vec<Post>,
}

#[derive(Serialize)]
struct PostResponse {
    post: Post,
}

async fn list_posts(State(state): State<PostsState>) -> Result<impl IntoResponse, ApiError> {
    let posts = state
        .db
        .posts()
        .list_published()
        .await
        .db_err("Failed to list posts")?;
    Ok(success(PostsResponse { posts }))
}

async fn list_my_posts(
    State(state): State<PostsState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let posts = state
        .db
        .posts()
        .list_by_author(identity.account_id)
        .await
        .db_err("Failed to list posts")?;
    Ok(success(PostsResponse { posts }))
}

/// Published posts are public. Drafts are visible to their author and admins.
async fn get_post(
    State(state): State<PostsState>,
    OptionalIdentity(identity): OptionalIdentity,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state
        .db
        .posts()
        .get_by_uuid(&id)
        .await
        .db_err("Failed to load post")?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    let visible = post.published
        || identity
            .as_ref()
            .is_some_and(|i| i.is_admin() || i.uuid == post.author_uuid);
    if !visible {
        return Err(ApiError::not_found("Post not found"));
    }

    Ok(success(PostResponse { post }))
}

async fn create_post(
    State(state): State<PostsState>,
    identity: Identity,
    ApiJson(payload): ApiJson<PostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = payload.validate()?;

    let uuid = state
        .db
        .posts()
        .create(identity.account_id, fields, state.tokens.now())
        .await
        .db_err("Failed to create post")?;

    let post = state
        .db
        .posts()
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to load post")?
        .ok_or_else(|| {
            error!(post_id = %uuid, "Post missing right after creation");
            ApiError::internal("Internal server error")
        })?;

    info!(account_id = %identity.uuid, post_id = %uuid, "Post created");
    Ok((StatusCode::CREATED, success(PostResponse { post })))
}

async fn update_post(
    State(state): State<PostsState>,
    identity: Identity,
    Extension(Loaded(post)): Extension<Loaded<Post>>,
    ApiJson(payload): ApiJson<PostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = payload.validate()?;

    let updated = state
        .db
        .posts()
        .update(&post.uuid, fields, state.tokens.now())
        .await
        .db_err("Failed to update post")?;
    if !updated {
        return Err(ApiError::not_found("Post not found"));
    }

    let post = state
        .db
        .posts()
        .get_by_uuid(&post.uuid)
        .await
        .db_err("Failed to load post")?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    info!(account_id = %identity.uuid, post_id = %post.uuid, "Post updated");
    Ok(success(PostResponse { post }))
}

async fn delete_post(
    State(state): State<PostsState>,
    identity: Identity,
    Extension(Loaded(post)): Extension<Loaded<Post>>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .posts()
        .delete(&post.uuid)
        .await
        .db_err("Failed to delete post")?;
    if !deleted {
        return Err(ApiError::not_found("Post not found"));
    }

    info!(account_id = %identity.uuid, post_id = %post.uuid, "Post deleted");
    Ok(ack())
}
