#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use quillpress::{
    ServerConfig,
    clock::{Clock, ManualClock},
    create_app,
    db::{Database, NewAccount, Role},
    jwt::TokenLifetimes,
    lockout::LockoutPolicy,
    password::PasswordHasher,
    rate_limit::RateLimitSettings,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-0123456789abcdef";

/// Lowest bcrypt cost, to keep tests fast.
pub const TEST_BCRYPT_COST: u32 = 4;

pub const PASSWORD: &str = "Secret123";

pub fn test_config(db: Database, clock: Arc<ManualClock>) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        lifetimes: TokenLifetimes::default(),
        lockout: LockoutPolicy::default(),
        rate_limits: RateLimitSettings {
            login_per_minute: 1000,
            register_per_hour: 1000,
            refresh_per_minute: 1000,
        },
        bcrypt_cost: TEST_BCRYPT_COST,
        ip_header: None,
        no_signup: false,
        clock,
    }
}

/// Router over an in-memory database with a manual clock.
pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
}

/// A created account and the tokens from logging it in.
pub struct TestAccount {
    pub id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let clock = Arc::new(ManualClock::starting_now());
        let mut config = test_config(db.clone(), clock.clone());
        adjust(&mut config);
        let app = create_app(&config).expect("Failed to create app");
        Self { app, db, clock }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json("POST", uri, token, body).await
    }

    /// Insert an active account directly.
    pub async fn create_account(&self, email: &str, role: Role) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        let hash = PasswordHasher::new(TEST_BCRYPT_COST)
            .hash(PASSWORD)
            .await
            .unwrap();
        self.db
            .accounts()
            .create(
                NewAccount {
                    uuid: &uuid,
                    name: "Test",
                    email,
                    password_hash: &hash,
                    role,
                },
                self.clock.now(),
            )
            .await
            .unwrap();
        uuid
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/api/auth/login",
            None,
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Create an account and log it in.
    pub async fn account(&self, email: &str, role: Role) -> TestAccount {
        let id = self.create_account(email, role).await;
        let (status, body) = self.login(email, PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        TestAccount {
            id,
            email: email.to_string(),
            access_token: body["data"]["accessToken"].as_str().unwrap().to_string(),
            refresh_token: body["data"]["refreshToken"].as_str().unwrap().to_string(),
        }
    }
}

pub fn error_code(body: &Value) -> &str {
    body["data"]["code"].as_str().unwrap_or("")
}
