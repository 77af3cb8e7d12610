//! Bearer-token identity. Production tokens are checked against Supabase auth;
//! local runs without Supabase use a fixed token table.

use crate::error::MarketError;
use actix_web::HttpRequest;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` means the token is not valid; `Err` means the provider failed.
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>>;
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    role: Option<String>,
}

pub struct SupabaseIdentity {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseIdentity {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to verify token against {}: {}. Body: {}",
                url,
                status,
                body
            ));
        }

        let user: SupabaseUser = resp.json().await?;
        Ok(Some(AuthUser {
            is_admin: user.app_metadata.role.as_deref() == Some("admin"),
            id: user.id,
            email: user.email,
        }))
    }
}

/// Fixed `token -> user` table for local development and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentity {
    users: HashMap<String, AuthUser>,
}

impl StaticIdentity {
    /**
     * parse
     * 解析 DEV_AUTH_TOKENS："token=user_id[:admin],…"，格式不对的条目直接跳过。
     */
    pub fn parse(raw: &str) -> Self {
        let mut users = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((token, rest)) = entry.split_once('=') else {
                log::warn!("Ignoring malformed DEV_AUTH_TOKENS entry '{}'", entry);
                continue;
            };
            let (user_id, is_admin) = match rest.split_once(':') {
                Some((id, flag)) => (id.trim(), flag.trim() == "admin"),
                None => (rest.trim(), false),
            };
            if token.trim().is_empty() || user_id.is_empty() {
                continue;
            }
            users.insert(
                token.trim().to_string(),
                AuthUser {
                    id: user_id.to_string(),
                    email: None,
                    is_admin,
                },
            );
        }
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>> {
        Ok(self.users.get(token).cloned())
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn authenticate(
    req: &HttpRequest,
    identity: &dyn IdentityProvider,
) -> Result<AuthUser, MarketError> {
    let token = bearer_token(req).ok_or(MarketError::Unauthorized)?;
    identity
        .verify_token(token)
        .await?
        .ok_or(MarketError::Unauthorized)
}

/// Like `authenticate`, but a missing header yields `None` instead of an error.
pub async fn optional_user(
    req: &HttpRequest,
    identity: &dyn IdentityProvider,
) -> Result<Option<AuthUser>, MarketError> {
    match bearer_token(req) {
        Some(_) => authenticate(req, identity).await.map(Some),
        None => Ok(None),
    }
}

pub fn require_admin(user: &AuthUser) -> Result<(), MarketError> {
    if user.is_admin {
        Ok(())
    } else {
        Err(MarketError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_parse_dev_tokens() {
        let identity = StaticIdentity::parse("alice-token=alice, root=admin-1:admin, broken, =x");
        assert_eq!(identity.len(), 2);
        assert!(!identity.users["alice-token"].is_admin);
        assert!(identity.users["root"].is_admin);
        assert_eq!(identity.users["root"].id, "admin-1");
    }

    #[tokio::test]
    async fn test_authenticate_requires_known_bearer() {
        let identity = StaticIdentity::parse("t1=user-1");

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer t1"))
            .to_http_request();
        let user = authenticate(&req, &identity).await.unwrap();
        assert_eq!(user.id, "user-1");

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer nope"))
            .to_http_request();
        assert!(matches!(
            authenticate(&req, &identity).await,
            Err(MarketError::Unauthorized)
        ));

        let req = TestRequest::default().to_http_request();
        assert!(optional_user(&req, &identity).await.unwrap().is_none());
    }

    #[test]
    fn test_require_admin() {
        let user = AuthUser {
            id: "u".to_string(),
            email: None,
            is_admin: false,
        };
        assert!(matches!(require_admin(&user), Err(MarketError::Forbidden)));
    }
}
