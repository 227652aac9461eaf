// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API-key authentication.
//!
//! Tenants present their key as `Authorization: Bearer <key>` or
//! `X-API-Key: <key>`. Only a salted fingerprint of the key is ever
//! stored; lookup goes through the fingerprint and the final match is
//! a constant-time MAC verification, so neither timing nor storage
//! leaks key material.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use super::error::ApiError;
use crate::database::models::Tenant;
use crate::database::repositories::TenantRepository;

type HmacSha256 = Hmac<Sha256>;

/// Compute the salted fingerprint of an API key.
pub fn api_key_fingerprint(salt: &str, api_key: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(api_key.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_fingerprint(salt: &str, api_key: &str, stored_hex: &str) -> bool {
    let Ok(stored) = hex::decode(stored_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(api_key.as_bytes());
    mac.verify_slice(&stored).is_ok()
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService {
    salt: String,
    tenants: Arc<dyn TenantRepository>,
}

impl AuthService {
    /// Create an auth service.
    pub fn new(salt: impl Into<String>, tenants: Arc<dyn TenantRepository>) -> Self {
        Self {
            salt: salt.into(),
            tenants,
        }
    }

    /// Resolve the tenant presenting credentials on this request.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Tenant, ApiError> {
        let api_key = extract_api_key(headers)
            .ok_or_else(|| ApiError::Unauthorized("missing API key".into()))?;

        let fingerprint = api_key_fingerprint(&self.salt, api_key);
        let tenant = self
            .tenants
            .find_by_fingerprint(&fingerprint)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("unknown API key".into()))?;

        // The index lookup already matched, but the decision is made by
        // a constant-time comparison.
        if !verify_fingerprint(&self.salt, api_key, &tenant.api_key_fingerprint) {
            return Err(ApiError::Unauthorized("unknown API key".into()));
        }

        Ok(tenant)
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get("authorization") {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::MemoryTenantRepository;
    use chrono::Utc;
    use uuid::Uuid;

    fn tenant_with_key(salt: &str, key: &str) -> (Tenant, Arc<MemoryTenantRepository>) {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: "acme".into(),
            api_key_fingerprint: api_key_fingerprint(salt, key),
            plan_rpm: 60,
            plan_concurrency: 5,
            webhook_url: None,
            webhook_secret: None,
            webhook_enabled: false,
            created_at: Utc::now(),
        };
        let repo = Arc::new(MemoryTenantRepository::new());
        repo.insert(tenant.clone());
        (tenant, repo)
    }

    #[test]
    fn test_fingerprint_is_stable_and_salted() {
        assert_eq!(
            api_key_fingerprint("salt", "key"),
            api_key_fingerprint("salt", "key")
        );
        assert_ne!(
            api_key_fingerprint("salt-a", "key"),
            api_key_fingerprint("salt-b", "key")
        );
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let (tenant, repo) = tenant_with_key("salt", "sk_live_1");
        let auth = AuthService::new("salt", repo);

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk_live_1".parse().unwrap());
        let resolved = auth.authenticate(&headers).await.unwrap();
        assert_eq!(resolved.id, tenant.id);
    }

    #[tokio::test]
    async fn test_x_api_key_auth() {
        let (tenant, repo) = tenant_with_key("salt", "sk_live_2");
        let auth = AuthService::new("salt", repo);

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk_live_2".parse().unwrap());
        let resolved = auth.authenticate(&headers).await.unwrap();
        assert_eq!(resolved.id, tenant.id);
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let (_, repo) = tenant_with_key("salt", "sk_live_3");
        let auth = AuthService::new("salt", repo);

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk_live_wrong".parse().unwrap());
        assert!(matches!(
            auth.authenticate(&headers).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let (_, repo) = tenant_with_key("salt", "sk_live_4");
        let auth = AuthService::new("salt", repo);
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
