// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API middleware components.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<Method>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS],
            allowed_headers: vec![
                "content-type".to_string(),
                "authorization".to_string(),
                "x-api-key".to_string(),
                "idempotency-key".to_string(),
            ],
        }
    }
}

impl CorsConfig {
    /// Build from the configured origin list.
    pub fn from_origins(origins: &[String]) -> Self {
        Self {
            allowed_origins: origins.to_vec(),
            ..Default::default()
        }
    }

    /// Materialize the tower-http layer.
    pub fn to_layer(&self) -> CorsLayer {
        let headers: Vec<HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        let mut layer = CorsLayer::new()
            .allow_methods(self.allowed_methods.clone())
            .allow_headers(headers);

        if self.allowed_origins.iter().any(|o| o == "*") {
            layer = layer.allow_origin(Any);
        } else {
            let origins: Vec<HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            layer = layer.allow_origin(origins);
        }

        layer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_config_default() {
        let config = CorsConfig::default();
        assert_eq!(config.allowed_origins, vec!["*"]);
        assert!(config
            .allowed_headers
            .contains(&"idempotency-key".to_string()));
    }

    #[test]
    fn test_cors_layer_creation() {
        let _ = CorsConfig::default().to_layer();
        let _ = CorsConfig::from_origins(&["https://app.example.com".to_string()]).to_layer();
    }
}
