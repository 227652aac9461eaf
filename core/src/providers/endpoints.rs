// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Endpoint registry.
//!
//! An endpoint is a named variant of the upstream URL plus its auth
//! style (e.g. the primary API vs a proxy). Endpoints declare the models
//! they prefer to serve; the scheduler uses that to steer model-hinted
//! jobs, and the driver walks the registry order for overload fallback.

use serde::{Deserialize, Serialize};

/// How the credential secret is presented to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStyle {
    /// `?key=<secret>` appended to the URL
    Query,
    /// `Authorization: Bearer <secret>` header
    Bearer,
}

/// One named endpoint variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint tag (e.g. "primary", "proxy-a")
    pub tag: String,
    /// Base URL up to but excluding `/models/...`
    pub base_url: String,
    /// Auth presentation style
    pub auth: AuthStyle,
    /// Model used when the request carries no model hint
    pub default_model: String,
    /// Models this endpoint prefers to serve
    #[serde(default)]
    pub preferred_models: Vec<String>,
}

impl EndpointDescriptor {
    /// Whether this endpoint prefers the given model.
    pub fn prefers_model(&self, model: &str) -> bool {
        self.preferred_models.iter().any(|m| m == model)
    }
}

/// Ordered set of endpoints for one provider. Registry order doubles as
/// the overload-fallback order.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<EndpointDescriptor>,
}

impl EndpointRegistry {
    /// Build a registry from descriptors; order is preserved.
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints }
    }

    /// Look up an endpoint by tag.
    pub fn get(&self, tag: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.tag == tag)
    }

    /// All endpoint tags, in registry order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.tag.as_str())
    }

    /// All descriptors, in registry order.
    pub fn all(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    /// Fallback candidates for an overloaded endpoint: every other
    /// endpoint, in registry order.
    pub fn fallback_candidates(&self, current: &str) -> Vec<&EndpointDescriptor> {
        self.endpoints.iter().filter(|e| e.tag != current).collect()
    }

    /// Whether any endpoint prefers the given model.
    pub fn endpoint_prefers_model(&self, endpoint: &str, model: &str) -> bool {
        self.get(endpoint).is_some_and(|e| e.prefers_model(model))
    }
}
