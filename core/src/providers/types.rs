// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared request/response types for provider drivers.

use crate::credentials::Credential;
use crate::jobs::{AspectRatio, GenerationMode, Resolution};

/// One generation request, fully resolved by the executor.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// The credential to authenticate with (already scheduled)
    pub credential: Credential,
    /// Endpoint tag to submit through; drivers may fall back to other
    /// endpoints on overload when enabled
    pub endpoint: String,
    /// Prompt text
    pub prompt: String,
    /// Optional reference image as a `data:image/...;base64,...` URL
    pub reference_image: Option<String>,
    /// Generation mode, determining sampling temperature
    pub mode: GenerationMode,
    /// Optional resolution tier
    pub resolution: Option<Resolution>,
    /// Optional aspect ratio
    pub aspect_ratio: Option<AspectRatio>,
    /// Optional number of images (1..=10)
    pub sample_count: Option<i32>,
    /// Optional model override; endpoint default applies otherwise
    pub model: Option<String>,
}

/// One produced image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// `data:<mime>;base64,<data>` URL carrying the image bytes
    pub url: String,
    /// MIME type reported by the provider
    pub mime: String,
}

impl GeneratedImage {
    /// Build from raw base64 payload and MIME type.
    pub fn from_inline(mime: &str, data: &str) -> Self {
        Self {
            url: format!("data:{mime};base64,{data}"),
            mime: mime.to_string(),
        }
    }
}

/// A successful generation result.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Produced images, in provider order
    pub images: Vec<GeneratedImage>,
    /// Model that actually served the request
    pub model_used: String,
    /// Endpoint that actually served the request (may differ from the
    /// requested one after overload fallback)
    pub endpoint_used: String,
}
