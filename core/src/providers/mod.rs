// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provider drivers for the upstream generative API.
//!
//! The [`Provider`] trait is the seam between the executor and the
//! upstream model. The production driver is [`GeminiProvider`]; tests
//! use [`MockProvider`]. Drivers never select credentials — they use
//! the one handed to them by the scheduler.

pub mod endpoints;
pub mod error;
pub mod gemini;
pub mod mock;
pub mod types;

pub use endpoints::{AuthStyle, EndpointDescriptor, EndpointRegistry};
pub use error::ProviderError;
pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use types::{GenerateRequest, GenerateResponse, GeneratedImage};

use async_trait::async_trait;

/// A driver for one upstream generative API.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Submit one generation request and parse the produced images.
    async fn generate(&self, request: GenerateRequest)
        -> Result<GenerateResponse, ProviderError>;

    /// Provider tag, matching `Credential::provider`.
    fn name(&self) -> &str;
}
