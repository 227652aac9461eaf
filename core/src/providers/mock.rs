// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Scriptable in-memory provider for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::error::ProviderError;
use super::types::{GenerateRequest, GenerateResponse, GeneratedImage};
use super::Provider;

/// One scripted outcome for the mock provider.
pub enum MockOutcome {
    /// Succeed with this many images
    Images(usize),
    /// Fail with the given error
    Fail(ProviderError),
}

/// Provider whose responses are scripted up front. Outcomes are consumed
/// in order; once the script is empty every call succeeds with one image.
/// All received requests are recorded for assertions.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// A recorded generation call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Prompt submitted
    pub prompt: String,
    /// Endpoint tag submitted through
    pub endpoint: String,
    /// Credential id used
    pub credential_id: uuid::Uuid,
}

impl MockProvider {
    /// Create a mock that always succeeds with one image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an outcome onto the script.
    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Push `n` failures with errors produced by `make`.
    pub fn push_failures(&self, n: usize, make: impl Fn() -> ProviderError) {
        for _ in 0..n {
            self.push(MockOutcome::Fail(make()));
        }
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn images(n: usize) -> Vec<GeneratedImage> {
        (0..n)
            .map(|i| GeneratedImage::from_inline("image/png", &format!("aW1n{i:04}")))
            .collect()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        self.calls.lock().push(RecordedCall {
            prompt: request.prompt.clone(),
            endpoint: request.endpoint.clone(),
            credential_id: request.credential.id,
        });

        let outcome = self.script.lock().pop_front();
        match outcome {
            Some(MockOutcome::Fail(e)) => Err(e),
            Some(MockOutcome::Images(n)) => Ok(GenerateResponse {
                images: Self::images(n),
                model_used: request
                    .model
                    .unwrap_or_else(|| "mock-model".to_string()),
                endpoint_used: request.endpoint,
            }),
            None => Ok(GenerateResponse {
                images: Self::images(1),
                model_used: request
                    .model
                    .unwrap_or_else(|| "mock-model".to_string()),
                endpoint_used: request.endpoint,
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
