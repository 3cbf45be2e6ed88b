//! Shared test doubles for agent loop tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wardclaw_core::{ChatRequest, ChatResponse, Provider, ProviderError, Usage};

/// A provider that replays a fixed sequence of responses, one per
/// `complete()` call, and records every request it saw. Panics when the
/// script runs out so a test that loops too long fails loudly.
pub(crate) struct SequentialMockProvider {
    responses: Mutex<Vec<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: Mutex<usize>,
}

impl SequentialMockProvider {
    pub(crate) fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
        }
    }

    /// Build a script from plain reply texts.
    pub(crate) fn from_scripts(scripts: &[&str]) -> Self {
        Self::new(scripts.iter().map(|s| canned_response(s)).collect())
    }

    pub(crate) fn single_text(text: &str) -> Self {
        Self::from_scripts(&[text])
    }

    pub(crate) fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Requests seen so far, oldest first.
    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut count = self.call_count.lock().unwrap();
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            panic!("SequentialMockProvider exhausted after {} calls", *count);
        }
        *count += 1;
        Ok(responses.remove(0))
    }
}

pub(crate) fn canned_response(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        model: "mock-model".to_string(),
        usage: Usage::new(10, 5),
        stop_reason: Some("end_turn".to_string()),
    }
}

/// Wraps another provider and raises a flag after a fixed number of
/// completions. Used to exercise cooperative abort mid-run.
pub(crate) struct FlagAfterCalls<P> {
    inner: P,
    flag: Arc<AtomicBool>,
    after: usize,
    seen: Mutex<usize>,
}

impl<P> FlagAfterCalls<P> {
    pub(crate) fn new(inner: P, flag: Arc<AtomicBool>, after: usize) -> Self {
        Self {
            inner,
            flag,
            after,
            seen: Mutex::new(0),
        }
    }
}

#[async_trait]
impl<P: Provider> Provider for FlagAfterCalls<P> {
    fn name(&self) -> &str {
        "flagging-mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self.inner.complete(request).await?;
        let mut seen = self.seen.lock().unwrap();
        *seen += 1;
        if *seen >= self.after {
            self.flag.store(true, Ordering::SeqCst);
        }
        Ok(response)
    }
}
