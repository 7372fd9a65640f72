//! Scripted platform for tests and offline runs

use async_trait::async_trait;
use herald_domain::{Mention, MentionQuery, Platform, PlatformError, Receipt};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A recorded outbound call
#[derive(Debug, Clone, PartialEq)]
pub enum StubCall {
    Post { text: String },
    Reply { text: String, in_reply_to: String },
    Mentions(MentionQuery),
}

#[derive(Default)]
struct StubState {
    post_results: VecDeque<Result<(), PlatformError>>,
    mention_results: VecDeque<Result<Vec<Mention>, PlatformError>>,
    calls: Vec<StubCall>,
    next_id: u64,
}

/// Platform that replays scripted results and records every call
///
/// Posts succeed with increasing IDs unless a scripted error is queued;
/// mention polls return queued batches and then nothing.
pub struct StubPlatform {
    state: Mutex<StubState>,
}

impl StubPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Queue the outcome of the next post or reply
    pub fn push_post_result(&self, result: Result<(), PlatformError>) {
        self.state().post_results.push_back(result);
    }

    /// Queue the outcome of the next mentions poll
    pub fn push_mentions(&self, result: Result<Vec<Mention>, PlatformError>) {
        self.state().mention_results.push_back(result);
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, call: StubCall, text: &str, in_reply_to: Option<&str>) -> Result<Receipt, PlatformError> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(Err(error)) = state.post_results.pop_front() {
            return Err(error);
        }

        let id = state.next_id.to_string();
        state.next_id += 1;
        Ok(Receipt {
            url: Some(format!("https://x.com/stub/status/{}", id)),
            id,
            text: text.to_string(),
            in_reply_to: in_reply_to.map(String::from),
        })
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for StubPlatform {
    async fn create_post(&self, text: &str) -> Result<Receipt, PlatformError> {
        let call = StubCall::Post {
            text: text.to_string(),
        };
        self.respond(call, text, None)
    }

    async fn create_reply(
        &self,
        text: &str,
        in_reply_to_id: &str,
    ) -> Result<Receipt, PlatformError> {
        let call = StubCall::Reply {
            text: text.to_string(),
            in_reply_to: in_reply_to_id.to_string(),
        };
        self.respond(call, text, Some(in_reply_to_id))
    }

    async fn get_mentions(&self, query: &MentionQuery) -> Result<Vec<Mention>, PlatformError> {
        let mut state = self.state();
        state.calls.push(StubCall::Mentions(query.clone()));
        state.mention_results.pop_front().unwrap_or_else(|| Ok(vec![]))
    }

    fn platform(&self) -> &'static str {
        "stub"
    }
}
