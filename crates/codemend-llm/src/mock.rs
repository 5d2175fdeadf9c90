//! Scripted LLM client for tests and examples.

use std::collections::VecDeque;
use std::sync::Mutex;

use codemend_core::types::Message;

use crate::{LlmApi, LlmError};

/// One request observed by the scripted client.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
}

/// LLM client that replays a queue of scripted outcomes and records
/// every request it receives. When the script runs dry it returns an
/// HTTP-style error so a runaway loop fails fast instead of spinning.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: LlmError) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmApi for ScriptedLlm {
    async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                model: model.to_string(),
                system: system.to_string(),
                messages: messages.to_vec(),
            });
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Http("scripted replies exhausted".to_string())))
    }
}
