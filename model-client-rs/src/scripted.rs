// model-client-rs/src/scripted.rs
// In-process chat model that replays a scripted sequence of replies.
// Used by tests and by offline environments without a provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ChatMessage, ChatModel, ModelError};

type ScriptedReply = Result<String, ModelError>;

/// Chat model that returns pre-configured replies in order.
///
/// Once the script is exhausted it keeps returning the last configured
/// reply (or a network error when constructed empty), so long-running
/// tests do not need to count calls exactly.
pub struct ScriptedChatModel {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    calls: AtomicUsize,
}

impl ScriptedChatModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            name: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Model that always answers with the same content.
    pub fn always(content: impl Into<String>) -> Self {
        Self::new(vec![Ok(content.into())])
    }

    /// Model whose every call fails with a network error.
    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    /// Number of generate calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn clone_reply(reply: &ScriptedReply) -> ScriptedReply {
        match reply {
            Ok(content) => Ok(content.clone()),
            Err(err) => Err(ModelError::Other(err.to_string())),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<ChatMessage, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut queue = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };

        let reply = match next {
            Some(reply) => {
                let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
                *last = Some(Self::clone_reply(&reply));
                reply
            }
            None => {
                let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
                match last.as_ref() {
                    Some(reply) => Self::clone_reply(reply),
                    None => Err(ModelError::Network("scripted model has no replies".to_string())),
                }
            }
        };

        reply.map(ChatMessage::assistant)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
