//! Scripted reasoning channel
//!
//! Replays a fixed list of replies, one per call. Used for offline runs of the
//! CLI and as the reasoning double in tests.

use async_trait::async_trait;
use pilot_core::{ConversationMessage, PilotError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ReasoningClient;

/// One scripted reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Returned as the reply text
    Text(String),
    /// Returned as a reasoning-channel error
    Failure(String),
}

/// Reasoning client that replays a script
#[derive(Debug, Default)]
pub struct ScriptedReasoning {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<Vec<ConversationMessage>>>,
}

impl ScriptedReasoning {
    /// Script of plain-text replies
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_replies(replies.into_iter().map(|r| ScriptedReply::Text(r.into())))
    }

    pub fn from_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of reply strings
    pub fn from_json(json: &str) -> Result<Self> {
        let replies: Vec<String> = serde_json::from_str(json)?;
        Ok(Self::new(replies))
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// Replies not yet consumed
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every conversation received so far, oldest first
    pub fn requests(&self) -> Vec<Vec<ConversationMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn generate(&self, conversation: &[ConversationMessage]) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conversation.to_vec());

        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Failure(message)) => Err(PilotError::Reasoning(message)),
            None => Err(PilotError::Reasoning("reply script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_and_records_requests() {
        let script = ScriptedReasoning::from_replies([
            ScriptedReply::Text("first".into()),
            ScriptedReply::Failure("timeout".into()),
        ]);

        let conversation = [ConversationMessage::user("hello")];
        assert_eq!(script.generate(&conversation).await.unwrap(), "first");
        assert!(matches!(
            script.generate(&conversation).await,
            Err(PilotError::Reasoning(_))
        ));
        assert!(script.generate(&conversation).await.is_err());

        assert_eq!(script.requests().len(), 3);
        assert_eq!(script.remaining(), 0);
    }

    #[test]
    fn test_from_json() {
        let script = ScriptedReasoning::from_json(r#"["a", "b"]"#).unwrap();
        assert_eq!(script.remaining(), 2);
        assert!(ScriptedReasoning::from_json("{}").is_err());
    }
}
