//! Conversation message type.

use serde::{Deserialize, Serialize};

/// A single message in an agent conversation.
///
/// `role` is "user" or "assistant" — the LLM API alternates between them.
/// A step's persisted history is a JSON array of these objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_round_trips_through_json() {
        let history = vec![
            Message::user("Observation:\nstdout:\nok"),
            Message::assistant("<result>{}</result>"),
        ];
        let encoded = serde_json::to_string(&history).expect("encode history");
        let decoded: Vec<Message> = serde_json::from_str(&encoded).expect("decode history");
        assert_eq!(decoded, history);
    }
}
