//! Client → Server commands

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server::topics;

/// Commands sent from a sync client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Value,
    },
}

impl ClientCommand {
    /// Subscribe to the event stream of one case
    pub fn subscribe_case(case_id: &str) -> Self {
        ClientCommand::Subscribe {
            topic: topics::case_scope(case_id),
        }
    }

    /// Unsubscribe from the event stream of one case
    pub fn unsubscribe_case(case_id: &str) -> Self {
        ClientCommand::Unsubscribe {
            topic: topics::case_scope(case_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientCommand;

    #[test]
    fn deserializes_subscribe() {
        let json = r#"{"command":"subscribe","topic":"case:c-7"}"#;
        let parsed: ClientCommand = serde_json::from_str(json).expect("parse subscribe");
        match parsed {
            ClientCommand::Subscribe { topic } => assert_eq!(topic, "case:c-7"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn roundtrip_publish() {
        let cmd = ClientCommand::Publish {
            topic: "case.updated".to_string(),
            payload: serde_json::json!({"case_id":"c-1"}),
        };

        let json = serde_json::to_string(&cmd).expect("serialize");
        assert!(json.contains(r#""command":"publish""#));
        let reparsed: ClientCommand = serde_json::from_str(&json).expect("reparse");
        assert_eq!(reparsed, cmd);
    }

    #[test]
    fn case_helpers_derive_scoped_topics() {
        assert_eq!(
            ClientCommand::subscribe_case("c-3"),
            ClientCommand::Subscribe {
                topic: "case:c-3".to_string()
            }
        );
        assert_eq!(
            ClientCommand::unsubscribe_case("c-3"),
            ClientCommand::Unsubscribe {
                topic: "case:c-3".to_string()
            }
        );
    }
}
