//! Queue message schema
//!
//! Messages arrive as JSON:
//!
//! ```json
//! { "action": "PARENT_INFO", "body": { "externalId": "UC123" } }
//! { "action": "CHILD_INFO", "body": { "alternateKey": "https://youtu.be/abc" } }
//! ```

use crate::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One decoded queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "body")]
pub enum QueueMessage {
    #[serde(rename = "PARENT_INFO")]
    ParentInfo(MessageBody),

    #[serde(rename = "CHILD_INFO")]
    ChildInfo(MessageBody),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Handle, custom name or URL-like locator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_key: Option<String>,
}

/// What a message asks the orchestrator to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlRequest {
    ParentId(String),
    ParentKey(String),
    ChildId(String),
    ChildLocator(String),
}

impl fmt::Display for CrawlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentId(id) => write!(f, "parent {}", id),
            Self::ParentKey(key) => write!(f, "parent key {}", key),
            Self::ChildId(id) => write!(f, "child {}", id),
            Self::ChildLocator(locator) => write!(f, "child locator {}", locator),
        }
    }
}

impl QueueMessage {
    /// Decodes a raw payload
    ///
    /// Bad JSON and unknown actions are `Malformed`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| HarvestError::Malformed(format!("undecodable message: {}", e)))
    }

    /// Routes the message to a crawl request
    ///
    /// An external id takes precedence over an alternate key. A body with
    /// neither (or only blank values) is `Malformed`.
    pub fn into_request(self) -> Result<CrawlRequest> {
        let (body, action) = match self {
            Self::ParentInfo(body) => (body, "PARENT_INFO"),
            Self::ChildInfo(body) => (body, "CHILD_INFO"),
        };
        let external_id = non_blank(body.external_id);
        let alternate_key = non_blank(body.alternate_key);

        match (action, external_id, alternate_key) {
            ("PARENT_INFO", Some(id), _) => Ok(CrawlRequest::ParentId(id)),
            ("PARENT_INFO", None, Some(key)) => Ok(CrawlRequest::ParentKey(key)),
            ("CHILD_INFO", Some(id), _) => Ok(CrawlRequest::ChildId(id)),
            ("CHILD_INFO", None, Some(locator)) => Ok(CrawlRequest::ChildLocator(locator)),
            (action, _, _) => Err(HarvestError::Malformed(format!(
                "{} message without externalId or alternateKey",
                action
            ))),
        }
    }
}

/// Decodes and routes a payload in one step
pub fn decode_request(payload: &[u8]) -> Result<CrawlRequest> {
    QueueMessage::parse(payload)?.into_request()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_by_id() {
        let request =
            decode_request(br#"{"action":"PARENT_INFO","body":{"externalId":"UC123"}}"#).unwrap();
        assert_eq!(request, CrawlRequest::ParentId("UC123".to_string()));
    }

    #[test]
    fn test_parent_by_key() {
        let request =
            decode_request(br#"{"action":"PARENT_INFO","body":{"alternateKey":"@demo"}}"#).unwrap();
        assert_eq!(request, CrawlRequest::ParentKey("@demo".to_string()));
    }

    #[test]
    fn test_child_routes() {
        let by_id =
            decode_request(br#"{"action":"CHILD_INFO","body":{"externalId":"v1"}}"#).unwrap();
        assert_eq!(by_id, CrawlRequest::ChildId("v1".to_string()));

        let by_locator = decode_request(
            br#"{"action":"CHILD_INFO","body":{"alternateKey":"https://youtu.be/v1"}}"#,
        )
        .unwrap();
        assert_eq!(
            by_locator,
            CrawlRequest::ChildLocator("https://youtu.be/v1".to_string())
        );
    }

    #[test]
    fn test_external_id_wins() {
        let request = decode_request(
            br#"{"action":"CHILD_INFO","body":{"externalId":"v1","alternateKey":"x"}}"#,
        )
        .unwrap();
        assert_eq!(request, CrawlRequest::ChildId("v1".to_string()));
    }

    #[test]
    fn test_malformed_messages() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"action":"DELETE_ALL","body":{"externalId":"x"}}"#,
            br#"{"action":"PARENT_INFO","body":{}}"#,
            br#"{"action":"CHILD_INFO","body":{"externalId":"  "}}"#,
            br#"{"body":{"externalId":"x"}}"#,
        ];
        for payload in cases {
            let err = decode_request(payload).unwrap_err();
            assert!(
                matches!(err, HarvestError::Malformed(_)),
                "{:?} gave {:?}",
                String::from_utf8_lossy(payload),
                err
            );
        }
    }

    #[test]
    fn test_serialize_matches_wire_format() {
        let message = QueueMessage::ParentInfo(MessageBody {
            external_id: Some("UC1".to_string()),
            alternate_key: None,
        });
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"action":"PARENT_INFO","body":{"externalId":"UC1"}}"#
        );
    }
}
