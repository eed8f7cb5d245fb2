//! Wire types of the Flow Access REST API. Unsigned integers are transported
//! as decimal strings.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub header: BlockHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(deserialize_with = "u64_from_string")]
    pub height: u64,
}

/// Events of one block matching the requested type.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockEvents {
    #[serde(deserialize_with = "u64_from_string")]
    pub block_height: u64,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction_id: String,
    #[serde(deserialize_with = "u64_from_string")]
    pub event_index: u64,
    /// Base64-encoded JSON-Cadence value.
    pub payload: String,
}

fn u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_encoded_heights() {
        let blocks: Vec<BlockResponse> = serde_json::from_value(json!([
            {"header": {"id": "abc", "parent_id": "def", "height": "2000", "timestamp": "t"}}
        ]))
        .unwrap();
        assert_eq!(blocks[0].header.height, 2000);

        let events: Vec<BlockEvents> = serde_json::from_value(json!([
            {"block_id": "abc", "block_height": 1001, "block_timestamp": "t", "events": [
                {"type": "A.01.C.E", "transaction_id": "tx", "transaction_index": "2", "event_index": "1", "payload": "e30="}
            ]},
            {"block_id": "def", "block_height": "1002", "events": []}
        ]))
        .unwrap();
        assert_eq!(events[0].block_height, 1001);
        assert_eq!(events[0].events[0].event_index, 1);
        assert_eq!(events[0].events[0].transaction_id, "tx");
        assert!(events[1].events.is_empty());
    }

    #[test]
    fn rejects_non_numeric_height() {
        let result: Result<BlockHeader, _> =
            serde_json::from_value(json!({"id": "abc", "height": "tall"}));
        assert!(result.is_err());
    }
}
