//! Typed payload decoding.
//!
//! Each event type has a serde struct describing the field spellings trace
//! producers use. Decoding yields a [`PeerEvent`], so nothing past this
//! module ever inspects raw JSON.

use std::collections::BTreeMap;
use std::time::Duration;

use humantime_serde::re::humantime;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::peer::{
    GoodbyeEvent, MeshDirection, MeshEvent, MeshKind, PeerEvent, PeerScoreSnapshot, Timestamp,
    TopicScore,
};

/// Numbers as producers emit them: JSON numbers, numeric strings or null.
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Null,
}

fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Numeric::deserialize(deserializer)? {
        Numeric::Unsigned(v) => Ok(v as f64),
        Numeric::Signed(v) => Ok(v as f64),
        Numeric::Float(v) => Ok(v),
        Numeric::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid number: {:?}", s))),
        Numeric::Null => Ok(0.0),
    }
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Numeric::deserialize(deserializer)? {
        Numeric::Unsigned(v) => Ok(v),
        Numeric::Signed(v) => {
            u64::try_from(v).map_err(|_| de::Error::custom(format!("negative code: {}", v)))
        }
        Numeric::Float(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as u64),
        Numeric::Float(v) => Err(de::Error::custom(format!("non-integral code: {}", v))),
        Numeric::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid code: {:?}", s))),
        Numeric::Null => Ok(0),
    }
}

/// Integer nanoseconds or a humantime string such as `"1m 30s"`.
fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match Numeric::deserialize(deserializer)? {
        Numeric::Unsigned(nanos) => Ok(Duration::from_nanos(nanos)),
        Numeric::Signed(_) => Ok(Duration::ZERO),
        Numeric::Float(nanos) if nanos > 0.0 => Ok(Duration::from_nanos(nanos as u64)),
        Numeric::Float(_) => Ok(Duration::ZERO),
        Numeric::Text(s) => {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(nanos) => Ok(Duration::from_nanos(nanos)),
                Err(_) => humantime::parse_duration(s).map_err(de::Error::custom),
            }
        }
        Numeric::Null => Ok(Duration::ZERO),
    }
}

/// A string, or an object wrapping one under `Value`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TextField {
    Plain(String),
    Wrapped {
        #[serde(rename = "Value", alias = "value")]
        value: String,
    },
}

impl TextField {
    fn into_string(self) -> String {
        match self {
            TextField::Plain(s) | TextField::Wrapped { value: s } => s,
        }
    }
}

fn non_empty(field: Option<TextField>) -> Option<String> {
    field
        .map(TextField::into_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
struct ConnectedPayload {
    #[serde(rename = "AgentVersion", alias = "agent_version", alias = "agentVersion", default)]
    agent_version: Option<TextField>,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    #[serde(rename = "AgentVersion", alias = "agent_version", alias = "agentVersion", default)]
    agent_version: Option<TextField>,
    #[serde(rename = "Error", alias = "error", default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TopicPayload {
    #[serde(rename = "Topic", alias = "topic", default)]
    topic: String,
    #[serde(
        rename = "TimeInMesh",
        alias = "time_in_mesh",
        default,
        deserialize_with = "de_duration"
    )]
    time_in_mesh: Duration,
    #[serde(
        rename = "FirstMessageDeliveries",
        alias = "first_message_deliveries",
        default,
        deserialize_with = "de_f64"
    )]
    first_message_deliveries: f64,
    #[serde(
        rename = "MeshMessageDeliveries",
        alias = "mesh_message_deliveries",
        default,
        deserialize_with = "de_f64"
    )]
    mesh_message_deliveries: f64,
    #[serde(
        rename = "InvalidMessageDeliveries",
        alias = "invalid_message_deliveries",
        default,
        deserialize_with = "de_f64"
    )]
    invalid_message_deliveries: f64,
}

impl From<TopicPayload> for TopicScore {
    fn from(topic: TopicPayload) -> Self {
        TopicScore {
            time_in_mesh: topic.time_in_mesh,
            first_message_deliveries: topic.first_message_deliveries,
            mesh_message_deliveries: topic.mesh_message_deliveries,
            invalid_message_deliveries: topic.invalid_message_deliveries,
        }
    }
}

/// Per-topic breakdown, keyed by topic or listed with a `Topic` field
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TopicsPayload {
    Keyed(BTreeMap<String, TopicPayload>),
    Listed(Vec<TopicPayload>),
}

impl TopicsPayload {
    fn into_scores(self) -> BTreeMap<String, TopicScore> {
        match self {
            TopicsPayload::Keyed(topics) => topics
                .into_iter()
                .map(|(topic, score)| (topic, score.into()))
                .collect(),
            TopicsPayload::Listed(topics) => topics
                .into_iter()
                .filter(|topic| !topic.topic.is_empty())
                .map(|topic| (topic.topic.clone(), topic.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScorePayload {
    #[serde(rename = "Score", alias = "score", default, deserialize_with = "de_f64")]
    score: f64,
    #[serde(
        rename = "AppSpecificScore",
        alias = "app_specific_score",
        default,
        deserialize_with = "de_f64"
    )]
    app_specific_score: f64,
    #[serde(
        rename = "IPColocationFactor",
        alias = "ip_colocation_factor",
        default,
        deserialize_with = "de_f64"
    )]
    ip_colocation_factor: f64,
    #[serde(
        rename = "BehaviourPenalty",
        alias = "behaviour_penalty",
        default,
        deserialize_with = "de_f64"
    )]
    behaviour_penalty: f64,
    #[serde(rename = "Topics", alias = "topics", default)]
    topics: Option<TopicsPayload>,
}

#[derive(Debug, Deserialize)]
struct GoodbyePayload {
    #[serde(rename = "Code", alias = "code", default, deserialize_with = "de_u64")]
    code: u64,
    #[serde(rename = "Reason", alias = "reason", default)]
    reason: Option<TextField>,
}

#[derive(Debug, Deserialize)]
struct MeshPayload {
    #[serde(rename = "Direction", alias = "direction", default)]
    direction: Option<String>,
    #[serde(rename = "Topic", alias = "topic", default)]
    topic: Option<TextField>,
    #[serde(rename = "Reason", alias = "reason", default)]
    reason: Option<TextField>,
}

/// Payloads with no fields of interest may arrive as `null`.
fn decode_struct<T: DeserializeOwned>(payload: &Value) -> serde_json::Result<T> {
    if payload.is_null() {
        T::deserialize(&Value::Object(serde_json::Map::new()))
    } else {
        T::deserialize(payload)
    }
}

pub fn decode_connect(at: Timestamp, payload: &Value) -> serde_json::Result<PeerEvent> {
    let connected: ConnectedPayload = decode_struct(payload)?;
    Ok(PeerEvent::Connect {
        at,
        agent: non_empty(connected.agent_version),
    })
}

pub fn decode_disconnect(at: Timestamp, _payload: &Value) -> serde_json::Result<PeerEvent> {
    Ok(PeerEvent::Disconnect { at })
}

pub fn decode_status(at: Timestamp, payload: &Value) -> serde_json::Result<PeerEvent> {
    let status: StatusPayload = decode_struct(payload)?;
    let error = match status.error {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };

    Ok(PeerEvent::Identify {
        at,
        agent: non_empty(status.agent_version),
        error,
    })
}

pub fn decode_score(at: Timestamp, payload: &Value) -> serde_json::Result<PeerEvent> {
    let score: ScorePayload = decode_struct(payload)?;
    Ok(PeerEvent::Score(PeerScoreSnapshot {
        timestamp: at,
        score: score.score,
        app_specific_score: score.app_specific_score,
        ip_colocation_factor: score.ip_colocation_factor,
        behaviour_penalty: score.behaviour_penalty,
        topics: score
            .topics
            .map(TopicsPayload::into_scores)
            .unwrap_or_default(),
    }))
}

pub fn decode_goodbye(at: Timestamp, payload: &Value) -> serde_json::Result<PeerEvent> {
    let goodbye: GoodbyePayload = decode_struct(payload)?;
    Ok(PeerEvent::Goodbye(GoodbyeEvent {
        timestamp: at,
        code: goodbye.code,
        reason: goodbye
            .reason
            .map(TextField::into_string)
            .unwrap_or_default(),
    }))
}

pub fn decode_mesh(
    kind: MeshKind,
    at: Timestamp,
    payload: &Value,
) -> serde_json::Result<PeerEvent> {
    let mesh: MeshPayload = decode_struct(payload)?;
    Ok(PeerEvent::Mesh(MeshEvent {
        timestamp: at,
        kind,
        direction: mesh
            .direction
            .as_deref()
            .map(MeshDirection::parse)
            .unwrap_or_default(),
        topic: mesh.topic.map(TextField::into_string).unwrap_or_default(),
        reason: mesh.reason.map(TextField::into_string).unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at() -> Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_decode_connect_agent() {
        let event = decode_connect(at(), &json!({ "PeerID": "p", "AgentVersion": "teku/v24.1" }))
            .unwrap();
        assert_eq!(
            event,
            PeerEvent::Connect { at: at(), agent: Some("teku/v24.1".to_string()) }
        );

        let bare = decode_connect(at(), &json!({ "PeerID": "p", "AgentVersion": "  " })).unwrap();
        assert_eq!(bare, PeerEvent::Connect { at: at(), agent: None });
    }

    #[test]
    fn test_decode_status_error_variants() {
        let ok = decode_status(at(), &json!({ "AgentVersion": "Lighthouse/v5", "Error": null }))
            .unwrap();
        assert_eq!(
            ok,
            PeerEvent::Identify {
                at: at(),
                agent: Some("Lighthouse/v5".to_string()),
                error: None,
            }
        );

        let failed = decode_status(at(), &json!({ "Error": "stream reset" })).unwrap();
        assert_eq!(
            failed,
            PeerEvent::Identify { at: at(), agent: None, error: Some("stream reset".to_string()) }
        );
    }

    #[test]
    fn test_decode_score_with_keyed_topics() {
        let payload = json!({
            "PeerID": "p",
            "Score": 12.5,
            "AppSpecificScore": "1.5",
            "IPColocationFactor": 0,
            "BehaviourPenalty": -2,
            "Topics": {
                "beacon_block": {
                    "TimeInMesh": 90_000_000_000u64,
                    "FirstMessageDeliveries": 4,
                    "MeshMessageDeliveries": "3.5",
                    "InvalidMessageDeliveries": 0
                }
            }
        });

        let PeerEvent::Score(score) = decode_score(at(), &payload).unwrap() else {
            panic!("expected score event");
        };
        assert_eq!(score.score, 12.5);
        assert_eq!(score.app_specific_score, 1.5);
        assert_eq!(score.behaviour_penalty, -2.0);

        let topic = &score.topics["beacon_block"];
        assert_eq!(topic.time_in_mesh, Duration::from_secs(90));
        assert_eq!(topic.first_message_deliveries, 4.0);
        assert_eq!(topic.mesh_message_deliveries, 3.5);
    }

    #[test]
    fn test_decode_score_with_listed_topics() {
        let payload = json!({
            "Score": 1,
            "Topics": [
                { "Topic": "attestation", "TimeInMesh": "1m 30s" },
                { "TimeInMesh": 5 }
            ]
        });

        let PeerEvent::Score(score) = decode_score(at(), &payload).unwrap() else {
            panic!("expected score event");
        };
        assert_eq!(score.topics.len(), 1);
        assert_eq!(score.topics["attestation"].time_in_mesh, Duration::from_secs(90));
    }

    #[test]
    fn test_decode_score_without_topics() {
        let PeerEvent::Score(score) = decode_score(at(), &json!({ "Score": 3 })).unwrap() else {
            panic!("expected score event");
        };
        assert!(score.topics.is_empty());

        let PeerEvent::Score(score) = decode_score(at(), &json!({ "Topics": null })).unwrap()
        else {
            panic!("expected score event");
        };
        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn test_decode_goodbye() {
        let event = decode_goodbye(at(), &json!({ "Code": "129", "Reason": "too many peers" }))
            .unwrap();
        assert_eq!(
            event,
            PeerEvent::Goodbye(GoodbyeEvent {
                timestamp: at(),
                code: 129,
                reason: "too many peers".to_string(),
            })
        );

        let PeerEvent::Goodbye(empty) = decode_goodbye(at(), &json!({ "Code": 1 })).unwrap() else {
            panic!("expected goodbye event");
        };
        assert_eq!(empty.reason, "");
    }

    #[test]
    fn test_decode_goodbye_rejects_bad_code() {
        assert!(decode_goodbye(at(), &json!({ "Code": "abc" })).is_err());
        assert!(decode_goodbye(at(), &json!({ "Code": -1 })).is_err());
        assert!(decode_goodbye(at(), &json!({ "Code": [1] })).is_err());
    }

    #[test]
    fn test_decode_mesh() {
        let payload = json!({
            "PeerID": "p",
            "Direction": "received",
            "Topic": "/eth2/beacon_block/ssz_snappy",
        });
        let event = decode_mesh(MeshKind::Prune, at(), &payload).unwrap();
        assert_eq!(
            event,
            PeerEvent::Mesh(MeshEvent {
                timestamp: at(),
                kind: MeshKind::Prune,
                direction: MeshDirection::Received,
                topic: "/eth2/beacon_block/ssz_snappy".to_string(),
                reason: String::new(),
            })
        );
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        assert!(decode_goodbye(at(), &json!("goodbye")).is_err());
        assert!(decode_mesh(MeshKind::Graft, at(), &json!(42)).is_err());
        assert!(decode_connect(at(), &Value::Null).is_ok());
    }
}
