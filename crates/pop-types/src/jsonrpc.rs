//! JSON-RPC 2.0 envelopes exchanged with clients and peer servers.

use crate::error::PopError;
use crate::message::Message;
use crate::{IdsByChannel, MessageBatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

/// Parameters of `publish` and `broadcast`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishParams {
    pub channel: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetServerParams {
    pub public_key: String,
    pub server_address: String,
    pub client_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumorParams {
    pub sender_id: String,
    pub rumor_id: i64,
    pub messages: MessageBatch,
}

/// Query methods, tagged by `method` with their `params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Method {
    Subscribe(ChannelParams),
    Unsubscribe(ChannelParams),
    Publish(PublishParams),
    Broadcast(PublishParams),
    Catchup(ChannelParams),
    Heartbeat(IdsByChannel),
    GetMessagesById(IdsByChannel),
    GreetServer(GreetServerParams),
    Rumor(RumorParams),
}

const METHODS: &[&str] = &[
    "subscribe",
    "unsubscribe",
    "publish",
    "broadcast",
    "catchup",
    "heartbeat",
    "get_messages_by_id",
    "greet_server",
    "rumor",
];

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Publish(_) => "publish",
            Self::Broadcast(_) => "broadcast",
            Self::Catchup(_) => "catchup",
            Self::Heartbeat(_) => "heartbeat",
            Self::GetMessagesById(_) => "get_messages_by_id",
            Self::GreetServer(_) => "greet_server",
            Self::Rumor(_) => "rumor",
        }
    }

    /// Methods only peer servers may send.
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            Self::Heartbeat(_) | Self::GetMessagesById(_) | Self::GreetServer(_) | Self::Rumor(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub method: Method,
}

impl Query {
    pub fn new(id: Option<i64>, method: Method) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method,
        }
    }

    pub fn to_json(&self) -> Result<String, PopError> {
        serde_json::to_string(self).map_err(PopError::internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerError {
    pub code: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AnswerError>,
}

impl Answer {
    pub fn result(id: Option<i64>, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// The acknowledgement for queries without a payload result.
    pub fn ack(id: Option<i64>) -> Self {
        Self::result(id, Value::from(0))
    }

    pub fn error(id: Option<i64>, error: &PopError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(AnswerError {
                code: error.code(),
                description: error.to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> Result<String, PopError> {
        serde_json::to_string(self).map_err(PopError::internal)
    }
}

/// A decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Query(Query),
    Answer(Answer),
}

impl Incoming {
    /// Parses a text frame into a query or an answer.
    ///
    /// Unknown methods fail with `invalid_action`; malformed params with
    /// `invalid_message_field`.
    pub fn parse(text: &str) -> Result<Self, PopError> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(method) = value.get("method") {
            let name = method.as_str().unwrap_or_default().to_string();
            if !METHODS.contains(&name.as_str()) {
                return Err(PopError::invalid_action(format!("unknown method {name:?}")));
            }
            let query: Query = serde_json::from_value(value)
                .map_err(|e| PopError::invalid_field(format!("invalid {name} params: {e}")))?;
            return Ok(Self::Query(query));
        }

        if value.get("result").is_some() || value.get("error").is_some() {
            let answer: Answer = serde_json::from_value(value)?;
            return Ok(Self::Answer(answer));
        }

        Err(PopError::invalid_field(
            "frame is neither a query nor an answer",
        ))
    }
}
