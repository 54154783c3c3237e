use crate::counts::{deserialize_counts, CountMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const FRAME_UPDATE_EVENT: &str = "frame_update";
pub const SOCKETIO_PATH: &str = "/socket.io/";
pub const ENGINEIO_VERSION: &str = "4";

/// Framing spoken on the push channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelProtocol {
    /// Engine.IO v4 / Socket.IO v5 text packets over a websocket.
    #[serde(rename = "socketio")]
    SocketIo,
    /// One `{"event": ..., "data": ...}` object per websocket text message.
    #[serde(rename = "json")]
    Json,
}

impl Default for ChannelProtocol {
    fn default() -> Self {
        Self::SocketIo
    }
}

impl ChannelProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelProtocol::SocketIo => "socketio",
            ChannelProtocol::Json => "json",
        }
    }
}

impl fmt::Display for ChannelProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelProtocol {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "socketio" | "socket.io" | "socket_io" | "sio" => Ok(ChannelProtocol::SocketIo),
            "json" | "ws" | "websocket" => Ok(ChannelProtocol::Json),
            other => Err(format!("Unknown channel protocol: {other}")),
        }
    }
}

/// Raw `frame_update` payload as the server emits it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FrameUpdatePayload {
    #[serde(default, deserialize_with = "deserialize_frame")]
    pub frame: Option<String>,
    #[serde(default, deserialize_with = "deserialize_counts")]
    pub vehicle_counts: CountMap,
    #[serde(default, deserialize_with = "deserialize_counts")]
    pub violations: CountMap,
}

impl FrameUpdatePayload {
    pub fn into_event(self) -> FrameEvent {
        let frame = match self.frame.as_deref() {
            Some(raw) => decode_frame_image(raw),
            None => FrameData::Missing,
        };
        FrameEvent {
            frame,
            vehicle_counts: self.vehicle_counts,
            violation_counts: self.violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameData {
    Image(Vec<u8>),
    /// Counts-only update.
    Missing,
    Undecodable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEvent {
    pub frame: FrameData,
    pub vehicle_counts: CountMap,
    pub violation_counts: CountMap,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl FrameEvent {
    pub fn from_value(data: Value) -> Result<Self, ChannelDecodeError> {
        match &data {
            Value::Null => return Ok(FrameUpdatePayload::default().into_event()),
            Value::Object(_) => {}
            other => {
                return Err(ChannelDecodeError::Json(format!(
                    "frame_update payload must be an object, got {}",
                    json_kind(other)
                )))
            }
        }
        let payload: FrameUpdatePayload =
            serde_json::from_value(data).map_err(|err| ChannelDecodeError::Json(err.to_string()))?;
        Ok(payload.into_event())
    }

    pub fn image(&self) -> Option<&[u8]> {
        match &self.frame {
            FrameData::Image(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Decodes a base64 JPEG, accepting an optional `data:<mime>;base64,` prefix.
pub fn decode_frame_image(raw: &str) -> FrameData {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FrameData::Missing;
    }
    let encoded = if let Some(data_url) = trimmed.strip_prefix("data:") {
        match data_url.split_once(',') {
            Some((header, body)) if header.ends_with(";base64") => body,
            _ => return FrameData::Undecodable("unsupported data url".to_string()),
        }
    } else {
        trimmed
    };
    match STANDARD.decode(encoded) {
        Ok(bytes) if bytes.is_empty() => FrameData::Missing,
        Ok(bytes) => FrameData::Image(bytes),
        Err(err) => FrameData::Undecodable(err.to_string()),
    }
}

fn deserialize_frame<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineOpen {
    #[serde(default)]
    pub sid: String,
    #[serde(default, rename = "pingInterval")]
    pub ping_interval_ms: u64,
    #[serde(default, rename = "pingTimeout")]
    pub ping_timeout_ms: u64,
}

/// One decoded message from the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Engine.IO open packet; the namespace still has to be joined.
    Handshake(EngineOpen),
    Ping(String),
    Pong,
    Connected,
    Disconnected,
    ConnectError(Option<String>),
    Event { name: String, data: Value },
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelDecodeError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine.io packet type '{0}'")]
    UnknownEnginePacket(char),
    #[error("unknown socket.io packet type '{0}'")]
    UnknownSocketPacket(char),
    #[error("binary socket.io packets are not supported")]
    Binary,
    #[error("event packet is missing its name")]
    MissingEventName,
    #[error("malformed packet json: {0}")]
    Json(String),
}

pub fn decode_message(
    protocol: ChannelProtocol,
    text: &str,
) -> Result<InboundMessage, ChannelDecodeError> {
    match protocol {
        ChannelProtocol::SocketIo => decode_socketio(text),
        ChannelProtocol::Json => decode_json_envelope(text),
    }
}

pub fn decode_socketio(text: &str) -> Result<InboundMessage, ChannelDecodeError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ChannelDecodeError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => {
            if rest.trim().is_empty() {
                return Ok(InboundMessage::Handshake(EngineOpen::default()));
            }
            let open = serde_json::from_str(rest)
                .map_err(|err| ChannelDecodeError::Json(err.to_string()))?;
            Ok(InboundMessage::Handshake(open))
        }
        '1' => Ok(InboundMessage::Disconnected),
        '2' => Ok(InboundMessage::Ping(rest.to_string())),
        '3' => Ok(InboundMessage::Pong),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(InboundMessage::Noop),
        other => Err(ChannelDecodeError::UnknownEnginePacket(other)),
    }
}

fn decode_socket_packet(packet: &str) -> Result<InboundMessage, ChannelDecodeError> {
    let mut chars = packet.chars();
    let kind = chars.next().ok_or(ChannelDecodeError::Empty)?;
    let (namespace, body) = split_namespace(chars.as_str());
    if namespace.map(|ns| ns != "/").unwrap_or(false) {
        return Ok(InboundMessage::Noop);
    }
    match kind {
        '0' => Ok(InboundMessage::Connected),
        '1' => Ok(InboundMessage::Disconnected),
        '2' => decode_event(body),
        '3' => Ok(InboundMessage::Noop),
        '4' => Ok(InboundMessage::ConnectError(connect_error_message(body))),
        '5' | '6' => Err(ChannelDecodeError::Binary),
        other => Err(ChannelDecodeError::UnknownSocketPacket(other)),
    }
}

fn split_namespace(body: &str) -> (Option<&str>, &str) {
    if !body.starts_with('/') {
        return (None, body);
    }
    match body.split_once(',') {
        Some((namespace, rest)) => (Some(namespace), rest),
        None => (Some(body), ""),
    }
}

fn decode_event(body: &str) -> Result<InboundMessage, ChannelDecodeError> {
    let json = body.trim_start_matches(|ch: char| ch.is_ascii_digit());
    let value: Value =
        serde_json::from_str(json).map_err(|err| ChannelDecodeError::Json(err.to_string()))?;
    let Value::Array(mut items) = value else {
        return Err(ChannelDecodeError::Json(
            "event packet is not an array".to_string(),
        ));
    };
    if items.is_empty() {
        return Err(ChannelDecodeError::MissingEventName);
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        _ => return Err(ChannelDecodeError::MissingEventName),
    };
    let data = if items.is_empty() {
        Value::Null
    } else {
        items.remove(0)
    };
    Ok(InboundMessage::Event { name, data })
}

fn connect_error_message(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map(|message| message.to_string()),
        Ok(Value::String(message)) => Some(message),
        _ => Some(body.to_string()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub fn decode_json_envelope(text: &str) -> Result<InboundMessage, ChannelDecodeError> {
    if text.trim().is_empty() {
        return Err(ChannelDecodeError::Empty);
    }
    let envelope: JsonEnvelope =
        serde_json::from_str(text).map_err(|err| ChannelDecodeError::Json(err.to_string()))?;
    Ok(match envelope.event.as_str() {
        "connect" => InboundMessage::Connected,
        "disconnect" => InboundMessage::Disconnected,
        "connect_error" => {
            let message = match &envelope.data {
                Value::String(message) => Some(message.clone()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(|message| message.to_string()),
                _ => None,
            };
            InboundMessage::ConnectError(message)
        }
        _ => InboundMessage::Event {
            name: envelope.event,
            data: envelope.data,
        },
    })
}

pub fn encode_namespace_connect() -> String {
    "40".to_string()
}

pub fn encode_pong(probe: &str) -> String {
    format!("3{probe}")
}

pub fn encode_socketio_event(name: &str, data: &Value) -> String {
    format!("42{}", Value::Array(vec![Value::String(name.to_string()), data.clone()]))
}

pub fn encode_json_event(name: &str, data: &Value) -> String {
    let envelope = JsonEnvelope {
        event: name.to_string(),
        data: data.clone(),
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string())
}
