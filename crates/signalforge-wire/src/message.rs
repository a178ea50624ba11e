use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// The closed set of message types the protocol understands.
///
/// Adding a message type means adding one variant here and one decoder
/// arm in [`Payload::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Handshake,
    Data,
    Error,
    Heartbeat,
    Ack,
    AuthRequest,
    AuthResponse,
    Command,
    Response,
}

impl MessageType {
    /// Wire name of this message type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Handshake => "handshake",
            MessageType::Data => "data",
            MessageType::Error => "error",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Ack => "ack",
            MessageType::AuthRequest => "auth_request",
            MessageType::AuthResponse => "auth_response",
            MessageType::Command => "command",
            MessageType::Response => "response",
        }
    }

    /// Look up a message type by its wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "handshake" => Some(MessageType::Handshake),
            "data" => Some(MessageType::Data),
            "error" => Some(MessageType::Error),
            "heartbeat" => Some(MessageType::Heartbeat),
            "ack" => Some(MessageType::Ack),
            "auth_request" => Some(MessageType::AuthRequest),
            "auth_response" => Some(MessageType::AuthResponse),
            "command" => Some(MessageType::Command),
            "response" => Some(MessageType::Response),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a device fault. Ordered: informational is the
/// least severe, critical the most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Informational,
    Low,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertLevel::Informational => "informational",
            AlertLevel::Low => "low",
            AlertLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// One accumulated device fault, attached to outgoing heartbeats as an
/// audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFault {
    pub error_code: String,
    pub error_message: String,
    pub alert_level: AlertLevel,
    pub timestamp: DateTime<Utc>,
}

impl DeviceFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>, level: AlertLevel) -> Self {
        Self {
            error_code: code.into(),
            error_message: message.into(),
            alert_level: level,
            timestamp: Utc::now(),
        }
    }
}

/// Envelope header. Field names are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub connection_id: String,
    pub transaction_id: String,
    pub from: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
}

/// Periodic telemetry snapshot sent while a session is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub device_id: String,
    pub serial_number: String,
    pub temperature: f32,
    pub mode: String,
    pub last_maintenance: DateTime<Utc>,
    pub connection_status: String,
}

/// First handshake message: the collector announces its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    pub public_key: String,
}

/// Second handshake message: the device presents its credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub client_token: String,
}

/// Final handshake message: the collector assigns a session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthGrant {
    pub session_id: String,
}

/// Acknowledgement of a previously received envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub transaction_id: String,
}

/// Typed payload, one variant per message type.
///
/// Command, data, error and response payloads carry free-form JSON;
/// they are extension points with no fixed shape in the protocol yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Heartbeat(HeartbeatPayload),
    Handshake(ServerHello),
    AuthRequest(AuthRequest),
    AuthResponse(AuthGrant),
    Ack(AckPayload),
    Command(serde_json::Value),
    Data(serde_json::Value),
    Error(serde_json::Value),
    Response(serde_json::Value),
}

impl Payload {
    /// The message type this payload travels under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::Handshake(_) => MessageType::Handshake,
            Payload::AuthRequest(_) => MessageType::AuthRequest,
            Payload::AuthResponse(_) => MessageType::AuthResponse,
            Payload::Ack(_) => MessageType::Ack,
            Payload::Command(_) => MessageType::Command,
            Payload::Data(_) => MessageType::Data,
            Payload::Error(_) => MessageType::Error,
            Payload::Response(_) => MessageType::Response,
        }
    }

    /// Decode raw payload JSON according to the header's message type.
    pub fn decode(message_type: MessageType, raw: serde_json::Value) -> Result<Self> {
        let payload = match message_type {
            MessageType::Heartbeat => Payload::Heartbeat(serde_json::from_value(raw)?),
            MessageType::Handshake => Payload::Handshake(serde_json::from_value(raw)?),
            MessageType::AuthRequest => Payload::AuthRequest(serde_json::from_value(raw)?),
            MessageType::AuthResponse => Payload::AuthResponse(serde_json::from_value(raw)?),
            MessageType::Ack => Payload::Ack(serde_json::from_value(raw)?),
            MessageType::Command => Payload::Command(raw),
            MessageType::Data => Payload::Data(raw),
            MessageType::Error => Payload::Error(raw),
            MessageType::Response => Payload::Response(raw),
        };
        Ok(payload)
    }
}

/// One wire message: header + typed payload + optional fault list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub headers: Header,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DeviceFault>,
}

impl Envelope {
    /// Build an envelope stamped with the current time and a fresh
    /// transaction id. The header's message type is derived from the
    /// payload, so the two cannot disagree.
    pub fn new(connection_id: impl Into<String>, from: impl Into<String>, payload: Payload) -> Self {
        let transaction = NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed);
        Self {
            headers: Header {
                connection_id: connection_id.into(),
                transaction_id: format!("txn-{transaction}"),
                from: from.into(),
                message_type: payload.message_type(),
                timestamp: Utc::now(),
            },
            payload,
            errors: Vec::new(),
        }
    }

    /// Attach accumulated device faults.
    pub fn with_errors(mut self, errors: Vec<DeviceFault>) -> Self {
        self.errors = errors;
        self
    }

    /// Highest alert level among attached faults, if any.
    pub fn highest_alert(&self) -> Option<AlertLevel> {
        self.errors.iter().map(|fault| fault.alert_level).max()
    }

    /// Decode one envelope from raw JSON text.
    ///
    /// Parses the shell first, then dispatches on the header's type
    /// field. Unknown types and malformed bytes both come back as
    /// typed errors; this never panics on any input.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct Shell {
            headers: ShellHeaders,
            #[serde(default)]
            payload: serde_json::Value,
            #[serde(default)]
            errors: Vec<DeviceFault>,
        }

        #[derive(Deserialize)]
        struct ShellHeaders {
            connection_id: String,
            transaction_id: String,
            from: String,
            message_type: String,
            timestamp: DateTime<Utc>,
        }

        let shell: Shell = serde_json::from_slice(bytes)?;
        let message_type = MessageType::parse(&shell.headers.message_type)
            .ok_or_else(|| WireError::UnknownType(shell.headers.message_type.clone()))?;
        let payload = Payload::decode(message_type, shell.payload)?;

        Ok(Self {
            headers: Header {
                connection_id: shell.headers.connection_id,
                transaction_id: shell.headers.transaction_id,
                from: shell.headers.from,
                message_type,
                timestamp: shell.headers.timestamp,
            },
            payload,
            errors: shell.errors,
        })
    }

    /// Encode this envelope as compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(WireError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat_envelope() -> Envelope {
        Envelope::new(
            "sess-42",
            "oxr1234",
            Payload::Heartbeat(HeartbeatPayload {
                device_id: "oxr1234".to_string(),
                serial_number: "O2R-SN4567".to_string(),
                temperature: 35.3,
                mode: "NORMAL".to_string(),
                last_maintenance: Utc::now(),
                connection_status: "CONNECTED".to_string(),
            }),
        )
    }

    #[test]
    fn roundtrip_heartbeat() {
        let envelope = heartbeat_envelope();
        let bytes = envelope.to_json().unwrap();
        let decoded = Envelope::from_json(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn roundtrip_with_faults() {
        let envelope = heartbeat_envelope().with_errors(vec![
            DeviceFault::new("E1001", "Warning: device needs calibrated", AlertLevel::Low),
            DeviceFault::new("E7001", "Faulty Intake", AlertLevel::Critical),
        ]);
        let bytes = envelope.to_json().unwrap();
        let decoded = Envelope::from_json(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.highest_alert(), Some(AlertLevel::Critical));
    }

    #[test]
    fn roundtrip_handshake_sequence() {
        for payload in [
            Payload::Handshake(ServerHello {
                public_key: "server-pubkey".to_string(),
            }),
            Payload::AuthRequest(AuthRequest {
                client_token: "valid-client-token".to_string(),
            }),
            Payload::AuthResponse(AuthGrant {
                session_id: "sess-42".to_string(),
            }),
            Payload::Ack(AckPayload {
                transaction_id: "txn-7".to_string(),
            }),
        ] {
            let envelope = Envelope::new("", "collector", payload);
            let decoded = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn unknown_message_type_rejected() {
        let raw = br#"{"headers":{"connection_id":"c","transaction_id":"t","from":"d","message_type":"bogus","timestamp":"2026-08-25T12:00:00Z"},"payload":{}}"#;
        let err = Envelope::from_json(raw).unwrap_err();
        assert!(matches!(err, WireError::UnknownType(name) if name == "bogus"));
    }

    #[test]
    fn malformed_shell_rejected() {
        for raw in [
            b"{not-json".as_slice(),
            b"42".as_slice(),
            br#"{"payload":{}}"#.as_slice(),
            b"".as_slice(),
        ] {
            let err = Envelope::from_json(raw).unwrap_err();
            assert!(matches!(err, WireError::Malformed(_)));
        }
    }

    #[test]
    fn payload_shape_must_match_type() {
        // Well-formed shell, heartbeat type, but the payload is not a
        // heartbeat snapshot.
        let raw = br#"{"headers":{"connection_id":"c","transaction_id":"t","from":"d","message_type":"heartbeat","timestamp":"2026-08-25T12:00:00Z"},"payload":{"device_id":42}}"#;
        let err = Envelope::from_json(raw).unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[test]
    fn missing_errors_field_decodes_empty() {
        let envelope = heartbeat_envelope();
        let bytes = envelope.to_json().unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("\"errors\""));
        let decoded = Envelope::from_json(&bytes).unwrap();
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn message_type_wire_names() {
        for (ty, name) in [
            (MessageType::Handshake, "handshake"),
            (MessageType::AuthRequest, "auth_request"),
            (MessageType::AuthResponse, "auth_response"),
            (MessageType::Heartbeat, "heartbeat"),
        ] {
            assert_eq!(ty.as_str(), name);
            assert_eq!(MessageType::parse(name), Some(ty));
        }
        assert_eq!(MessageType::parse("bogus"), None);
    }

    #[test]
    fn alert_levels_are_ordered() {
        assert!(AlertLevel::Informational < AlertLevel::Low);
        assert!(AlertLevel::Low < AlertLevel::Critical);
    }

    #[test]
    fn transaction_ids_are_unique() {
        let first = Envelope::new("c", "d", Payload::Data(serde_json::json!({})));
        let second = Envelope::new("c", "d", Payload::Data(serde_json::json!({})));
        assert_ne!(first.headers.transaction_id, second.headers.transaction_id);
    }

    #[test]
    fn header_type_follows_payload() {
        let envelope = Envelope::new(
            "c",
            "d",
            Payload::AuthRequest(AuthRequest {
                client_token: "tok".to_string(),
            }),
        );
        assert_eq!(envelope.headers.message_type, MessageType::AuthRequest);
    }
}
