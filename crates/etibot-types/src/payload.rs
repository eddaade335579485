//! Gateway payload envelope.
//!
//! Every frame on the gateway socket is a JSON object of the shape
//! `{"op": int, "d": any, "s": int?, "t": string?}`. `t` and `s` are only
//! populated for [`OpCode::Dispatch`] frames; `t` is the wire event name
//! (e.g. `GUILD_CREATE`) used to pick a handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway opcodes understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OpCode {
    /// A named event (`t`) with a data body.
    Dispatch,
    /// Liveness probe, sent by either side.
    Heartbeat,
    /// Session start.
    Identify,
    /// Presence change from the client.
    PresenceUpdate,
    /// Voice state change from the client.
    VoiceStateUpdate,
    /// Resume a dropped session.
    Resume,
    /// The server asks the client to reconnect.
    Reconnect,
    /// Request the member list of a guild.
    RequestGuildMembers,
    /// The session is no longer valid.
    InvalidSession,
    /// First frame after connecting; carries the heartbeat interval.
    Hello,
    /// Acknowledgement of a client heartbeat.
    HeartbeatAck,
}

/// Error for opcodes outside the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown gateway opcode {0}")]
pub struct UnknownOpCode(pub u8);

impl TryFrom<u8> for OpCode {
    type Error = UnknownOpCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(UnknownOpCode(other)),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
        }
    }
}

/// One gateway frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: OpCode,
    /// Data body; shape depends on `op` and `t`.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, dispatch frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Wire event name, dispatch frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Build a dispatch frame.
    pub fn dispatch(event: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    /// Build an outbound heartbeat carrying the last seen sequence number.
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            d: last_sequence.map_or(Value::Null, Value::from),
            s: None,
            t: None,
        }
    }

    /// Whether this is a dispatch frame.
    pub fn is_dispatch(&self) -> bool {
        self.op == OpCode::Dispatch
    }

    /// The wire event name, when this is a dispatch frame that carries one.
    pub fn event_name(&self) -> Option<&str> {
        if self.is_dispatch() {
            self.t.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_dispatch_frame() {
        let raw = r#"{"op":0,"s":42,"t":"GUILD_CREATE","d":{"id":"1"}}"#;
        let payload: GatewayPayload = serde_json::from_str(raw).unwrap();
        assert!(payload.is_dispatch());
        assert_eq!(payload.s, Some(42));
        assert_eq!(payload.event_name(), Some("GUILD_CREATE"));
        assert_eq!(payload.d, json!({"id": "1"}));
    }

    #[test]
    fn non_dispatch_frames_have_no_event_name() {
        let raw = r#"{"op":10,"d":{"heartbeat_interval":41250},"t":"IGNORED"}"#;
        let payload: GatewayPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.op, OpCode::Hello);
        assert_eq!(payload.event_name(), None);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(serde_json::from_str::<GatewayPayload>(r#"{"op":5,"d":null}"#).is_err());
        assert_eq!(OpCode::try_from(200), Err(UnknownOpCode(200)));
    }

    #[test]
    fn heartbeat_serializes_sequence_or_null() {
        let with_seq = serde_json::to_value(GatewayPayload::heartbeat(Some(7))).unwrap();
        assert_eq!(with_seq, json!({"op": 1, "d": 7}));
        let without = serde_json::to_value(GatewayPayload::heartbeat(None)).unwrap();
        assert_eq!(without, json!({"op": 1, "d": null}));
    }

    #[test]
    fn opcode_numbers_are_stable() {
        for n in [0_u8, 1, 2, 3, 4, 6, 7, 8, 9, 10, 11] {
            let op = OpCode::try_from(n).unwrap();
            assert_eq!(u8::from(op), n);
        }
    }
}
