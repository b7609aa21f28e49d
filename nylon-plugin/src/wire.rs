//! Framed binary encoding carrying the dispatcher between host and plugin.
//!
//! Frame layout: `[schema_version: u8][len: u32 BE][msgpack body]`. The
//! body is encoded as a MessagePack map (field names, not positional
//! indices) so a future schema version can add fields that an older reader
//! silently skips, per the forward-compatibility rule in the serialization
//! design.

use nylon_core::error::NylonError;
use nylon_core::session::PhaseData;
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u8 = 1;

/// Lifecycle phase codes that sit outside the four request-facing phases.
pub const PHASE_INITIALIZE: u8 = 0;
pub const PHASE_SHUTDOWN: u8 = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub session_id: u32,
    pub request_id: String,
    pub plugin_name: String,
    pub entry: String,
    /// 1..4 for the four phases, 0 = Initialize, 255 = Shutdown.
    pub phase: u8,
    pub payload_json: Vec<u8>,
    pub http_end: bool,
    pub data: Option<PhaseData>,
}

impl WireFrame {
    pub fn encode(&self) -> Result<Vec<u8>, NylonError> {
        let body = rmp_serde::to_vec_named(self)
            .map_err(|e| NylonError::PluginProtocolError(format!("encode: {e}")))?;
        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(SCHEMA_VERSION);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NylonError> {
        if bytes.len() < 5 {
            return Err(NylonError::PluginProtocolError("frame too short".into()));
        }
        let version = bytes[0];
        if version != SCHEMA_VERSION {
            // Forward compatibility is handled at the field level; an
            // entirely newer frame version this binary predates is still a
            // protocol error, since the framing itself could have changed.
            return Err(NylonError::PluginProtocolError(format!(
                "unsupported schema version: {version}"
            )));
        }
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let body = bytes.get(5..5 + len).ok_or_else(|| {
            NylonError::PluginProtocolError("frame length does not match buffer".into())
        })?;
        let frame: WireFrame = rmp_serde::from_slice(body)
            .map_err(|e| NylonError::PluginProtocolError(format!("decode: {e}")))?;
        if !matches!(frame.phase, PHASE_INITIALIZE | 1..=4 | PHASE_SHUTDOWN) {
            return Err(NylonError::PluginProtocolError(format!(
                "unknown phase code: {}",
                frame.phase
            )));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WireFrame {
        WireFrame {
            session_id: 42,
            request_id: "req-1".into(),
            plugin_name: "auth".into(),
            entry: "check".into(),
            phase: 1,
            payload_json: b"{}".to_vec(),
            http_end: false,
            data: None,
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let frame = sample();
        let bytes = frame.encode().unwrap();
        let decoded = WireFrame::decode(&bytes).unwrap();
        assert_eq!(decoded.session_id, 42);
        assert_eq!(decoded.plugin_name, "auth");
    }

    #[test]
    fn rejects_unknown_phase_code() {
        let mut frame = sample();
        frame.phase = 200;
        let bytes = frame.encode().unwrap();
        assert!(WireFrame::decode(&bytes).is_err());
    }

    #[test]
    fn accepts_lifecycle_phase_codes() {
        let mut frame = sample();
        frame.phase = PHASE_INITIALIZE;
        assert!(WireFrame::decode(&frame.encode().unwrap()).is_ok());
        frame.phase = PHASE_SHUTDOWN;
        assert!(WireFrame::decode(&frame.encode().unwrap()).is_ok());
    }

    #[test]
    fn rejects_truncated_frame() {
        let bytes = vec![1, 0, 0];
        assert!(WireFrame::decode(&bytes).is_err());
    }
}
