use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One of the four sequential stages a middleware step may hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    RequestFilter,
    ResponseFilter,
    ResponseBodyFilter,
    Logging,
}

impl Phase {
    /// The wire code used by the serialization layer. `0` (Initialize) and
    /// `255` (Shutdown) are lifecycle messages, not phases, and are handled
    /// by the transport layer directly rather than through this enum.
    pub fn wire_code(self) -> u8 {
        match self {
            Phase::RequestFilter => 1,
            Phase::ResponseFilter => 2,
            Phase::ResponseBodyFilter => 3,
            Phase::Logging => 4,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Phase::RequestFilter),
            2 => Some(Phase::ResponseFilter),
            3 => Some(Phase::ResponseBodyFilter),
            4 => Some(Phase::Logging),
            _ => None,
        }
    }

    pub fn as_subject_segment(self) -> &'static str {
        match self {
            Phase::RequestFilter => "request_filter",
            Phase::ResponseFilter => "response_filter",
            Phase::ResponseBodyFilter => "response_body_filter",
            Phase::Logging => "logging",
        }
    }
}

/// Outcome flags a plugin returns alongside its response data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseTerminal {
    /// Advance to the next step in the chain (or the next phase if this was
    /// the last step).
    Next,
    /// Stop the chain for this phase; for `RequestFilter` this also skips
    /// the upstream call and uses the plugin-produced response.
    End,
    /// WebSocket upgrade — hand off to the hub; terminates the HTTP pipeline.
    Upgrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchFlags {
    pub http_end: bool,
    pub terminal: PhaseTerminal,
}

/// An ordered, case-insensitive-lookup, case-preserving-emission multi-map,
/// used for everything that needs wire-faithful header representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.push(name, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot of the inbound request as seen at the point a plugin is invoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequestSnapshot {
    pub method: String,
    pub url: String,
    pub path: String,
    pub query: String,
    pub params: HashMap<String, String>,
    pub host: String,
    pub client_ip: String,
    pub headers: HeaderMap,
    pub raw_body: Vec<u8>,
    pub bytes_count: u64,
    pub timestamp_ms: i64,
}

/// Tagged body representation carried in a response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    Raw(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Raw(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpResponseSnapshot {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub redirect: Option<String>,
    pub bytes: u64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

/// The tagged union of phase-specific payloads a dispatch call exchanges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase_data", rename_all = "snake_case")]
pub enum PhaseData {
    HttpContext {
        request: HttpRequestSnapshot,
        response: Option<HttpResponseSnapshot>,
    },
    ResponseFilter {
        status: u16,
        headers: HeaderMap,
    },
    ResponseBodyFilter {
        body_bytes: Vec<u8>,
    },
    LoggingSnapshot {
        request: HttpRequestSnapshot,
        response: HttpResponseSnapshot,
    },
}

/// The per-request mutable record carrying state across phases. Owned
/// exclusively by the phase pipeline; only immutable snapshots derived from
/// it cross the dispatch boundary, and returned deltas are merged back in a
/// single authoritative step.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pub session_id: u32,
    pub request_id: String,
    pub plugin_name: String,
    pub entry: String,
    pub http_end_flag: bool,
    pub phase_state: Phase,
    pub payload: serde_json::Value,
    pub data_bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_but_preserves_case_on_emit() {
        let mut h = HeaderMap::new();
        h.push("X-Request-Id", "abc");
        assert_eq!(h.get("x-request-id"), Some("abc"));
        assert_eq!(h.iter().next().unwrap().0, "X-Request-Id");
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut h = HeaderMap::new();
        h.push("Content-Type", "text/plain");
        h.set("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.iter().count(), 1);
    }

    #[test]
    fn phase_wire_codes_match_the_serialization_table() {
        assert_eq!(Phase::RequestFilter.wire_code(), 1);
        assert_eq!(Phase::Logging.wire_code(), 4);
        assert_eq!(Phase::from_wire_code(3), Some(Phase::ResponseBodyFilter));
        assert_eq!(Phase::from_wire_code(99), None);
    }
}
