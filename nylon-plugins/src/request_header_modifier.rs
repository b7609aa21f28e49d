//! Built-in request-header-modifier: removes then sets headers on the
//! inbound request. Values in `set` have already passed through the phase
//! pipeline's template evaluation by the time they reach `dispatch` — this
//! plugin only applies the already-rendered directives.

use async_trait::async_trait;
use nylon_core::error::NylonError;
use nylon_core::session::{DispatchFlags, Phase, PhaseData, PhaseTerminal};
use nylon_plugin::PluginHandle;
use serde::Deserialize;
use std::collections::HashMap;

pub const NAME: &str = "request-header-modifier";

#[derive(Debug, Deserialize, Default)]
struct ModifyDirectives {
    #[serde(default)]
    remove: Vec<String>,
    #[serde(default)]
    set: HashMap<String, String>,
}

pub struct RequestHeaderModifier;

#[async_trait]
impl PluginHandle for RequestHeaderModifier {
    fn name(&self) -> &str {
        NAME
    }

    async fn dispatch(
        &self,
        _entry: &str,
        phase: Phase,
        _session_id: u32,
        _request_id: &str,
        payload_bytes: &[u8],
        data_bytes: &[u8],
    ) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
        if phase != Phase::RequestFilter {
            return Err(NylonError::PluginProtocolError(format!(
                "{NAME} only handles the request_filter phase, got {phase:?}"
            )));
        }
        let directives: ModifyDirectives = serde_json::from_slice(payload_bytes).unwrap_or_default();
        let data: PhaseData = serde_json::from_slice(data_bytes)
            .map_err(|e| NylonError::PluginProtocolError(e.to_string()))?;
        let PhaseData::HttpContext { mut request, response } = data else {
            return Err(NylonError::PluginProtocolError(format!("{NAME} expects an http_context payload")));
        };

        for name in &directives.remove {
            request.headers.remove(name);
        }
        for (name, value) in &directives.set {
            request.headers.set(name.clone(), value.clone());
        }
        let _ = response;

        let reply = serde_json::to_vec(&request).map_err(|e| NylonError::PluginProtocolError(e.to_string()))?;
        Ok((DispatchFlags { http_end: false, terminal: PhaseTerminal::Next }, reply))
    }

    async fn initialize(&self, _initial_config: &serde_json::Value) -> Result<(), NylonError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), NylonError> {
        Ok(())
    }
}
