//! Built-in response-header-modifier: removes then sets headers on the
//! upstream response's status/header snapshot. The body is not visible at
//! this phase — it is filtered separately in `response_body_filter` — so
//! this plugin only ever touches `status`/`headers`.

use async_trait::async_trait;
use nylon_core::error::NylonError;
use nylon_core::session::{DispatchFlags, HttpResponseSnapshot, Phase, PhaseData, PhaseTerminal, ResponseBody};
use nylon_plugin::PluginHandle;
use serde::Deserialize;
use std::collections::HashMap;

pub const NAME: &str = "response-header-modifier";

#[derive(Debug, Deserialize, Default)]
struct ModifyDirectives {
    #[serde(default)]
    remove: Vec<String>,
    #[serde(default)]
    set: HashMap<String, String>,
}

pub struct ResponseHeaderModifier;

#[async_trait]
impl PluginHandle for ResponseHeaderModifier {
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
        if phase != Phase::ResponseFilter {
            return Err(NylonError::PluginProtocolError(format!(
                "{NAME} only handles the response_filter phase, got {phase:?}"
            )));
        }
        let directives: ModifyDirectives = serde_json::from_slice(payload_bytes).unwrap_or_default();
        let data: PhaseData = serde_json::from_slice(data_bytes)
            .map_err(|e| NylonError::PluginProtocolError(e.to_string()))?;
        let PhaseData::ResponseFilter { status, mut headers } = data else {
            return Err(NylonError::PluginProtocolError(format!("{NAME} expects a response_filter payload")));
        };

        for name in &directives.remove {
            headers.remove(name);
        }
        for (name, value) in &directives.set {
            headers.set(name.clone(), value.clone());
        }

        let response = HttpResponseSnapshot {
            status,
            headers,
            body: ResponseBody::default(),
            redirect: None,
            bytes: 0,
            duration_ms: 0,
            error_message: None,
        };
        let reply = serde_json::to_vec(&response).map_err(|e| NylonError::PluginProtocolError(e.to_string()))?;
        Ok((DispatchFlags { http_end: false, terminal: PhaseTerminal::Next }, reply))
    }

    async fn initialize(&self, _initial_config: &serde_json::Value) -> Result<(), NylonError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), NylonError> {
        Ok(())
    }
}
