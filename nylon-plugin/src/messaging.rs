//! Remote plugin transport over a shared message bus. Requests are published
//! to `{subject_prefix}.{plugin_name}.{phase}` in a queue group named after
//! the plugin, so multiple worker processes can load-balance a plugin's
//! traffic; replies are correlated through NATS's request/reply inbox.

use crate::dispatch::PluginHandle;
use crate::wire::{WireFrame, PHASE_INITIALIZE, PHASE_SHUTDOWN};
use async_nats::Client;
use async_trait::async_trait;
use nylon_core::error::NylonError;
use nylon_core::plugin_def::RetryPolicy;
use nylon_core::session::{DispatchFlags, Phase, PhaseTerminal};
use std::time::Duration;

pub struct MessagingTransport {
    name: String,
    client: Client,
    subject_prefix: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl MessagingTransport {
    pub async fn connect(
        name: String,
        servers: &[String],
        subject_prefix: String,
        request_timeout_ms: u64,
        retry: RetryPolicy,
    ) -> Result<Self, NylonError> {
        let client = async_nats::connect(servers.join(","))
            .await
            .map_err(|e| NylonError::PluginUnavailable(format!("{name}: connect: {e}")))?;
        Ok(Self {
            name,
            client,
            subject_prefix,
            request_timeout: Duration::from_millis(request_timeout_ms),
            retry,
        })
    }

    fn subject(&self, phase_segment: &str) -> String {
        format_subject(&self.subject_prefix, &self.name, phase_segment)
    }

    async fn request_once(&self, subject: &str, frame: &WireFrame) -> Result<WireFrame, NylonError> {
        let payload = frame.encode()?;
        let reply = tokio::time::timeout(
            self.request_timeout,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .map_err(|_| NylonError::PluginDispatchTimeout {
            plugin: self.name.clone(),
            entry: frame.entry.clone(),
        })?
        .map_err(|e| NylonError::PluginProtocolError(format!("{}: {e}", self.name)))?;

        WireFrame::decode(&reply.payload)
    }

    async fn request_with_retry(
        &self,
        subject: &str,
        frame: &WireFrame,
    ) -> Result<WireFrame, NylonError> {
        let mut attempt = 0u32;
        let mut backoff = self.retry.backoff_initial_ms;
        loop {
            match self.request_once(subject, frame).await {
                Ok(reply) => return Ok(reply),
                Err(err) if attempt + 1 < self.retry.max => {
                    attempt += 1;
                    tracing::warn!(
                        plugin = %self.name,
                        attempt,
                        error = %err,
                        "plugin request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(self.retry.backoff_max_ms);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl PluginHandle for MessagingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(
        &self,
        entry: &str,
        phase: Phase,
        session_id: u32,
        request_id: &str,
        payload_bytes: &[u8],
        data_bytes: &[u8],
    ) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
        let frame = WireFrame {
            session_id,
            request_id: request_id.to_string(),
            plugin_name: self.name.clone(),
            entry: entry.to_string(),
            phase: phase.wire_code(),
            payload_json: payload_bytes.to_vec(),
            http_end: false,
            data: data_to_phase_data(data_bytes),
        };

        let subject = self.subject(phase.as_subject_segment());
        let reply = self.request_with_retry(&subject, &frame).await?;
        let terminal = if reply.http_end {
            PhaseTerminal::End
        } else {
            PhaseTerminal::Next
        };
        Ok((
            DispatchFlags { http_end: reply.http_end, terminal },
            reply.payload_json,
        ))
    }

    async fn initialize(&self, initial_config: &serde_json::Value) -> Result<(), NylonError> {
        let frame = WireFrame {
            session_id: 0,
            request_id: "lifecycle".into(),
            plugin_name: self.name.clone(),
            entry: "initialize".into(),
            phase: PHASE_INITIALIZE,
            payload_json: serde_json::to_vec(initial_config).unwrap_or_default(),
            http_end: false,
            data: None,
        };
        let subject = self.subject("initialize");
        self.request_with_retry(&subject, &frame).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), NylonError> {
        let frame = WireFrame {
            session_id: 0,
            request_id: "lifecycle".into(),
            plugin_name: self.name.clone(),
            entry: "shutdown".into(),
            phase: PHASE_SHUTDOWN,
            payload_json: Vec::new(),
            http_end: false,
            data: None,
        };
        let subject = self.subject("shutdown");
        // Best-effort: a plugin process that is already gone shouldn't stop
        // the host from tearing down.
        let _ = self.request_once(&subject, &frame).await;
        Ok(())
    }
}

fn format_subject(prefix: &str, plugin_name: &str, phase_segment: &str) -> String {
    format!("{prefix}.{plugin_name}.{phase_segment}")
}

fn data_to_phase_data(data_bytes: &[u8]) -> Option<nylon_core::session::PhaseData> {
    if data_bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(data_bytes).ok()
    }
}
