//! Phase Pipeline: walks a request/response through the effective
//! middleware chain for a matched route+path, one plugin dispatch call per
//! step per phase, honoring each step's retry/timeout/on_error policy and
//! short-circuiting on `End`/`Upgrade`.

use nylon_core::error::NylonError;
use nylon_core::plugin_def::{OnError, PluginDefinition};
use nylon_core::route::MiddlewareStep;
use nylon_core::session::{
    DispatchFlags, HttpRequestSnapshot, HttpResponseSnapshot, Phase, PhaseData, PhaseTerminal,
};
use nylon_core::template::{self, TemplateContext};
use nylon_observability::MetricsCollector;
use nylon_plugin::PluginRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the pipeline did with a phase's worth of middleware steps.
pub enum PipelineOutcome {
    /// Every step ran to completion without ending the chain.
    Next,
    /// A step ended the chain early; here is the response to send.
    End(HttpResponseSnapshot),
    /// A step asked to hand the connection off to the WebSocket hub.
    Upgrade,
}

pub struct Pipeline<'a> {
    pub registry: &'a PluginRegistry,
    pub plugin_defs: &'a HashMap<String, PluginDefinition>,
    pub session_id: u32,
    pub request_id: String,
    pub metrics: Option<&'a Arc<MetricsCollector>>,
}

impl<'a> Pipeline<'a> {
    /// Runs `request_filter` for every `Call` step in order. The `data`
    /// snapshot is threaded through and mutated in place by each plugin's
    /// returned payload, which is interpreted as an updated
    /// `HttpRequestSnapshot` JSON document.
    pub async fn run_request_filter(
        &self,
        steps: &[MiddlewareStep],
        request: &mut HttpRequestSnapshot,
        ctx: &impl TemplateContext,
    ) -> Result<PipelineOutcome, NylonError> {
        for step in steps {
            let MiddlewareStep::Call { plugin, entry, payload_template } = step else {
                continue;
            };
            let payload = render_payload(payload_template, ctx)?;
            let data = PhaseData::HttpContext { request: request.clone(), response: None };
            let (flags, reply) = self
                .call_with_policy(plugin, entry, Phase::RequestFilter, &payload, &data)
                .await?;

            if let Ok(updated) = serde_json::from_slice::<HttpRequestSnapshot>(&reply) {
                *request = updated;
            }

            match flags.terminal {
                PhaseTerminal::Next => continue,
                PhaseTerminal::Upgrade => return Ok(PipelineOutcome::Upgrade),
                PhaseTerminal::End => {
                    let response = parse_response(&reply).unwrap_or_else(|| HttpResponseSnapshot {
                        status: 502,
                        headers: Default::default(),
                        body: nylon_core::session::ResponseBody::Raw(Vec::new()),
                        redirect: None,
                        bytes: 0,
                        duration_ms: 0,
                        error_message: None,
                    });
                    return Ok(PipelineOutcome::End(response));
                }
            }
        }
        Ok(PipelineOutcome::Next)
    }

    /// Runs `response_filter` over the upstream status/headers, then
    /// `response_body_filter` over the body, in that order, for every `Call`
    /// step.
    pub async fn run_response_filters(
        &self,
        steps: &[MiddlewareStep],
        response: &mut HttpResponseSnapshot,
        ctx: &impl TemplateContext,
    ) -> Result<PipelineOutcome, NylonError> {
        for step in steps {
            let MiddlewareStep::Call { plugin, entry, payload_template } = step else {
                continue;
            };
            let payload = render_payload(payload_template, ctx)?;
            let data = PhaseData::ResponseFilter {
                status: response.status,
                headers: response.headers.clone(),
            };
            let (flags, reply) = self
                .call_with_policy(plugin, entry, Phase::ResponseFilter, &payload, &data)
                .await?;
            if let Ok(updated) = serde_json::from_slice::<HttpResponseSnapshot>(&reply) {
                *response = updated;
            }
            if flags.terminal == PhaseTerminal::End {
                return Ok(PipelineOutcome::End(response.clone()));
            }
        }
        Ok(PipelineOutcome::Next)
    }

    pub async fn run_response_body_filter(
        &self,
        steps: &[MiddlewareStep],
        body: &mut Vec<u8>,
        ctx: &impl TemplateContext,
    ) -> Result<(), NylonError> {
        for step in steps {
            let MiddlewareStep::Call { plugin, entry, payload_template } = step else {
                continue;
            };
            let payload = render_payload(payload_template, ctx)?;
            let data = PhaseData::ResponseBodyFilter { body_bytes: body.clone() };
            let (_flags, reply) = self
                .call_with_policy(plugin, entry, Phase::ResponseBodyFilter, &payload, &data)
                .await?;
            if !reply.is_empty() {
                *body = reply;
            }
        }
        Ok(())
    }

    /// The logging phase always runs every step; a failing step is logged
    /// and does not stop the others.
    pub async fn run_logging(
        &self,
        steps: &[MiddlewareStep],
        request: &HttpRequestSnapshot,
        response: &HttpResponseSnapshot,
        ctx: &impl TemplateContext,
    ) {
        for step in steps {
            let MiddlewareStep::Call { plugin, entry, payload_template } = step else {
                continue;
            };
            let payload = match render_payload(payload_template, ctx) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(plugin = %plugin, error = %err, "logging payload template failed");
                    continue;
                }
            };
            let data = PhaseData::LoggingSnapshot { request: request.clone(), response: response.clone() };
            if let Err(err) = self
                .call_with_policy(plugin, entry, Phase::Logging, &payload, &data)
                .await
            {
                tracing::warn!(plugin = %plugin, error = %err, "logging phase plugin error (non-fatal)");
            }
        }
    }

    async fn call_with_policy(
        &self,
        plugin: &str,
        entry: &str,
        phase: Phase,
        payload: &[u8],
        data: &PhaseData,
    ) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
        let handle = self
            .registry
            .get(plugin)
            .ok_or_else(|| NylonError::PluginUnavailable(plugin.to_string()))?;
        let policy = self
            .plugin_defs
            .get(plugin)
            .map(|def| def.phase_policy(phase))
            .unwrap_or_else(|| nylon_core::plugin_def::PhasePolicy::default_for(phase));
        let data_bytes = serde_json::to_vec(data).unwrap_or_default();

        let phase_label = phase_label(phase);
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            let call = handle.dispatch(entry, phase, self.session_id, &self.request_id, payload, &data_bytes);
            let outcome = tokio::time::timeout(Duration::from_millis(policy.timeout_ms), call).await;
            let elapsed = started.elapsed().as_secs_f64();

            let err = match outcome {
                Ok(Ok(ok)) => {
                    if let Some(metrics) = self.metrics {
                        metrics.record_plugin_dispatch(plugin, phase_label, elapsed, false);
                    }
                    return Ok(ok);
                }
                Ok(Err(e)) => e,
                Err(_) => NylonError::PluginDispatchTimeout {
                    plugin: plugin.to_string(),
                    entry: entry.to_string(),
                },
            };
            if let Some(metrics) = self.metrics {
                metrics.record_plugin_dispatch(plugin, phase_label, elapsed, true);
            }

            match policy.on_error {
                OnError::Retry if attempt < policy.retries => {
                    attempt += 1;
                    tracing::warn!(plugin = %plugin, entry = %entry, attempt, "retrying plugin dispatch");
                    continue;
                }
                OnError::Retry | OnError::End => return Err(err),
                OnError::Continue => {
                    tracing::warn!(plugin = %plugin, entry = %entry, error = %err, "plugin error tolerated by policy");
                    return Ok((
                        DispatchFlags { http_end: false, terminal: PhaseTerminal::Next },
                        Vec::new(),
                    ));
                }
            }
        }
    }
}

fn render_payload(template: &serde_json::Value, ctx: &impl TemplateContext) -> Result<Vec<u8>, NylonError> {
    render_value(template, ctx).map(|v| serde_json::to_vec(&v).unwrap_or_default())
}

fn render_value(value: &serde_json::Value, ctx: &impl TemplateContext) -> Result<serde_json::Value, NylonError> {
    Ok(match value {
        serde_json::Value::String(s) => {
            serde_json::Value::String(template::render(s, ctx).map_err(|e| NylonError::TemplateEvalError(e.to_string()))?)
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_value(item, ctx)?);
            }
            serde_json::Value::Array(out)
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, ctx)?);
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    })
}

fn parse_response(bytes: &[u8]) -> Option<HttpResponseSnapshot> {
    serde_json::from_slice(bytes).ok()
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::RequestFilter => "request_filter",
        Phase::ResponseFilter => "response_filter",
        Phase::ResponseBodyFilter => "response_body_filter",
        Phase::Logging => "logging",
    }
}
