//! Glues the router, per-service load balancers, health registry, and phase
//! pipeline together behind pingora's `ProxyHttp` trait — the single seam
//! pingora calls into for every request.

use crate::load_balancer::UpstreamPool;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::static_files;
use async_trait::async_trait;
use bytes::Bytes;
use nylon_core::error::NylonError;
use nylon_core::plugin_def::PluginDefinition;
use nylon_core::route::{MiddlewareStep, Path as RoutePath, Route};
use nylon_core::router::Router;
use nylon_core::service::Service;
use nylon_core::session::{HeaderMap as SnapshotHeaders, HttpRequestSnapshot, HttpResponseSnapshot, ResponseBody};
use nylon_core::template::TemplateContext;
use nylon_observability::MetricsCollector;
use nylon_plugin::PluginRegistry;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Error as PingoraError;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Everything a request needs to resolve a route to a live backend and to
/// walk it through the middleware chain: the router itself plus, per
/// service, a load balancer (for `Service::Http`) or nothing (`Plugin`/
/// `Static` resolve directly).
pub struct AppState {
    pub router: Arc<Router>,
    pub services: HashMap<String, Service>,
    pub pools: HashMap<String, UpstreamPool>,
    pub plugin_defs: HashMap<String, PluginDefinition>,
    pub plugin_registry: Arc<PluginRegistry>,
    /// Address of the websocket hub's own listener. A request whose phase
    /// pipeline returns `PipelineOutcome::Upgrade` is proxied here exactly
    /// like a `Service::Http` route, rather than terminating the protocol
    /// upgrade inside this hook.
    pub ws_listen: String,
    pub metrics: Arc<MetricsCollector>,
}

pub struct NylonProxy {
    pub state: Arc<arc_swap::ArcSwap<AppState>>,
    session_counter: AtomicU32,
}

impl NylonProxy {
    /// Takes a shared `ArcSwap` rather than owning one outright so the
    /// caller can keep a clone and publish a rebuilt `AppState` (router,
    /// pools, plugin registry) from a config-reload task without needing a
    /// handle back into the pingora service itself.
    pub fn new(state: Arc<arc_swap::ArcSwap<AppState>>) -> Self {
        Self { state, session_counter: AtomicU32::new(0) }
    }
}

/// Per-request scratch space threaded through the pingora hooks.
#[derive(Default)]
pub struct RequestCtx {
    route: Option<Arc<Route>>,
    path: Option<RoutePath>,
    params: Vec<(String, String)>,
    request_snapshot: Option<HttpRequestSnapshot>,
    response_snapshot: Option<HttpResponseSnapshot>,
    ended_early: bool,
    ws_upgrade: bool,
    session_id: u32,
    request_id: String,
    body_buffer: Vec<u8>,
    started_at: Option<std::time::Instant>,
}

struct SnapshotCtx<'a> {
    request: &'a HttpRequestSnapshot,
    params: &'a [(String, String)],
}

impl<'a> TemplateContext for SnapshotCtx<'a> {
    fn header(&self, name: &str) -> Option<String> {
        self.request.headers.get(name).map(str::to_string)
    }
    fn query(&self, name: &str) -> Option<String> {
        self.request.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then(|| v.to_string())
        })
    }
    fn cookie(&self, name: &str) -> Option<String> {
        let raw = self.request.headers.get("cookie")?;
        raw.split(';').find_map(|kv| {
            let (k, v) = kv.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }
    fn param(&self, name: &str) -> Option<String> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }
    fn request_field(&self, field: &str) -> Option<String> {
        match field {
            "method" => Some(self.request.method.clone()),
            "path" => Some(self.request.path.clone()),
            "host" => Some(self.request.host.clone()),
            "client_ip" => Some(self.request.client_ip.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl ProxyHttp for NylonProxy {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> pingora_core::Result<bool> {
        ctx.session_id = self.session_counter.fetch_add(1, Ordering::Relaxed);
        ctx.request_id = format!("{:x}-{}", ctx.session_id, now_ms());
        ctx.started_at = Some(std::time::Instant::now());

        let state = self.state.load();

        // Pull everything needed out of the request header up front as owned
        // values: `session` needs to be borrowed mutably below to write an
        // error response, which can't overlap with a borrow of its header.
        let (method, path, query, url, host, header_pairs, client_ip) = {
            let header = session.req_header();
            let headers: Vec<(String, String)> = header
                .headers
                .iter()
                .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let host = headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("host"))
                .map(|(_, v)| v.clone());
            (
                header.method.as_str().to_string(),
                header.uri.path().to_string(),
                header.uri.query().unwrap_or_default().to_string(),
                header.uri.to_string(),
                host,
                headers,
                session.client_addr().map(|a| a.to_string()).unwrap_or_default(),
            )
        };

        let Some(route_match) = state.router.match_route(&method, &path, host.as_deref(), |name| {
            header_pairs.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
        }) else {
            respond_error(session, NylonError::RouteNotFound).await?;
            return Ok(true);
        };

        let route_path = route_match.route.paths[route_match.path_index].clone();
        if !route_path.method_allowed(&method) {
            respond_error(session, NylonError::RouteNotFound).await?;
            return Ok(true);
        }

        let mut snapshot = HttpRequestSnapshot {
            method: method.clone(),
            url,
            path: path.clone(),
            query,
            params: route_match.params.iter().cloned().collect(),
            host: host.unwrap_or_default(),
            client_ip,
            headers: SnapshotHeaders::new(),
            raw_body: Vec::new(),
            bytes_count: 0,
            timestamp_ms: now_ms(),
        };
        for (name, value) in &header_pairs {
            snapshot.headers.push(name.clone(), value.clone());
        }

        ctx.params = route_match.params.clone();
        ctx.route = Some(Arc::clone(&route_match.route));
        ctx.path = Some(route_path.clone());

        let mut effective_steps = route_match.route.middleware.clone();
        effective_steps.extend(route_path.middleware.clone());
        let effective_steps = expand_call_steps(effective_steps, &state.plugin_defs);

        let pipeline = Pipeline {
            registry: &state.plugin_registry,
            plugin_defs: &state.plugin_defs,
            session_id: ctx.session_id,
            request_id: ctx.request_id.clone(),
            metrics: Some(&state.metrics),
        };
        let template_ctx = SnapshotCtx { request: &snapshot, params: &ctx.params };
        match pipeline.run_request_filter(&effective_steps, &mut snapshot, &template_ctx).await {
            Ok(PipelineOutcome::Next) => {}
            Ok(PipelineOutcome::End(resp)) => {
                send_snapshot_response(session, &resp).await?;
                ctx.ended_early = true;
                ctx.request_snapshot = Some(snapshot);
                ctx.response_snapshot = Some(resp);
                return Ok(true);
            }
            Ok(PipelineOutcome::Upgrade) => {
                // Hand the connection to the websocket hub's own listener
                // the same way a Service::Http route reaches its backend:
                // pingora forwards the 101 response and the subsequent
                // frames transparently once upstream_peer names a target.
                ctx.request_snapshot = Some(snapshot);
                ctx.ws_upgrade = true;
                return Ok(false);
            }
            Err(err) => {
                respond_error(session, err).await?;
                ctx.ended_early = true;
                return Ok(true);
            }
        }

        ctx.request_snapshot = Some(snapshot);

        let service = service_for(&state, &route_path);
        match service {
            Service::Static { .. } => {
                try_serve_static(session, service, &path).await?;
                ctx.ended_early = true;
                Ok(true)
            }
            Service::Plugin { .. } => {
                // A plugin service has no upstream; the request_filter chain
                // above is expected to have already produced a terminal
                // response for routes pointed at one. Anything reaching here
                // is a misconfiguration rather than a hot-path case.
                respond_error(session, NylonError::ConfigError(format!(
                    "route resolves to plugin service '{}' with no terminating middleware step",
                    service.name()
                )))
                .await?;
                ctx.ended_early = true;
                Ok(true)
            }
            Service::Http { .. } => Ok(false),
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> pingora_core::Result<Box<HttpPeer>> {
        let state = self.state.load();

        if ctx.ws_upgrade {
            return Ok(Box::new(HttpPeer::new(state.ws_listen.clone(), false, String::new())));
        }

        let path = ctx.path.as_ref().expect("route resolved before upstream_peer");
        let service = state
            .services
            .get(&path.service_ref)
            .ok_or_else(|| pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "service missing"))?;

        match service {
            Service::Http { name, hash_key, .. } => {
                let pool = state
                    .pools
                    .get(name)
                    .ok_or_else(|| pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "pool missing"))?;
                let key = match hash_key {
                    Some(template) => {
                        let request = ctx.request_snapshot.as_ref().expect("request snapshot set");
                        let template_ctx = SnapshotCtx { request, params: &ctx.params };
                        nylon_core::template::render(template, &template_ctx)
                            .unwrap_or_default()
                            .into_bytes()
                    }
                    None => ctx.request_id.clone().into_bytes(),
                };
                let backend = pool.select(&key).ok_or_else(|| {
                    pingora_core::Error::explain(pingora_core::ErrorType::ConnectNoRoute, "no healthy upstream")
                })?;
                state.metrics.record_lb_selection(name, &backend.addr.to_string());
                let peer = backend
                    .ext
                    .get::<HttpPeer>()
                    .cloned()
                    .unwrap_or_else(|| HttpPeer::new(backend.addr.to_string(), false, String::new()));
                Ok(Box::new(peer))
            }
            _ => Err(pingora_core::Error::explain(
                pingora_core::ErrorType::InternalError,
                "upstream_peer called for a non-http service",
            )),
        }
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> pingora_core::Result<()> {
        if let Some(request) = &ctx.request_snapshot {
            upstream_request
                .insert_header("x-request-id", ctx.request_id.as_str())
                .ok();
            upstream_request.insert_header("x-forwarded-for", request.client_ip.as_str()).ok();
        }
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> pingora_core::Result<()> {
        if ctx.ended_early || ctx.ws_upgrade {
            return Ok(());
        }
        let state = self.state.load();
        let Some(route) = &ctx.route else { return Ok(()) };
        let Some(path) = &ctx.path else { return Ok(()) };

        let mut response = HttpResponseSnapshot {
            status: upstream_response.status.as_u16(),
            headers: SnapshotHeaders::new(),
            body: ResponseBody::default(),
            redirect: None,
            bytes: 0,
            duration_ms: 0,
            error_message: None,
        };
        for (name, value) in upstream_response.headers.iter() {
            response.headers.push(name.as_str(), value.to_str().unwrap_or_default());
        }

        let mut steps = route.middleware.clone();
        steps.extend(path.middleware.clone());
        let steps = expand_call_steps(steps, &state.plugin_defs);

        let pipeline = Pipeline {
            registry: &state.plugin_registry,
            plugin_defs: &state.plugin_defs,
            session_id: ctx.session_id,
            request_id: ctx.request_id.clone(),
            metrics: Some(&state.metrics),
        };
        let request = ctx.request_snapshot.clone().unwrap_or_default();
        let template_ctx = SnapshotCtx { request: &request, params: &ctx.params };
        if let Ok(PipelineOutcome::Next) = pipeline.run_response_filters(&steps, &mut response, &template_ctx).await {
            upstream_response.set_status(response.status).ok();
            for (name, value) in response.headers.iter() {
                upstream_response.insert_header(name.clone(), value.clone()).ok();
            }
        }
        ctx.response_snapshot = Some(response);
        Ok(())
    }

    /// Runs `response_body_filter` once the full body has streamed through.
    /// This hook is synchronous in pingora's trait, so the body is buffered
    /// across calls and the (async) plugin chain runs via `block_in_place`
    /// only on the final chunk, rather than per chunk.
    fn response_body_filter(
        &self,
        _session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> pingora_core::Result<Option<std::time::Duration>> {
        if ctx.ended_early || ctx.ws_upgrade {
            return Ok(None);
        }
        if let Some(chunk) = body.take() {
            ctx.body_buffer.extend_from_slice(&chunk);
        }
        if !end_of_stream {
            return Ok(None);
        }

        let (Some(route), Some(path)) = (&ctx.route, &ctx.path) else {
            *body = Some(Bytes::from(std::mem::take(&mut ctx.body_buffer)));
            return Ok(None);
        };
        let state = self.state.load();
        let mut steps = route.middleware.clone();
        steps.extend(path.middleware.clone());
        let steps = expand_call_steps(steps, &state.plugin_defs);
        if steps.is_empty() {
            *body = Some(Bytes::from(std::mem::take(&mut ctx.body_buffer)));
            return Ok(None);
        }

        let pipeline = Pipeline {
            registry: &state.plugin_registry,
            plugin_defs: &state.plugin_defs,
            session_id: ctx.session_id,
            request_id: ctx.request_id.clone(),
            metrics: Some(&state.metrics),
        };
        let request = ctx.request_snapshot.clone().unwrap_or_default();
        let template_ctx = SnapshotCtx { request: &request, params: &ctx.params };
        let mut buffer = std::mem::take(&mut ctx.body_buffer);
        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(pipeline.run_response_body_filter(&steps, &mut buffer, &template_ctx))
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "response body filter failed, forwarding body unmodified");
        }
        *body = Some(Bytes::from(buffer));
        Ok(None)
    }

    async fn logging(&self, _session: &mut Session, _e: Option<&PingoraError>, ctx: &mut Self::CTX) {
        if let (Some(request), Some(response)) = (&ctx.request_snapshot, &ctx.response_snapshot) {
            let state = self.state.load();
            let elapsed = ctx.started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
            state.metrics.record_request(&request.path, response.status, elapsed);
            if let Some(route) = &ctx.route {
                let Some(path) = &ctx.path else { return };
                let mut steps = route.middleware.clone();
                steps.extend(path.middleware.clone());
                let steps = expand_call_steps(steps, &state.plugin_defs);
                let pipeline = Pipeline {
                    registry: &state.plugin_registry,
                    plugin_defs: &state.plugin_defs,
                    session_id: ctx.session_id,
                    request_id: ctx.request_id.clone(),
                    metrics: Some(&state.metrics),
                };
                let template_ctx = SnapshotCtx { request, params: &ctx.params };
                pipeline.run_logging(&steps, request, response, &template_ctx).await;
            }
        }
    }
}

fn service_for<'a>(state: &'a AppState, path: &RoutePath) -> &'a Service {
    state.services.get(&path.service_ref).expect("route references a validated service")
}

/// `MiddlewareStep::Group` never survives config compilation, but defensive
/// code here costs nothing and keeps this module independent of when group
/// expansion runs relative to router compilation.
fn expand_call_steps(steps: Vec<MiddlewareStep>, _defs: &HashMap<String, PluginDefinition>) -> Vec<MiddlewareStep> {
    steps.into_iter().filter(|s| matches!(s, MiddlewareStep::Call { .. })).collect()
}

async fn respond_error(session: &mut Session, err: NylonError) -> pingora_core::Result<()> {
    let status = err.status_code();
    let body = err.to_json_body();
    let mut header = ResponseHeader::build(status, None).map_err(|_| {
        pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "failed to build error response")
    })?;
    header.insert_header("content-type", "application/json").ok();
    header.insert_header("content-length", body.len().to_string()).ok();
    session
        .write_response_header(Box::new(header), false)
        .await?;
    session.write_response_body(Some(Bytes::from(body)), true).await?;
    Ok(())
}

async fn send_snapshot_response(session: &mut Session, resp: &HttpResponseSnapshot) -> pingora_core::Result<()> {
    let body = match &resp.body {
        ResponseBody::Raw(bytes) => bytes.clone(),
        ResponseBody::Text(text) => text.clone().into_bytes(),
        ResponseBody::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
    };
    let mut header = ResponseHeader::build(resp.status, None).map_err(|_| {
        pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "failed to build plugin response")
    })?;
    for (name, value) in resp.headers.iter() {
        header.insert_header(name.clone(), value.clone()).ok();
    }
    header.insert_header("content-length", body.len().to_string()).ok();
    session.write_response_header(Box::new(header), false).await?;
    session.write_response_body(Some(Bytes::from(body)), true).await?;
    Ok(())
}

/// Serves a matched `Service::Static` directly, bypassing the upstream-peer
/// hook entirely — called from `request_filter` before falling through to
/// proxying when the resolved service is static.
pub async fn try_serve_static(session: &mut Session, service: &Service, request_path: &str) -> pingora_core::Result<bool> {
    let Service::Static { root, index, spa, .. } = service else { return Ok(false) };

    let (range, if_none_match) = {
        let header = session.req_header();
        let range = header.headers.get("range").and_then(|v| v.to_str().ok()).map(str::to_string);
        let if_none_match = header.headers.get("if-none-match").and_then(|v| v.to_str().ok()).map(str::to_string);
        (range, if_none_match)
    };

    match static_files::serve(root, index, *spa, request_path, range.as_deref(), if_none_match.as_deref()).await {
        Ok(static_files::StaticResponse::Full(file)) => {
            let mut header = ResponseHeader::build(200, None).map_err(|_| {
                pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "failed to build static response")
            })?;
            header.insert_header("content-type", file.content_type).ok();
            header.insert_header("content-length", file.body.len().to_string()).ok();
            header.insert_header("etag", file.etag).ok();
            header.insert_header("accept-ranges", "bytes").ok();
            session.write_response_header(Box::new(header), false).await?;
            session.write_response_body(Some(Bytes::from(file.body)), true).await?;
            Ok(true)
        }
        Ok(static_files::StaticResponse::Partial { file, range }) => {
            let mut header = ResponseHeader::build(206, None).map_err(|_| {
                pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "failed to build static response")
            })?;
            header.insert_header("content-type", file.content_type).ok();
            header.insert_header("content-length", file.body.len().to_string()).ok();
            header.insert_header("content-range", format!("bytes {}-{}/{}", range.start, range.end, file.total_len)).ok();
            header.insert_header("etag", file.etag).ok();
            header.insert_header("accept-ranges", "bytes").ok();
            session.write_response_header(Box::new(header), false).await?;
            session.write_response_body(Some(Bytes::from(file.body)), true).await?;
            Ok(true)
        }
        Ok(static_files::StaticResponse::NotModified { etag }) => {
            let mut header = ResponseHeader::build(304, None).map_err(|_| {
                pingora_core::Error::explain(pingora_core::ErrorType::InternalError, "failed to build static response")
            })?;
            header.insert_header("etag", etag).ok();
            session.write_response_header(Box::new(header), true).await?;
            Ok(true)
        }
        Err(err) => {
            respond_error(session, err).await?;
            Ok(true)
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
