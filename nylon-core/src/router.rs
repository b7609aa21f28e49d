use crate::route::{to_matchit_pattern, Matcher, Route};
use arc_swap::ArcSwap;
use matchit::Router as MatchitRouter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A compiled route plus its per-path radix tries, one per declared HTTP
/// method and a catch-all for paths with no method restriction. `matchit`
/// resolves literal-vs-parameter-vs-wildcard specificity internally, so
/// insertion order does not need to encode priority.
struct CompiledRoute {
    route: Arc<Route>,
    method_tries: HashMap<&'static str, MatchitRouter<usize>>,
    any_method_trie: MatchitRouter<usize>,
}

impl CompiledRoute {
    fn build(route: Route) -> Self {
        let route = Arc::new(route);
        let mut method_tries: HashMap<&'static str, MatchitRouter<usize>> = HashMap::new();
        let mut any_method_trie = MatchitRouter::new();

        for (idx, path) in route.paths.iter().enumerate() {
            for raw_pattern in &path.patterns {
                let pattern = to_matchit_pattern(raw_pattern);
                if path.methods.is_empty() {
                    if let Err(e) = any_method_trie.insert(&pattern, idx) {
                        warn!(pattern = %pattern, error = %e, "failed to insert path pattern");
                    }
                } else {
                    for method in &path.methods {
                        let trie = method_tries.entry(method.as_str()).or_insert_with(MatchitRouter::new);
                        if let Err(e) = trie.insert(&pattern, idx) {
                            warn!(pattern = %pattern, error = %e, "failed to insert path pattern");
                        }
                    }
                }
            }
        }

        Self { route, method_tries, any_method_trie }
    }

    fn match_path(&self, method: &str, path: &str) -> Option<(usize, Vec<(String, String)>)> {
        if let Some(trie) = self.method_tries.get(method) {
            if let Ok(m) = trie.at(path) {
                return Some((*m.value, collect_params(&m.params)));
            }
        }
        if let Ok(m) = self.any_method_trie.at(path) {
            return Some((*m.value, collect_params(&m.params)));
        }
        None
    }
}

fn collect_params(params: &matchit::Params) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(k, _)| !k.starts_with("__wild"))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct CompiledTable {
    /// Exact host/header-value lookup (`a|b` alternatives pre-expanded to
    /// distinct keys pointing at the same compiled route).
    host_exact: HashMap<String, Arc<CompiledRoute>>,
    /// Fallback header-selector routes, tried in declaration order when no
    /// host matched.
    header_routes: Vec<(String, Arc<CompiledRoute>)>,
}

/// The result of a full route resolution: the matched route, the index of
/// the matched `Path` within it, and captured path parameters.
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub path_index: usize,
    pub params: Vec<(String, String)>,
}

/// Compiled, hot-swappable route table.
///
/// Readers load a `Guard` off the `ArcSwap` rather than cloning the `Arc`
/// on every request; a reload publishes an entirely new `CompiledTable`
/// atomically, so in-flight lookups always see a self-consistent snapshot.
pub struct Router {
    inner: ArcSwap<CompiledTable>,
    version: AtomicU64,
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(CompiledTable {
                host_exact: HashMap::new(),
                header_routes: Vec::new(),
            })),
            version: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Atomically replace the route table. Compile-time reference
    /// validation (I1) is performed by the config store before this is
    /// called; `Router` itself only compiles matching structures.
    pub fn replace_all(&self, routes: Vec<Route>) {
        let mut host_exact = HashMap::new();
        let mut header_routes = Vec::new();

        for route in routes {
            let matcher = route.matcher.clone();
            let compiled = Arc::new(CompiledRoute::build(route));
            match matcher {
                Matcher::Host { .. } => {
                    for alt in compiled.route.matcher.alternatives() {
                        host_exact.insert(alt.to_string(), Arc::clone(&compiled));
                    }
                }
                Matcher::Header { selector, .. } => {
                    for alt in compiled.route.matcher.alternatives() {
                        header_routes.push((format!("{selector}\0{alt}"), Arc::clone(&compiled)));
                    }
                }
            }
        }

        self.inner.store(Arc::new(CompiledTable { host_exact, header_routes }));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Resolve a request to `(Route, Path, params)`.
    ///
    /// `host` is the request's `Host`/`:authority` value (port stripped by
    /// the caller is not required; this strips it). `header_lookup` returns
    /// the value of an arbitrary header by name, used for header-selector
    /// routes when no host matched.
    pub fn match_route<'a>(
        &self,
        method: &str,
        path: &str,
        host: Option<&str>,
        header_lookup: impl Fn(&str) -> Option<&'a str>,
    ) -> Option<RouteMatch> {
        let table = self.inner.load();

        if let Some(host) = host {
            let bare_host = host.split(':').next().unwrap_or(host);
            if let Some(compiled) = table.host_exact.get(bare_host) {
                if let Some((idx, params)) = compiled.match_path(method, path) {
                    return Some(RouteMatch { route: Arc::clone(&compiled.route), path_index: idx, params });
                }
            }
        }

        for (key, compiled) in &table.header_routes {
            let (selector, value) = key.split_once('\0').unwrap();
            if header_lookup(selector) == Some(value) {
                if let Some((idx, params)) = compiled.match_path(method, path) {
                    return Some(RouteMatch { route: Arc::clone(&compiled.route), path_index: idx, params });
                }
            }
        }

        None
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{HttpMethod, Path};

    fn host_route(host: &str, pattern: &str, service: &str) -> Route {
        Route {
            matcher: Matcher::Host { value: host.into() },
            tls: None,
            middleware: vec![],
            paths: vec![Path {
                patterns: vec![pattern.into()],
                methods: vec![],
                service_ref: service.into(),
                middleware: vec![],
            }],
        }
    }

    #[test]
    fn matches_exact_host_and_literal_path() {
        let router = Router::new();
        router.replace_all(vec![host_route("localhost", "/hello", "svc1")]);
        let m = router
            .match_route("GET", "/hello", Some("localhost"), |_| None)
            .expect("should match");
        assert_eq!(m.route.paths[m.path_index].service_ref, "svc1");
    }

    #[test]
    fn host_alternatives_both_match() {
        let router = Router::new();
        router.replace_all(vec![host_route("a.example.com|b.example.com", "/x", "svc1")]);
        assert!(router.match_route("GET", "/x", Some("a.example.com"), |_| None).is_some());
        assert!(router.match_route("GET", "/x", Some("b.example.com"), |_| None).is_some());
        assert!(router.match_route("GET", "/x", Some("c.example.com"), |_| None).is_none());
    }

    #[test]
    fn captures_named_parameters() {
        let router = Router::new();
        router.replace_all(vec![host_route("localhost", "/users/{id}", "svc1")]);
        let m = router.match_route("GET", "/users/42", Some("localhost"), |_| None).unwrap();
        assert_eq!(m.params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn method_filter_is_respected() {
        let router = Router::new();
        let mut route = host_route("localhost", "/a", "svc1");
        route.paths[0].methods = vec![HttpMethod::Post];
        router.replace_all(vec![route]);
        assert!(router.match_route("GET", "/a", Some("localhost"), |_| None).is_none());
        assert!(router.match_route("POST", "/a", Some("localhost"), |_| None).is_some());
    }

    #[test]
    fn header_selector_is_fallback_when_no_host_matches() {
        let router = Router::new();
        let route = Route {
            matcher: Matcher::Header { selector: "x-tenant".into(), value: "acme".into() },
            tls: None,
            middleware: vec![],
            paths: vec![Path {
                patterns: vec!["/".into()],
                methods: vec![],
                service_ref: "svc1".into(),
                middleware: vec![],
            }],
        };
        router.replace_all(vec![route]);
        let mut headers = HashMap::new();
        headers.insert("x-tenant", "acme");
        let m = router.match_route("GET", "/", None, |k| headers.get(k).copied());
        assert!(m.is_some());
    }

    #[test]
    fn anonymous_wildcard_matches_single_segment() {
        let router = Router::new();
        router.replace_all(vec![host_route("localhost", "/a/*/c", "svc1")]);
        assert!(router.match_route("GET", "/a/b/c", Some("localhost"), |_| None).is_some());
        assert!(router.match_route("GET", "/a/b/x/c", Some("localhost"), |_| None).is_none());
    }
}
