use serde::{Deserialize, Serialize};

/// What a `Route` matches on. `value` may carry `|`-separated alternatives,
/// e.g. `"a.example.com|b.example.com"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Matcher {
    Host { value: String },
    Header { selector: String, value: String },
}

impl Matcher {
    /// The `|`-expanded set of alternative values this matcher accepts.
    pub fn alternatives(&self) -> Vec<&str> {
        let value = match self {
            Matcher::Host { value } => value,
            Matcher::Header { value, .. } => value,
        };
        value.split('|').map(str::trim).collect()
    }
}

/// A single step in an effective middleware chain, after group expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MiddlewareStep {
    /// A reference to a named, reusable group of steps; expanded in place
    /// at compile time. Never appears in an effective (compiled) chain.
    Group { name: String },
    Call {
        plugin: String,
        entry: String,
        #[serde(default)]
        payload_template: serde_json::Value,
    },
}

/// A matched host or header selector, plus the paths reachable under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub matcher: Matcher,
    #[serde(default)]
    pub tls: Option<String>,
    #[serde(default)]
    pub middleware: Vec<MiddlewareStep>,
    pub paths: Vec<Path>,
}

/// HTTP methods a `Path` may restrict itself to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "PATCH" => HttpMethod::Patch,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "CONNECT" => HttpMethod::Connect,
            "TRACE" => HttpMethod::Trace,
            _ => return None,
        })
    }
}

/// One or more URI patterns sharing a method filter, service, and middleware
/// chain. Pattern syntax: literal segments, `{name}` capture, `*` single-
/// segment wildcard, `{*rest}` greedy tail capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub methods: Vec<HttpMethod>,
    pub service_ref: String,
    #[serde(default)]
    pub middleware: Vec<MiddlewareStep>,
}

impl Path {
    pub fn method_allowed(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.as_str() == method)
    }
}

/// Translate a route pattern (which allows a bare `*` as an anonymous
/// single-segment wildcard) into the `matchit` route-syntax equivalent.
/// `matchit` requires every capture to be named, so anonymous wildcard
/// segments are given a positional synthetic name that callers should not
/// surface to template evaluation.
pub fn to_matchit_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut wild_idx = 0usize;
    for (i, seg) in pattern.split('/').enumerate() {
        if i > 0 {
            out.push('/');
        }
        if seg == "*" {
            out.push_str(&format!("{{__wild{wild_idx}}}"));
            wild_idx += 1;
        } else {
            out.push_str(seg);
        }
    }
    out
}
