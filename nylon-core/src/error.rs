use thiserror::Error;

/// Unified error type for the proxy core.
#[derive(Error, Debug)]
pub enum NylonError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("route not found")]
    RouteNotFound,

    #[error("no healthy upstream for service {0}")]
    NoHealthyUpstream(String),

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("upstream connect failed: {0}")]
    UpstreamConnect(String),

    #[error("plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("plugin dispatch timeout: {plugin}/{entry}")]
    PluginDispatchTimeout { plugin: String, entry: String },

    #[error("plugin protocol error: {0}")]
    PluginProtocolError(String),

    #[error("template evaluation error: {0}")]
    TemplateEvalError(String),

    #[error("tls handshake error: {0}")]
    TlsHandshakeError(String),

    #[error("websocket upgrade failed: {0}")]
    WebSocketUpgradeFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NylonError {
    /// Map the error kind to the HTTP status it should surface as, per the
    /// propagation rules in the error handling design.
    pub fn status_code(&self) -> u16 {
        match self {
            NylonError::RouteNotFound => 404,
            NylonError::NoHealthyUpstream(_) | NylonError::UpstreamConnect(_) => 502,
            NylonError::UpstreamTimeout => 504,
            NylonError::PluginUnavailable(_) => 502,
            NylonError::PluginDispatchTimeout { .. } => 502,
            NylonError::PluginProtocolError(_) => 502,
            NylonError::TlsHandshakeError(_) => 525,
            NylonError::WebSocketUpgradeFailed(_) => 400,
            NylonError::ConfigError(_) => 500,
            NylonError::TemplateEvalError(_) => 500,
            _ => 500,
        }
    }

    pub fn to_json_body(&self) -> Vec<u8> {
        let status = self.status_code();
        let msg = self.to_string();
        format!(r#"{{"error":"{}","status":{}}}"#, msg.replace('"', "'"), status).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_propagation_table() {
        assert_eq!(NylonError::RouteNotFound.status_code(), 404);
        assert_eq!(NylonError::NoHealthyUpstream("svc".into()).status_code(), 502);
        assert_eq!(NylonError::UpstreamTimeout.status_code(), 504);
        assert_eq!(
            NylonError::PluginDispatchTimeout {
                plugin: "auth".into(),
                entry: "check".into()
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn json_body_is_valid_json() {
        let err = NylonError::RouteNotFound;
        let body = err.to_json_body();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], 404);
        assert!(parsed["error"].as_str().is_some());
    }
}
