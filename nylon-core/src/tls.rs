use serde::{Deserialize, Serialize};

/// A TLS entry referenced by name from a `Route`. Domain sets across all
/// entries in one config must be disjoint (invariant I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsEntry {
    pub name: String,
    pub domains: Vec<String>,
    #[serde(flatten)]
    pub kind: TlsKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TlsKind {
    Custom {
        cert: String,
        key: String,
        #[serde(default)]
        chain: Vec<String>,
    },
    Acme {
        provider: String,
        email: String,
        #[serde(default)]
        directory_url: Option<String>,
        #[serde(default)]
        staging: bool,
        #[serde(default)]
        eab_kid: Option<String>,
        #[serde(default)]
        eab_hmac_key: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acme_entry_parses_with_optional_fields_absent() {
        let yaml = r#"
name: main
domains: ["example.com"]
type: acme
provider: letsencrypt
email: ops@example.com
"#;
        let entry: TlsEntry = serde_yaml::from_str(yaml).unwrap();
        match entry.kind {
            TlsKind::Acme { staging, directory_url, .. } => {
                assert!(!staging);
                assert!(directory_url.is_none());
            }
            _ => panic!("expected acme entry"),
        }
    }
}
