//! Preview URL construction (spec §4.7 "Port exposure", §6 "Preview URL
//! layout"). Hostnames matching a development wildcard pattern (the
//! `*.workers.dev`-style suffixes a front-end worker can be reached on) can't
//! carry subdomain-based routing, so preview construction is rejected there
//! with `CUSTOM_DOMAIN_REQUIRED` rather than emitting a URL nobody can route.

use crate::errors::ClientError;

/// Suffixes for which subdomain-based preview routing is unavailable. This
/// is host-provider-specific (spec §9 open question); callers may extend it
/// via [`PreviewConfig::wildcard_suffixes`] instead of only trusting the
/// built-in default.
pub const DEFAULT_WILDCARD_SUFFIXES: &[&str] = &["workers.dev"];

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub hostname: String,
    pub wildcard_suffixes: Vec<String>,
}

impl PreviewConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            wildcard_suffixes: DEFAULT_WILDCARD_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
        }
    }

    fn is_localhost(&self) -> bool {
        self.hostname == "localhost" || self.hostname.starts_with("localhost:")
    }

    fn is_wildcard_domain(&self) -> bool {
        self.wildcard_suffixes
            .iter()
            .any(|suffix| self.hostname.ends_with(suffix.as_str()))
    }
}

/// `https://<port>-<sandboxId>.<hostname>` for custom domains;
/// `http://<hostname>/preview/<port>/<sandboxId>` for localhost; rejected for
/// development wildcard domains.
pub fn build_preview_url(
    config: &PreviewConfig,
    port: u16,
    sandbox_id: &str,
) -> Result<String, ClientError> {
    if config.is_wildcard_domain() {
        return Err(ClientError::CustomDomainRequired {
            port,
            hostname: config.hostname.clone(),
        });
    }
    if config.is_localhost() {
        return Ok(format!(
            "http://{}/preview/{}/{}",
            config.hostname, port, sandbox_id
        ));
    }
    Ok(format!("https://{}-{}.{}", port, sandbox_id, config.hostname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_custom_domain_preview_url() {
        let config = PreviewConfig::new("example.com");
        let url = build_preview_url(&config, 8080, "sandbox-abc").unwrap();
        assert_eq!(url, "https://8080-sandbox-abc.example.com");
    }

    #[test]
    fn builds_localhost_path_prefixed_url() {
        let config = PreviewConfig::new("localhost:46835");
        let url = build_preview_url(&config, 8080, "sandbox-abc").unwrap();
        assert_eq!(url, "http://localhost:46835/preview/8080/sandbox-abc");
    }

    #[test]
    fn rejects_development_wildcard_hostnames() {
        let config = PreviewConfig::new("my-worker.workers.dev");
        let err = build_preview_url(&config, 8080, "sandbox-abc").unwrap_err();
        assert_eq!(err.code(), "CUSTOM_DOMAIN_REQUIRED");
    }
}
