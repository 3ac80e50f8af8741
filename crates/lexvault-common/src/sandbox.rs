use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::LexvaultError;

/// Hosts producers may reach out of the box.
const DEFAULT_ALLOWLIST: &[&str] = &[
    "www.courtlistener.com", // CourtListener REST API
    "courtlistener.com",
    "www.supremecourt.gov",  // Supreme Court opinions
    "www.govinfo.gov",       // GovInfo collections
    "www.federalregister.gov",
    "api.case.law",          // Caselaw Access Project
    "localhost",
    "127.0.0.1",
];

/// HTTP client that refuses requests to hosts outside its allowlist.
///
/// Producers get one of these instead of a bare `reqwest::Client` so that a
/// misconfigured query or a redirect-shaped URL in upstream data cannot make
/// the ingester talk to arbitrary hosts.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default legal-source allowlist and a 30s timeout.
    pub fn new() -> Result<Self, LexvaultError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, LexvaultError> {
        let allowlist = DEFAULT_ALLOWLIST.iter().map(|d| d.to_string()).collect();

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("lexvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LexvaultError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        // Exact match or a subdomain of an allowed host
        self.allowlist
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, LexvaultError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    fn check(&self, url: &str) -> Result<(), LexvaultError> {
        if self.is_allowed(url) {
            return Ok(());
        }
        tracing::warn!(url = %url, "Blocked request to host outside allowlist");
        Err(LexvaultError::Security(format!(
            "domain not in allowlist for URL {}",
            url
        )))
    }
}
