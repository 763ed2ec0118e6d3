use std::{sync::OnceLock, time::Duration};

use tracing::{debug, warn};

const USER_AGENT: &str = concat!("shotforge/", env!("CARGO_PKG_VERSION"));

/// Install the aws-lc-rs rustls provider once per process.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Shared client for the remote collaborators, with a request timeout.
pub fn create_client(timeout: Duration) -> reqwest::Client {
    install_rustls_provider();

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .unwrap_or_else(|error| {
            warn!(error = %error, "Failed to build HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}

/// First part of an error body worth putting in a log line or failure reason.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    let body = body.trim();
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let mut out: String = body.chars().take(MAX).collect();
        out.push('…');
        out
    }
}
