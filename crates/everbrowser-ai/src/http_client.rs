use reqwest::Client;

const DISABLE_SYSTEM_PROXY_ENV: &str = "EVERBROWSER_DISABLE_SYSTEM_PROXY";

/// Build the shared reqwest client, optionally bypassing system proxies.
///
/// Falls back to a default client if the configured builder is rejected.
pub(crate) fn build_http_client() -> Client {
    if !should_disable_system_proxy() {
        return Client::new();
    }
    match Client::builder().no_proxy().build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to build proxy-less HTTP client, using default");
            Client::new()
        }
    }
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}
