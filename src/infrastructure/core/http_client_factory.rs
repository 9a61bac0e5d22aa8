use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates an HTTP client with transient-error retry middleware.
    /// Exponential backoff with jitter, bounded retries.
    pub fn create_client(timeout: Duration, max_retries: u32) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Helper to build a URL with query parameters.
/// reqwest-middleware 0.5 doesn't expose `.query()`, so the encoded
/// query string is appended to the URL before it reaches the client.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        serializer.append_pair(k.as_ref(), v.as_ref());
    }
    let query_string = serializer.finish();

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_appends_query() {
        let url = build_url_with_query(
            "https://www.alphavantage.co/query",
            &[("function", "GLOBAL_QUOTE"), ("symbol", "AAPL")],
        );
        assert_eq!(
            url,
            "https://www.alphavantage.co/query?function=GLOBAL_QUOTE&symbol=AAPL"
        );
    }

    #[test]
    fn test_build_url_encodes_reserved_characters() {
        let url = build_url_with_query("http://host/q", &[("symbol", "BRK B"), ("k", "a&b=c")]);
        assert_eq!(url, "http://host/q?symbol=BRK+B&k=a%26b%3Dc");
    }

    #[test]
    fn test_build_url_extends_existing_query() {
        let url = build_url_with_query("http://host/q?a=1", &[("b", "2")]);
        assert_eq!(url, "http://host/q?a=1&b=2");
    }
}
