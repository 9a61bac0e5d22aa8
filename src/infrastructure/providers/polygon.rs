use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::domain::errors::QuoteError;
use crate::domain::ports::QuotesAdapter;
use crate::domain::types::{Quote, Session};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use crate::infrastructure::providers::common::{FetchPlan, ProviderLimits};

pub const PROVIDER_NAME: &str = "polygon";

/// Polygon last-NBBO adapter (`GET /v2/last/nbbo/<symbol>`).
pub struct PolygonAdapter {
    client: ClientWithMiddleware,
    cfg: ProviderConfig,
    limits: ProviderLimits,
}

#[derive(Debug, Deserialize)]
struct NbboResponse {
    status: Option<String>,
    results: Option<NbboResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NbboResult {
    #[serde(rename = "T")]
    ticker: Option<String>,
    /// Ask price
    #[serde(rename = "P")]
    ask: f64,
    /// Bid price
    #[serde(rename = "p")]
    bid: f64,
    /// SIP timestamp in nanoseconds
    #[serde(rename = "t")]
    sip_timestamp_ns: Option<i64>,
}

impl PolygonAdapter {
    pub fn new(cfg: ProviderConfig) -> Self {
        let client = HttpClientFactory::create_client(
            Duration::from_millis(cfg.timeout_ms),
            cfg.max_retries,
        );
        let limits = ProviderLimits::new(&cfg);
        Self {
            client,
            cfg,
            limits,
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let base = format!(
            "{}/v2/last/nbbo/{}",
            self.cfg.base_url.trim_end_matches('/'),
            symbol
        );
        let url = build_url_with_query(&base, &[("apikey", self.cfg.api_key.as_str())]);

        let response = self.client.get(&url).send().await.map_err(|e| {
            QuoteError::Transport {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!("PolygonAdapter: Rate limited by provider");
            return Err(QuoteError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if status.as_u16() == 404 {
            return Err(QuoteError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason: "unknown ticker".to_string(),
            });
        }
        if !status.is_success() {
            return Err(QuoteError::ProviderSemantic {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("status {}", status),
            });
        }

        let body: NbboResponse = response
            .json()
            .await
            .map_err(|e| QuoteError::ProviderSemantic {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("malformed body: {}", e),
            })?;

        if body.status.as_deref() != Some("OK") {
            return Err(QuoteError::ProviderSemantic {
                provider: PROVIDER_NAME.to_string(),
                reason: body
                    .message
                    .unwrap_or_else(|| "non-OK status".to_string()),
            });
        }

        let result = body.results.ok_or_else(|| QuoteError::ProviderSemantic {
            provider: PROVIDER_NAME.to_string(),
            reason: "missing results object".to_string(),
        })?;

        let timestamp = match result.sip_timestamp_ns {
            Some(ns) => DateTime::<Utc>::from_timestamp_nanos(ns),
            None => Utc::now(),
        };

        let mid = (result.bid + result.ask) / 2.0;
        let quote = Quote {
            symbol: result
                .ticker
                .unwrap_or_else(|| symbol.to_string())
                .to_uppercase(),
            bid: result.bid,
            ask: result.ask,
            last: mid,
            volume: 0.0,
            timestamp,
            session: Session::Unknown,
            halted: false,
            source: PROVIDER_NAME.to_string(),
            staleness_ms: 0,
        };

        quote.validate(Utc::now())?;
        Ok(quote)
    }
}

#[async_trait]
impl QuotesAdapter for PolygonAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        match self.limits.plan(PROVIDER_NAME, symbol) {
            FetchPlan::Cached(quote) => {
                debug!("PolygonAdapter: Cache hit for {}", symbol);
                Ok(quote)
            }
            FetchPlan::ServeStale(quote) => {
                warn!(
                    "PolygonAdapter: Limits exhausted, serving stale quote for {} ({}ms old)",
                    symbol, quote.staleness_ms
                );
                Ok(quote)
            }
            FetchPlan::Deny(err) => Err(err),
            FetchPlan::Fetch => {
                let quote = self.fetch(symbol).await?;
                self.limits.remember(&quote);
                Ok(quote)
            }
        }
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_quote(symbol).await {
                Ok(quote) => quotes.push(quote),
                Err(e) => debug!("PolygonAdapter: Dropping {}: {}", symbol, e),
            }
        }
        Ok(quotes)
    }

    async fn health_check(&self) -> Result<(), QuoteError> {
        let response = self
            .client
            .get(&self.cfg.base_url)
            .send()
            .await
            .map_err(|e| QuoteError::Transport {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            })?;
        if response.status().is_server_error() {
            Err(QuoteError::ProviderSemantic {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("health status {}", response.status()),
            })
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        info!("PolygonAdapter: Closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nbbo_parsing() {
        let raw = r#"{"request_id":"abc","status":"OK","results":{"T":"AAPL","P":207.12,"S":2,"p":207.04,"s":1,"t":1748875800000000000}}"#;
        let body: NbboResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(body.status.as_deref(), Some("OK"));
        let r = body.results.expect("results present");
        assert_eq!(r.ticker.as_deref(), Some("AAPL"));
        assert!(r.ask > r.bid);
    }

    #[test]
    fn test_error_body_parsing() {
        let raw = r#"{"status":"ERROR","message":"Unknown API Key"}"#;
        let body: NbboResponse = serde_json::from_str(raw).expect("parse");
        assert_ne!(body.status.as_deref(), Some("OK"));
        assert!(body.results.is_none());
    }
}
