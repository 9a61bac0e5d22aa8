use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
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

pub const PROVIDER_NAME: &str = "alpha_vantage";

/// Alpha Vantage GLOBAL_QUOTE adapter.
///
/// The endpoint reports a single trade price without NBBO, so bid and ask
/// collapse onto the last price and the session is unknown.
pub struct AlphaVantageAdapter {
    client: ClientWithMiddleware,
    cfg: ProviderConfig,
    limits: ProviderLimits,
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: String,
    #[serde(rename = "05. price")]
    price: String,
    #[serde(rename = "06. volume")]
    volume: String,
}

impl AlphaVantageAdapter {
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
        let url = build_url_with_query(
            &self.cfg.base_url,
            &[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", &self.cfg.api_key),
            ],
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            QuoteError::Transport {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(QuoteError::ProviderSemantic {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        let body: GlobalQuoteResponse =
            response
                .json()
                .await
                .map_err(|e| QuoteError::ProviderSemantic {
                    provider: PROVIDER_NAME.to_string(),
                    reason: format!("malformed body: {}", e),
                })?;

        if let Some(note) = body.note {
            // Alpha Vantage signals throttling with a 200 + "Note" body.
            warn!("AlphaVantageAdapter: Throttle note from provider: {}", note);
            return Err(QuoteError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if let Some(message) = body.error_message {
            return Err(QuoteError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason: message,
            });
        }

        let raw = body.global_quote.ok_or_else(|| QuoteError::ProviderSemantic {
            provider: PROVIDER_NAME.to_string(),
            reason: "missing Global Quote object".to_string(),
        })?;

        let price: f64 = raw.price.parse().map_err(|_| QuoteError::ProviderSemantic {
            provider: PROVIDER_NAME.to_string(),
            reason: format!("unparseable price '{}'", raw.price),
        })?;
        let volume: f64 = raw.volume.parse().unwrap_or(0.0);

        let quote = Quote {
            symbol: raw.symbol.to_uppercase(),
            bid: price,
            ask: price,
            last: price,
            volume,
            timestamp: Utc::now(),
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
impl QuotesAdapter for AlphaVantageAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        match self.limits.plan(PROVIDER_NAME, symbol) {
            FetchPlan::Cached(quote) => {
                debug!("AlphaVantageAdapter: Cache hit for {}", symbol);
                Ok(quote)
            }
            FetchPlan::ServeStale(quote) => {
                warn!(
                    "AlphaVantageAdapter: Limits exhausted, serving stale quote for {} ({}ms old)",
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
        // No batch endpoint on the free tier; invalid quotes are dropped,
        // not returned.
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_quote(symbol).await {
                Ok(quote) => quotes.push(quote),
                Err(e) => debug!("AlphaVantageAdapter: Dropping {}: {}", symbol, e),
            }
        }
        Ok(quotes)
    }

    async fn health_check(&self) -> Result<(), QuoteError> {
        let response = self.client.get(&self.cfg.base_url).send().await.map_err(|e| {
            QuoteError::Transport {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            }
        })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(QuoteError::ProviderSemantic {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("health status {}", response.status()),
            })
        }
    }

    async fn close(&self) {
        info!("AlphaVantageAdapter: Closed");
    }
}
