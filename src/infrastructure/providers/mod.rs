pub mod alpha_vantage;
pub mod common;
pub mod mock;
pub mod polygon;

use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::domain::ports::QuotesAdapter;
use alpha_vantage::AlphaVantageAdapter;
use mock::MockQuotesAdapter;
use polygon::PolygonAdapter;

/// Builds a concrete adapter from its configured name. Unknown names fall
/// back to the deterministic mock so a bad override degrades rather than
/// aborts.
pub fn build_adapter(name: &str, cfg: &ProviderConfig) -> Arc<dyn QuotesAdapter> {
    match name {
        "alpha_vantage" => Arc::new(AlphaVantageAdapter::new(cfg.clone())),
        "polygon" => Arc::new(PolygonAdapter::new(cfg.clone())),
        "mock" => Arc::new(MockQuotesAdapter::new()),
        other => {
            tracing::warn!(
                "ProviderFactory: Unknown adapter '{}', falling back to mock",
                other
            );
            Arc::new(MockQuotesAdapter::new())
        }
    }
}
