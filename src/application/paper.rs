use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::decision::ProposedAction;
use crate::domain::errors::OutboxError;
use crate::domain::trading::portfolio::Portfolio;
use crate::domain::trading::types::{
    Fill, Intent, Order, OrderSide, OrderStatus, idempotency_key,
};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::outbox::Outbox;
use crate::infrastructure::simulation::latency_model::LatencyModel;
use crate::infrastructure::simulation::slippage_model::{SlippageModel, fill_price};

/// Converts accepted intents into paper orders and deferred synthetic
/// fills. Orders dedupe against the outbox ledger inside the window;
/// fills are applied to the portfolio when their latency elapses.
pub struct PaperExecutor {
    outbox: Arc<Outbox>,
    portfolio: Arc<RwLock<Portfolio>>,
    latency: Arc<dyn LatencyModel>,
    slippage: Arc<dyn SlippageModel>,
    dedupe_window: ChronoDuration,
    metrics: Metrics,
    pending_fills: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl PaperExecutor {
    pub fn new(
        outbox: Arc<Outbox>,
        portfolio: Arc<RwLock<Portfolio>>,
        latency: Arc<dyn LatencyModel>,
        slippage: Arc<dyn SlippageModel>,
        dedupe_window_secs: i64,
        metrics: Metrics,
    ) -> Self {
        Self {
            outbox,
            portfolio,
            latency,
            slippage,
            dedupe_window: ChronoDuration::seconds(dedupe_window_secs),
            metrics,
            pending_fills: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn quantity_for(intent: Intent) -> f64 {
        match intent {
            Intent::Buy5x => 5.0,
            _ => 1.0,
        }
    }

    fn side_for(intent: Intent) -> OrderSide {
        match intent {
            Intent::Reduce => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }

    /// Processes one proposed action. REJECT and HOLD are no-ops; BUY and
    /// REDUCE intents become a pending order plus a deferred fill.
    /// Returns the order id when one was written.
    pub fn process(
        &self,
        action: &ProposedAction,
        last_price: f64,
    ) -> Result<Option<String>, OutboxError> {
        if !action.intent.is_actionable() {
            return Ok(None);
        }
        if last_price <= 0.0 {
            warn!(
                "PaperExecutor: No usable price for {}, skipping order",
                action.symbol
            );
            return Ok(None);
        }

        let now = Utc::now();
        let key = idempotency_key(
            &action.symbol,
            action.intent,
            now.timestamp(),
            action.fused_score,
        );

        if self
            .outbox
            .has_recent_order(&key, self.dedupe_window, now)?
        {
            self.metrics.paper_order_dedupe_total.inc();
            debug!(
                "PaperExecutor: Duplicate order suppressed for {} ({})",
                action.symbol, key
            );
            return Ok(None);
        }

        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: action.symbol.clone(),
            intent: action.intent,
            timestamp: now,
            status: OrderStatus::Pending,
            idempotency_key: key,
        };
        self.outbox.append_order(&order)?;
        self.metrics
            .paper_orders_total
            .with_label_values(&[&action.intent.to_string()])
            .inc();
        info!(
            "PaperExecutor: Order {} pending for {} ({})",
            order.id, order.symbol, order.intent
        );

        let order_id = order.id.clone();
        self.schedule_fill(order, last_price);
        Ok(Some(order_id))
    }

    fn schedule_fill(&self, order: Order, last_price: f64) {
        let latency = self.latency.next_latency();
        let slippage_bps = self.slippage.next_slippage_bps();
        let outbox = Arc::clone(&self.outbox);
        let portfolio = Arc::clone(&self.portfolio);
        let metrics = self.metrics.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(latency).await;

            let side = Self::side_for(order.intent);
            let fill = Fill {
                order_id: order.id.clone(),
                symbol: order.symbol.clone(),
                quantity: Self::quantity_for(order.intent),
                price: fill_price(last_price, side, slippage_bps),
                side,
                timestamp: Utc::now(),
                latency_ms: latency.as_millis() as u64,
                slippage_bps,
            };

            if let Err(e) = outbox.append_fill(&fill) {
                warn!("PaperExecutor: Failed to record fill for {}: {}", order.id, e);
                return;
            }

            portfolio
                .write()
                .expect("portfolio lock poisoned")
                .apply_fill(&fill);
            metrics
                .paper_fills_total
                .with_label_values(&[&side.to_string()])
                .inc();
            info!(
                "PaperExecutor: Order {} filled {} {} @ {:.4} ({}ms, {:.1} bps)",
                order.id, side, fill.quantity, fill.price, fill.latency_ms, slippage_bps
            );
        });

        self.pending_fills
            .lock()
            .expect("pending lock poisoned")
            .push(handle);
    }

    /// Waits for all pending fill timers, up to `timeout`. Called during
    /// graceful shutdown and at the end of a oneshot run.
    pub async fn drain(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending_fills.lock().expect("pending lock poisoned");
            pending.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }

        info!("PaperExecutor: Draining {} pending fills", handles.len());
        let drain_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, drain_all).await.is_err() {
            warn!("PaperExecutor: Drain timed out after {:?}", timeout);
        }
    }

    pub fn portfolio(&self) -> Arc<RwLock<Portfolio>> {
        Arc::clone(&self.portfolio)
    }
}
