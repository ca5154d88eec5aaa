//! Asynchronous, non-blocking candle-close fan-out (C6, §4.6).
//!
//! Grounded on the teacher's agent-wiring channels, generalized from a
//! single producer/consumer pair to a multi-subscriber bus: each listener
//! runs on its own spawned task so a slow or failing listener can never
//! delay `fire()` or its siblings.

use crate::domain::candle::{AggregatedCandle, StockContext};
use crate::domain::events::CandleCloseListener;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn CandleCloseListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn subscribe(&self, listener: Arc<dyn CandleCloseListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Fans a freshly produced aggregate series out to every listener
    /// concurrently. Returns once all listener tasks have been spawned, not
    /// once they've finished — delivery is at-least-once while the process
    /// runs, with no ordering guarantee across listeners (§4.6).
    pub async fn fire(&self, candles: Vec<AggregatedCandle>, context: StockContext) {
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            let listener = Arc::clone(listener);
            let candles = candles.clone();
            let context = context.clone();
            tokio::spawn(async move {
                listener.on_candles(candles, context).await;
            });
        }
        if listeners.is_empty() {
            warn!("candle-close event fired with no subscribers");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}
