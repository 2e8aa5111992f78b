use async_trait::async_trait;
use chrono::Utc;
use core_types::MarketContext;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum PriceError {
    #[error("Price feed unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the mark prices a cycle decides and executes against. The
/// snapshot is taken once per cycle so every step sees the same prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn snapshot(&self) -> Result<MarketContext, PriceError>;
}

/// A settable in-memory price table, for paper trading and tests.
#[derive(Debug, Default, Clone)]
pub struct FixedPriceSource {
    marks: Arc<RwLock<BTreeMap<String, Decimal>>>,
}

impl FixedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_mark(&self, instrument: &str, price: Decimal) {
        self.marks.write().await.insert(instrument.to_string(), price);
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn snapshot(&self) -> Result<MarketContext, PriceError> {
        Ok(MarketContext::new(self.marks.read().await.clone(), Utc::now()))
    }
}
