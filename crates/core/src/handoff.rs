//! Downstream order creation is owned by another system; the engine only tells
//! it when a quote becomes orderable or has been turned into an order.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::quote::{Quote, QuoteId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffKind {
    Approved,
    Converted,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("order hand-off failed: {0}")]
pub struct HandoffError(pub String);

#[async_trait]
pub trait OrderHandoff: Send + Sync {
    async fn notify(&self, kind: HandoffKind, quote: &Quote) -> Result<(), HandoffError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopOrderHandoff;

#[async_trait]
impl OrderHandoff for NoopOrderHandoff {
    async fn notify(&self, _kind: HandoffKind, _quote: &Quote) -> Result<(), HandoffError> {
        Ok(())
    }
}

/// Keeps every notification it receives, in order.
#[derive(Clone, Default)]
pub struct RecordingOrderHandoff {
    notifications: Arc<Mutex<Vec<(HandoffKind, QuoteId)>>>,
}

impl RecordingOrderHandoff {
    pub fn notifications(&self) -> Vec<(HandoffKind, QuoteId)> {
        match self.notifications.lock() {
            Ok(notifications) => notifications.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl OrderHandoff for RecordingOrderHandoff {
    async fn notify(&self, kind: HandoffKind, quote: &Quote) -> Result<(), HandoffError> {
        match self.notifications.lock() {
            Ok(mut notifications) => notifications.push((kind, quote.id.clone())),
            Err(poisoned) => poisoned.into_inner().push((kind, quote.id.clone())),
        }
        Ok(())
    }
}
