use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::customer::TenantId;
use crate::domain::quote::QuoteId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Lifecycle,
    Pricing,
    Template,
    Expiry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: TenantId,
    pub quote_id: Option<QuoteId>,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: TenantId,
        quote_id: Option<QuoteId>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id,
            quote_id,
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("audit sink unavailable: {0}")]
pub struct AuditError(pub String);

/// Receives committed lifecycle facts. Emission is best effort: the engine logs
/// a failed emit and carries on.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Writes every audit event as a structured `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|error| AuditError(error.to_string()))?;
        tracing::info!(
            event_name = "audit.recorded",
            audit_event = %event.event_type,
            tenant_id = %event.tenant_id,
            quote_id = event.quote_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            actor = %event.actor,
            outcome = ?event.outcome,
            metadata = %metadata,
        );
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}
