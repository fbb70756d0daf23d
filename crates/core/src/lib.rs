pub mod audit;
pub mod bundle;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod expiry;
pub mod handoff;
pub mod lifecycle;
pub mod money;
pub mod store;
pub mod templates;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use cpq::{
    evaluate, evaluate_quote, ConfiguredPolicyResolver, LifecyclePolicy, PolicyResolver,
    PriceCatalog, PricingPolicy, RiskCheckResult, RiskFinding, StaticPriceCatalog,
};
pub use domain::customer::{CustomerId, TenantId};
pub use domain::product::{CatalogPrice, ProductId};
pub use domain::quote::{
    Quote, QuoteId, QuoteItem, QuoteItemId, QuoteItemInput, QuoteItemPatch, QuoteKind, QuoteStatus,
};
pub use domain::template::{QuoteTemplate, TemplateId};
pub use engine::{
    Caller, EngineSettings, NewBundle, NewQuote, QuoteEdit, QuoteEngine, QuoteMutation,
    RefreshOutcome,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use expiry::ExpirySweepReport;
pub use handoff::{HandoffKind, NoopOrderHandoff, OrderHandoff, RecordingOrderHandoff};
pub use lifecycle::{QuoteEvent, TransitionOutcome};
pub use store::{
    InMemoryQuoteStore, InMemoryTemplateStore, QuoteStore, StoreError, TemplateStore, WriteOutcome,
};
pub use templates::TemplateDraft;
