pub mod machine;
pub mod states;

pub use machine::transition;
pub use states::{LifecycleAction, QuoteEvent, TransitionContext, TransitionOutcome};
