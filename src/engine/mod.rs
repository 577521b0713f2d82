//! Core engine: the load → price → decide → commit pass.

pub mod evaluator;
pub mod session;

pub use evaluator::OutcomeEvaluator;
pub use session::MarketSession;
