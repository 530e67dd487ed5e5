pub mod classifier;
pub mod gemini;
pub mod intake;
pub mod prompt;
pub mod queue;
pub mod reconcile;
pub mod worker;
