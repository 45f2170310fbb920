pub mod artifact;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod types;
