pub mod orchestrator;

pub use orchestrator::{OperationReport, UpdateCheck, UpdateOrchestrator};
