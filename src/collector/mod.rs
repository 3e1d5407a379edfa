/// Collector module
///
/// This module groups all logic responsible for:
/// - Running collection passes over the registered collectors
/// - Bounding concurrency and enforcing timeouts per source and per pass
/// - Turning per-source failures into reportable outcomes
///
/// The collector layer acts as the orchestration layer between:
/// - Hospital collectors (ASP Agrigento, Policlinico, ...)
/// - The reading sink (output / persistence layer)
///
/// Design notes:
/// - Source-specific logic MUST NOT live here
/// - This module should remain thin and orchestration-focused
pub mod runner;

pub use runner::{Orchestrator, OrchestratorState, PassReport, PassState};
