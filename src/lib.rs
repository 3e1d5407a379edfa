// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration structs loaded from JSON
// - error:      Typed errors of retrieval, extraction, registry and passes
// - schema:     Canonical colors, readings and scrape outcomes
// - util:       Shared helper utilities (time, text cleanup, excerpts)
// - normalize:  Source-independent color / wait-time normalization
// - http:       Retrying HTTP retrieval client
// - hospitals:  Collector contract, registry and concrete collectors
// - collector:  Pass orchestration (concurrency, timeouts, isolation)
// - sink:       Destination of accepted readings
// - metrics:    Global runtime counters
//
pub mod collector;
pub mod config;
pub mod error;
pub mod hospitals;
pub mod http;
pub mod metrics;
pub mod normalize;
pub mod schema;
pub mod sink;
pub mod util;

#[cfg(test)]
mod test_support;
