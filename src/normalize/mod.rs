//! Source-independent normalization of scraped values.
//!
//! - `color`:        raw triage-color tokens -> `CanonicalColor`
//! - `waiting_time`: free-text wait times -> minutes
//!
//! Both are total: unrecognized input degrades (to `Unknown` / `None`)
//! and is logged, it never errors.

pub mod color;
pub mod waiting_time;

pub use color::normalize_color;
pub use waiting_time::parse_waiting_time;
