//! Event aggregation across chained streams.
//!
//! - [`EventAggregator`]: re-raises named events from several sources on
//!   one subscription
//! - [`collapse`] / [`collapse_text`]: fold a finished output stream into a
//!   single result, failing on the first `error` event

mod aggregator;
mod collapse;

pub use aggregator::EventAggregator;
pub use collapse::{collapse, collapse_text};
