//! Converts the loosely-shaped `predictions` value of an analysis result into
//! forecast and history series of [`ForecastPoint`]s.
//!
//! [`normalize`] never fails: anything it cannot read is dropped and an
//! unreadable payload yields two empty series. Ordering, de-duplication and
//! horizon windows are left to the helpers in [`series`].

pub mod normalize;
pub mod payload;
pub mod series;

pub use normalize::{extract_point, normalize, parse_price_lines, NormalizedSeries};
pub use payload::PredictionsPayload;
pub use series::{dedupe_by_date, is_bullish, latest_price, sort_chronologically, ChartSeries, Horizon};
pub use task_core::ForecastPoint;
