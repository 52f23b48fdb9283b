//! Display-side helpers for normalized series. `normalize` applies none of
//! these; chart and metric code call them explicitly.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use task_core::ForecastPoint;

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()
}

fn chronological(a: &ForecastPoint, b: &ForecastPoint) -> Ordering {
    match (parse_date(&a.date), parse_date(&b.date)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.date.cmp(&b.date),
    }
}

/// Sorted copy, oldest first. Dates that don't parse go last, in text order.
pub fn sort_chronologically(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut sorted = points.to_vec();
    sorted.sort_by(chronological);
    sorted
}

/// One point per date; a later point replaces an earlier one in place.
pub fn dedupe_by_date(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<ForecastPoint> = Vec::with_capacity(points.len());

    for point in points {
        match seen.get(point.date.as_str()) {
            Some(&idx) => unique[idx].close = point.close,
            None => {
                seen.insert(&point.date, unique.len());
                unique.push(point.clone());
            }
        }
    }
    unique
}

/// Forecast windows offered by the dashboard, in trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Week,
    Month,
    Quarter,
}

impl Horizon {
    pub fn trading_days(self) -> usize {
        match self {
            Horizon::Week => 5,
            Horizon::Month => 21,
            Horizon::Quarter => 63,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Horizon::Week => "1W",
            Horizon::Month => "1M",
            Horizon::Quarter => "1Q",
        }
    }

    /// Leading slice of an already sorted forecast.
    pub fn window(self, forecast: &[ForecastPoint]) -> &[ForecastPoint] {
        &forecast[..forecast.len().min(self.trading_days())]
    }
}

impl FromStr for Horizon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "week" | "1w" => Ok(Horizon::Week),
            "month" | "1m" => Ok(Horizon::Month),
            "quarter" | "1q" => Ok(Horizon::Quarter),
            other => Err(format!("unknown horizon '{other}' (expected week, month or quarter)")),
        }
    }
}

/// Chart traces: history, then a forecast line that starts at the last
/// historical close so the two lines join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub history: Vec<ForecastPoint>,
    pub forecast: Vec<ForecastPoint>,
}

impl ChartSeries {
    pub fn build(forecast: &[ForecastPoint], history: &[ForecastPoint]) -> Self {
        let history = sort_chronologically(history);
        let mut joined = Vec::with_capacity(forecast.len() + 1);

        if !forecast.is_empty() {
            if let Some(anchor) = history.last() {
                joined.push(anchor.clone());
            }
            joined.extend(sort_chronologically(forecast));
        }

        Self {
            history,
            forecast: joined,
        }
    }
}

/// Last historical close, else the first forecast close.
pub fn latest_price(history: &[ForecastPoint], forecast: &[ForecastPoint]) -> Option<f64> {
    history
        .last()
        .or_else(|| forecast.first())
        .map(|p| p.close)
}

pub fn is_bullish(recommendation: &str) -> bool {
    let rec = recommendation.to_uppercase();
    rec.contains("BUY") || rec.contains("BULL")
}
