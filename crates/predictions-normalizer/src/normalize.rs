use serde_json::{Map, Value};
use task_core::ForecastPoint;

use crate::payload::PredictionsPayload;

/// Keys searched, in order, for the forecast sequence of a mapping payload.
const FORECAST_KEYS: [&str; 4] = ["full_forecast", "forecast", "predictions", "data"];

const HISTORY_KEY: &str = "history";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSeries {
    pub forecast: Vec<ForecastPoint>,
    pub history: Vec<ForecastPoint>,
}

impl NormalizedSeries {
    pub fn is_empty(&self) -> bool {
        self.forecast.is_empty() && self.history.is_empty()
    }
}

/// Normalize a raw `predictions` value. Never fails; unreadable input gives
/// empty series.
pub fn normalize(raw: &Value) -> NormalizedSeries {
    match PredictionsPayload::classify(raw) {
        PredictionsPayload::Empty | PredictionsPayload::Other => NormalizedSeries::default(),
        PredictionsPayload::Sequence(items) => NormalizedSeries {
            forecast: extract_all(items),
            history: Vec::new(),
        },
        PredictionsPayload::Mapping(map) => from_mapping(map),
        PredictionsPayload::Text(text) => NormalizedSeries {
            forecast: parse_price_lines(text),
            history: Vec::new(),
        },
    }
}

fn from_mapping(map: &Map<String, Value>) -> NormalizedSeries {
    let history = map
        .get(HISTORY_KEY)
        .and_then(Value::as_array)
        .map(|items| extract_all(items))
        .unwrap_or_default();

    NormalizedSeries {
        forecast: extract_all(forecast_source(map)),
        history,
    }
}

/// First preferred key holding a non-empty sequence, else the first
/// sequence-valued entry in insertion order.
fn forecast_source(map: &Map<String, Value>) -> &[Value] {
    let preferred = FORECAST_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array));

    match preferred {
        Some(items) if !items.is_empty() => items,
        _ => map
            .values()
            .find_map(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    }
}

fn extract_all(items: &[Value]) -> Vec<ForecastPoint> {
    let points: Vec<ForecastPoint> = items.iter().filter_map(extract_point).collect();
    if points.len() < items.len() {
        tracing::debug!(
            "Dropped {} of {} prediction items without a usable date/price",
            items.len() - points.len(),
            items.len()
        );
    }
    points
}

/// Read one `{date|dt, close|price}` item. Numeric dates become text and
/// numeric strings become prices; anything else drops the item.
pub fn extract_point(item: &Value) -> Option<ForecastPoint> {
    let fields = item.as_object()?;
    let date = present(fields, "date").or_else(|| present(fields, "dt"))?;
    let close = present(fields, "close").or_else(|| present(fields, "price"))?;

    Some(ForecastPoint {
        date: coerce_date(date)?,
        close: coerce_price(close)?,
    })
}

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn coerce_date(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    price.filter(|p| p.is_finite())
}

/// Parse free text holding lines such as `  2025-01-06: $150.50`.
///
/// Only lines with both `:` and `$` qualify. The price is the number leading
/// the text after the last colon, so trailing units or notes are ignored; the
/// date is the last word before that colon.
pub fn parse_price_lines(text: &str) -> Vec<ForecastPoint> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_price_line)
        .collect()
}

fn parse_price_line(line: &str) -> Option<ForecastPoint> {
    if !(line.contains(':') && line.contains('$')) {
        return None;
    }

    let (label, amount) = line.rsplit_once(':')?;
    let date = label.split_whitespace().last()?;
    let amount: String = amount.chars().filter(|c| *c != '$' && *c != ',').collect();
    let close = leading_number(amount.trim_start())?;

    Some(ForecastPoint::new(date, close))
}

/// Longest decimal number at the start of `text`: sign, digits, fraction,
/// exponent. `150.50USD` reads as 150.5.
fn leading_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = count_digits(&bytes[exp..]);
        if exp_digits > 0 {
            end = exp + exp_digits;
        }
    }

    text[..end].parse::<f64>().ok().filter(|p| p.is_finite())
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(date: &str, close: f64) -> ForecastPoint {
        ForecastPoint::new(date, close)
    }

    #[test]
    fn test_empty_inputs() {
        for raw in [Value::Null, json!(""), json!([]), json!({}), json!(42), json!(false)] {
            let series = normalize(&raw);
            assert!(series.forecast.is_empty(), "forecast not empty for {raw}");
            assert!(series.history.is_empty(), "history not empty for {raw}");
        }
    }

    #[test]
    fn test_plain_array() {
        let raw = json!([
            {"date": "2025-01-06", "close": 150},
            {"date": "2025-01-07", "close": 151}
        ]);
        let series = normalize(&raw);
        assert_eq!(series.forecast, vec![point("2025-01-06", 150.0), point("2025-01-07", 151.0)]);
        assert!(series.history.is_empty());
    }

    #[test]
    fn test_array_skips_incomplete_items() {
        let raw = json!([
            {"date": "2025-01-06", "close": 150},
            {"close": 151},
            {"date": "2025-01-08"},
            {"date": null, "close": 152},
            "2025-01-09: $153",
            null,
            7
        ]);
        assert_eq!(normalize(&raw).forecast, vec![point("2025-01-06", 150.0)]);
    }

    #[test]
    fn test_field_aliases() {
        let raw = json!([
            {"date": "2025-01-06", "price": 149.5},
            {"dt": "2025-01-07", "close": 150.5},
            {"dt": "2025-01-08", "price": "151.5"}
        ]);
        assert_eq!(
            normalize(&raw).forecast,
            vec![
                point("2025-01-06", 149.5),
                point("2025-01-07", 150.5),
                point("2025-01-08", 151.5)
            ]
        );
    }

    #[test]
    fn test_null_primary_field_falls_back_to_alias() {
        let raw = json!([{"date": null, "dt": "2025-01-06", "close": null, "price": 10}]);
        assert_eq!(normalize(&raw).forecast, vec![point("2025-01-06", 10.0)]);
    }

    #[test]
    fn test_type_coercion() {
        let raw = json!([{"date": 20250106, "close": "150.5"}]);
        assert_eq!(normalize(&raw).forecast, vec![point("20250106", 150.5)]);

        let raw = json!([{"date": "2025-01-06", "close": " 99 "}]);
        assert_eq!(normalize(&raw).forecast, vec![point("2025-01-06", 99.0)]);
    }

    #[test]
    fn test_unparsable_prices_dropped() {
        let raw = json!([
            {"date": "2025-01-06", "close": "n/a"},
            {"date": "2025-01-07", "close": ""},
            {"date": "2025-01-08", "close": "NaN"},
            {"date": "2025-01-09", "close": {"value": 1}},
            {"date": ["2025-01-10"], "close": 1}
        ]);
        assert!(normalize(&raw).forecast.is_empty());
    }

    #[test]
    fn test_mapping_prefers_full_forecast() {
        let raw = json!({
            "week": [{"date": "2025-01-06", "close": 150}],
            "full_forecast": [
                {"date": "2025-01-06", "close": 150},
                {"date": "2025-01-07", "close": 151},
                {"date": "2025-01-08", "close": 152}
            ]
        });
        assert_eq!(normalize(&raw).forecast.len(), 3);
    }

    #[test]
    fn test_mapping_key_order() {
        let raw = json!({
            "data": [{"date": "d", "close": 4}],
            "predictions": [{"date": "p", "close": 3}],
            "forecast": [{"date": "f", "close": 2}]
        });
        assert_eq!(normalize(&raw).forecast, vec![point("f", 2.0)]);

        let raw = json!({
            "data": [{"date": "d", "close": 4}],
            "predictions": [{"date": "p", "close": 3}]
        });
        assert_eq!(normalize(&raw).forecast, vec![point("p", 3.0)]);
    }

    #[test]
    fn test_preferred_key_must_hold_a_sequence() {
        let raw = json!({
            "full_forecast": "see quarter",
            "quarter": [{"date": "2025-03-31", "close": 170}]
        });
        assert_eq!(normalize(&raw).forecast, vec![point("2025-03-31", 170.0)]);
    }

    #[test]
    fn test_mapping_falls_back_to_first_sequence() {
        let raw = json!({
            "model": "lstm",
            "some_other_key": [{"date": "2025-01-06", "close": 150}],
            "later_key": [{"date": "2025-02-06", "close": 160}, {"date": "2025-02-07", "close": 161}]
        });
        assert_eq!(normalize(&raw).forecast, vec![point("2025-01-06", 150.0)]);
    }

    #[test]
    fn test_empty_preferred_sequence_falls_back() {
        let raw = json!({
            "week": [{"date": "2025-01-06", "close": 150}],
            "full_forecast": []
        });
        assert_eq!(normalize(&raw).forecast, vec![point("2025-01-06", 150.0)]);

        // The fallback scan itself takes the first sequence, empty or not.
        let raw = json!({
            "forecast": [],
            "week": [{"date": "2025-01-06", "close": 150}]
        });
        assert!(normalize(&raw).forecast.is_empty());
    }

    #[test]
    fn test_mapping_without_sequences() {
        let raw = json!({"some_string": "value", "some_number": 42});
        assert!(normalize(&raw).is_empty());
    }

    #[test]
    fn test_history_extracted_independently() {
        let raw = json!({
            "full_forecast": [{"date": "2025-01-10", "close": 155}],
            "history": [
                {"date": "2024-12-30", "close": 148},
                {"dt": "2024-12-31", "price": "149"},
                {"date": "2025-01-02"}
            ]
        });
        let series = normalize(&raw);
        assert_eq!(series.forecast, vec![point("2025-01-10", 155.0)]);
        assert_eq!(series.history, vec![point("2024-12-30", 148.0), point("2024-12-31", 149.0)]);
    }

    #[test]
    fn test_multi_horizon_mapping_reads_full_quarter() {
        let quarter: Vec<Value> = (0..63)
            .map(|i| json!({"date": format!("day-{i:02}"), "close": 150 + i}))
            .collect();
        let raw = json!({
            "week": quarter[..5],
            "month": quarter[..21],
            "quarter": quarter,
            "full_forecast": quarter
        });
        assert_eq!(normalize(&raw).forecast.len(), 63);
    }

    #[test]
    fn test_text_lines() {
        let raw = json!("5-Day Price Forecast:\n  2025-01-06: $150.50\n  2025-01-07: $151.00\n");
        let series = normalize(&raw);
        assert_eq!(series.forecast.len(), 2);
        assert_eq!(series.forecast[0].date, "2025-01-06");
        assert!((series.forecast[0].close - 150.5).abs() < 1e-9);
        assert!(series.history.is_empty());
    }

    #[test]
    fn test_text_uses_last_colon_and_last_label_word() {
        let points = parse_price_lines("Day 1 close 2025-01-06: $1,234.50\nAt 10:30 2025-01-07: $1,240 (est.)");
        assert_eq!(points, vec![point("2025-01-06", 1234.5), point("2025-01-07", 1240.0)]);
    }

    #[test]
    fn test_text_price_reads_leading_number() {
        let points = parse_price_lines(
            "2025-01-06: $150.50USD\n2025-01-07: $151.25*\n2025-01-08: $.5\n2025-01-09: $1.5e2 approx\n2025-01-10: $-3",
        );
        assert_eq!(
            points,
            vec![
                point("2025-01-06", 150.5),
                point("2025-01-07", 151.25),
                point("2025-01-08", 0.5),
                point("2025-01-09", 150.0),
                point("2025-01-10", -3.0)
            ]
        );
        assert!(parse_price_lines("2025-01-06: $USD150\n2025-01-07: $-\n2025-01-08: $.").is_empty());
    }

    #[test]
    fn test_text_skips_unparsable_lines() {
        assert!(normalize(&json!("no data")).is_empty());
        assert!(parse_price_lines("Target: $TBD\n: $\nPrice $150").is_empty());
        assert_eq!(parse_price_lines("bad: $x\r\n2025-01-06: $10\r\n"), vec![point("2025-01-06", 10.0)]);
    }
}
