use serde_json::{Map, Value};

/// The shapes a `predictions` value arrives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredictionsPayload<'a> {
    /// Null, missing, or an empty/whitespace string.
    Empty,
    Sequence(&'a [Value]),
    Mapping(&'a Map<String, Value>),
    Text(&'a str),
    /// Numbers and booleans.
    Other,
}

impl<'a> PredictionsPayload<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Null => PredictionsPayload::Empty,
            Value::String(s) if s.trim().is_empty() => PredictionsPayload::Empty,
            Value::String(s) => PredictionsPayload::Text(s),
            Value::Array(items) => PredictionsPayload::Sequence(items),
            Value::Object(map) => PredictionsPayload::Mapping(map),
            Value::Bool(_) | Value::Number(_) => PredictionsPayload::Other,
        }
    }
}
