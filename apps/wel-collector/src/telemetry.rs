use crate::field::{self, Field};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;

pub const TIMESTAMP_KEY: &str = "dateandtime";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    /// Raw vendor value that did not parse as a number.
    Text(String),
    /// Present but rejected, e.g. an implausible COP.
    Missing,
}

impl FieldValue {
    /// Parses a vendor value, keeping the raw string when it is not numeric.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => FieldValue::Number(value),
            _ => FieldValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Number(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FieldValue::Text(text) => JsonValue::String(text.clone()),
            FieldValue::Missing => JsonValue::Null,
        }
    }

    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(num) => num.as_f64().map(FieldValue::Number),
            JsonValue::String(text) => Some(FieldValue::Text(text.clone())),
            JsonValue::Null => Some(FieldValue::Missing),
            JsonValue::Bool(flag) => Some(FieldValue::Number(if *flag { 1.0 } else { 0.0 })),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

/// One adapter's contribution to a cycle.
pub type Readings = BTreeMap<Field, FieldValue>;

/// One poll cycle, keyed by its capture timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    values: BTreeMap<Field, FieldValue>,
}

impl TelemetryRecord {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, field: Field, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.values.insert(field, value.into())
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    /// Numeric value of `field`, `None` when absent, textual or missing.
    pub fn number(&self, field: Field) -> Option<f64> {
        self.values.get(&field).and_then(FieldValue::as_f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &FieldValue)> {
        self.values.iter()
    }

    pub fn to_document(&self) -> Map<String, JsonValue> {
        let mut doc = Map::with_capacity(self.values.len() + 1);
        doc.insert(
            TIMESTAMP_KEY.to_string(),
            JsonValue::String(self.timestamp.to_rfc3339()),
        );
        for (field, value) in &self.values {
            doc.insert(field.name().to_string(), value.to_json());
        }
        doc
    }

    /// Rebuilds a record from a stored document. Keys outside the catalogue
    /// are dropped.
    pub fn from_document(timestamp: DateTime<Utc>, doc: &Map<String, JsonValue>) -> Self {
        let mut record = Self::new(timestamp);
        for (key, value) in doc {
            if key == TIMESTAMP_KEY || key == "_id" {
                continue;
            }
            let Some(field) = field::lookup(key) else {
                tracing::debug!(key = %key, "dropping unknown stored field");
                continue;
            };
            if let Some(value) = FieldValue::from_json(value) {
                record.values.insert(field, value);
            }
        }
        record
    }
}

/// Truncates to the store's clock tick.
pub fn capture_timestamp(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(0)
}
