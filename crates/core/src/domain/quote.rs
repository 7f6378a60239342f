use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Rendering used for calendar-time fields in CSV output and documents.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Time(DateTime<Utc>),
}

impl FieldValue {
    pub fn from_json(v: Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::Text(s),
            // Quote payloads are flat; keep anything nested as its JSON text.
            other @ (Value::Array(_) | Value::Object(_)) => Self::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
        }
    }
}

/// One quote snapshot as returned by the provider: an ordered, flat set of
/// named scalar fields. Field order follows the provider payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteRecord {
    fields: Vec<(String, FieldValue)>,
}

impl QuoteRecord {
    pub fn from_json_object(obj: Map<String, Value>) -> Self {
        Self {
            fields: obj
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from_json(v)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces the value in place, or appends the field if absent.
    pub fn set(&mut self, name: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self.get("symbol")? {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for QuoteRecord {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        let mut out = Self::default();
        for (k, v) in iter {
            let k: String = k.into();
            out.set(&k, v);
        }
        out
    }
}

impl Serialize for QuoteRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
