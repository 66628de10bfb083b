//! Parameter metadata, query coercion, and canonical parameter sets
//!
//! The canonical form of a parameter set is the deterministic serialization
//! used for case identity and listing URLs: non-null pairs, sorted by name,
//! percent-encoded, joined with `&`. Equality and hashing of a [`ParamSet`]
//! derive solely from that string.

use crate::error::EngineError;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;

/// Characters escaped inside a canonical key or value. Everything a query
/// delimiter could be confused with must be encoded.
const COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'?')
    .add(b'<')
    .add(b'>');

/// Declared coercion target for a check parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Raw JSON; falls back to a string when the literal does not parse
    Json,
}

impl ParamKind {
    /// Human-readable type name used in binding error messages
    pub fn type_name(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Boolean => "boolean",
            ParamKind::Json => "json value",
        }
    }

    /// Infer the kind from a default value
    pub fn of(value: &Value) -> ParamKind {
        match value {
            Value::String(_) => ParamKind::String,
            Value::Bool(_) => ParamKind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ParamKind::Integer,
            Value::Number(_) => ParamKind::Float,
            _ => ParamKind::Json,
        }
    }

    /// Coerce a raw query literal to this kind
    pub fn coerce(self, raw: &str) -> Option<Value> {
        match self {
            ParamKind::String => Some(Value::String(raw.to_string())),
            ParamKind::Integer => raw.parse::<i64>().ok().map(Value::from),
            ParamKind::Float => raw.parse::<f64>().ok().map(Value::from),
            ParamKind::Boolean => {
                if raw.eq_ignore_ascii_case("true") {
                    Some(Value::Bool(true))
                } else if raw.eq_ignore_ascii_case("false") {
                    Some(Value::Bool(false))
                } else {
                    None
                }
            }
            ParamKind::Json => Some(
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            ),
        }
    }
}

/// Declared parameter of a check: name, default value, coercion kind
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub default: Value,
    pub kind: ParamKind,
}

impl ParamSpec {
    /// Declare a parameter whose kind is inferred from its default
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        let default = default.into();
        let kind = ParamKind::of(&default);
        Self {
            name: name.into(),
            default,
            kind,
        }
    }

    /// Declare a parameter with an explicit kind (for null defaults)
    pub fn typed(name: impl Into<String>, default: impl Into<Value>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            kind,
        }
    }

    /// Bind this parameter from a raw query literal
    pub fn bind(&self, raw: &str) -> Result<Value, EngineError> {
        self.kind
            .coerce(raw)
            .ok_or_else(|| EngineError::ParameterBinding {
                name: self.name.clone(),
                type_name: self.kind.type_name(),
            })
    }
}

/// Immutable, canonically ordered set of named argument values
#[derive(Debug, Clone)]
pub struct ParamSet {
    pairs: Vec<(String, Value)>,
    canonical: String,
}

impl ParamSet {
    /// Build a set from name/value pairs. Null values are dropped; pairs are
    /// sorted by name; the canonical string is computed once.
    pub fn new(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut pairs: Vec<(String, Value)> = pairs
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical = pairs
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(name, COMPONENT),
                    utf8_percent_encode(&literal(value), COMPONENT)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        Self { pairs, canonical }
    }

    /// Rebuild a set from a canonical string
    pub fn parse(canonical: &str) -> Self {
        Self::new(parse_query(canonical).into_iter().map(|(k, v)| (k, Value::String(v))))
    }

    /// The canonical query-string form
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Sorted non-null pairs
    pub fn pairs(&self) -> &[(String, Value)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl PartialEq for ParamSet {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ParamSet {}

impl std::hash::Hash for ParamSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

/// The query-literal form of a value: strings bare, everything else as its
/// JSON rendering
pub fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split and percent-decode a raw query string into ordered pairs
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let (key, value) = piece.split_once('=').unwrap_or((piece, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
