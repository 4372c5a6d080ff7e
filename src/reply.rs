//! Text normalization of transport replies.
//!
//! Every value leaving the crate goes through [`Reply::from_value`], so bulk
//! byte payloads are already text by the time callers see them.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Int(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    Array(Vec<Reply>),
    Map(Vec<(Reply, Reply)>),
}

impl Reply {
    /// Recursively convert a transport value, decoding byte payloads as
    /// UTF-8 (invalid sequences are replaced).
    pub fn from_value(value: redis::Value) -> Self {
        use redis::Value;

        match value {
            Value::Nil => Reply::Nil,
            Value::Int(n) => Reply::Int(n),
            Value::BulkString(bytes) => Reply::Text(bytes_to_text(bytes)),
            Value::SimpleString(s) => Reply::Text(s),
            Value::Okay => Reply::Text("OK".to_string()),
            Value::Array(items) | Value::Set(items) => {
                Reply::Array(items.into_iter().map(Reply::from_value).collect())
            }
            Value::Map(pairs) => Reply::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| (Reply::from_value(k), Reply::from_value(v)))
                    .collect(),
            ),
            Value::Double(d) => Reply::Double(d),
            Value::Boolean(b) => Reply::Bool(b),
            Value::VerbatimString { text, .. } => Reply::Text(text),
            other => Reply::Text(format!("{:?}", other)),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Scalar rendered as text; `None` for nil.
    pub fn into_text(self) -> Result<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Text(s) => Ok(Some(s)),
            Reply::Int(n) => Ok(Some(n.to_string())),
            Reply::Double(d) => Ok(Some(d.to_string())),
            Reply::Bool(b) => Ok(Some(b.to_string())),
            other => Err(Error::unexpected_reply("scalar read", other)),
        }
    }

    pub fn into_int(self) -> Result<i64> {
        match self {
            Reply::Int(n) => Ok(n),
            Reply::Bool(b) => Ok(b as i64),
            Reply::Text(s) => s
                .parse()
                .map_err(|_| Error::unexpected_reply("integer read", s)),
            other => Err(Error::unexpected_reply("integer read", other)),
        }
    }

    /// Flat array of scalars. Nil reads as an empty list.
    pub fn into_strings(self) -> Result<Vec<String>> {
        match self {
            Reply::Nil => Ok(Vec::new()),
            Reply::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.into_text()?
                        .ok_or_else(|| Error::unexpected_reply("list element", Reply::Nil))
                })
                .collect(),
            other => Err(Error::unexpected_reply("list read", other)),
        }
    }

    /// Field/value pairs from either a flat `[k1, v1, k2, v2]` array, an
    /// array of two-element arrays, or a map reply.
    pub fn into_pairs(self) -> Result<Vec<(Reply, Reply)>> {
        match self {
            Reply::Nil => Ok(Vec::new()),
            Reply::Map(pairs) => Ok(pairs),
            Reply::Array(items) => {
                let nested = items
                    .iter()
                    .all(|item| matches!(item, Reply::Array(inner) if inner.len() == 2));
                if nested && !items.is_empty() {
                    return Ok(items
                        .into_iter()
                        .filter_map(|item| match item {
                            Reply::Array(inner) => {
                                let mut inner = inner.into_iter();
                                Some((inner.next()?, inner.next()?))
                            }
                            _ => None,
                        })
                        .collect());
                }
                if items.len() % 2 != 0 {
                    return Err(Error::unexpected_reply("pair read", Reply::Array(items)));
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    pairs.push((k, v));
                }
                Ok(pairs)
            }
            other => Err(Error::unexpected_reply("pair read", other)),
        }
    }

    /// Text form used when a reply appears as a map key.
    fn key_text(&self) -> String {
        match self {
            Reply::Nil => "null".to_string(),
            Reply::Int(n) => n.to_string(),
            Reply::Double(d) => d.to_string(),
            Reply::Bool(b) => b.to_string(),
            Reply::Text(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

fn bytes_to_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Reply::Nil => serializer.serialize_unit(),
            Reply::Int(n) => serializer.serialize_i64(*n),
            Reply::Double(d) => serializer.serialize_f64(*d),
            Reply::Bool(b) => serializer.serialize_bool(*b),
            Reply::Text(s) => serializer.serialize_str(s),
            Reply::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Reply::Map(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(&k.key_text(), v)?;
                }
                map.end()
            }
        }
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Reply::Int(n)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Text(s.to_string())
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Text(s)
    }
}

impl<T: Into<Reply>> From<Vec<T>> for Reply {
    fn from(items: Vec<T>) -> Self {
        Reply::Array(items.into_iter().map(Into::into).collect())
    }
}
