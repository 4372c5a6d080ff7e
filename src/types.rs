use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::Error;

/// Native type of a key as reported by `TYPE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    String,
    Hash,
    List,
    Set,
    ZSet,
    Stream,
    /// Key does not exist (`TYPE` answered `none`).
    Absent,
    /// Module or future type the codec has no decoder for.
    Other(String),
}

impl Kind {
    /// Map a `TYPE` reply onto a kind. Never fails: unknown names become
    /// `Kind::Other`.
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "string" => Kind::String,
            "hash" => Kind::Hash,
            "list" => Kind::List,
            "set" => Kind::Set,
            "zset" => Kind::ZSet,
            "stream" => Kind::Stream,
            "none" => Kind::Absent,
            _ => Kind::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Kind::String => "string",
            Kind::Hash => "hash",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::ZSet => "zset",
            Kind::Stream => "stream",
            Kind::Absent => "none",
            Kind::Other(name) => name,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses caller input. Only the native kinds are accepted here.
impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Kind::from_type_name(s.trim()) {
            Kind::Other(name) => Err(Error::validation(format!("unsupported type: {}", name))),
            kind => Ok(kind),
        }
    }
}

impl Serialize for Kind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Sorted-set member with its score.
///
/// Serialized as a `[member, score]` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

impl Serialize for ScoredMember {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.member, self.score).serialize(serializer)
    }
}

/// One stream entry, serialized as `[id, {field: value}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl Serialize for StreamEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.id, FieldMap(&self.fields)).serialize(serializer)
    }
}

struct FieldMap<'a>(&'a [(String, String)]);

impl Serialize for FieldMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

/// Decoded value of a key. The variant always matches the record's `Kind`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Missing key.
    Absent,
    /// String value that is not valid JSON.
    Text(String),
    /// String value holding JSON text.
    Json(serde_json::Value),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
    /// Always sorted lexicographically.
    Set(Vec<String>),
    ZSet(Vec<ScoredMember>),
    Stream(Vec<StreamEntry>),
}

/// `{ "type": ..., "key": ..., "value": ... }` record handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRecord {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub key: String,
    pub value: Payload,
}

/// Acknowledgement of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetAck {
    pub acknowledged: bool,
    /// Native command that performed the write.
    pub operation: &'static str,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl SetAck {
    pub fn new(operation: &'static str, key: &str) -> Self {
        Self {
            acknowledged: true,
            operation,
            key: key.to_string(),
            fields: None,
            length: None,
        }
    }

    pub fn fields(mut self, fields: usize) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// One page of a cursor walk. `next_cursor == 0` means the walk is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanPage {
    pub keys: Vec<String>,
    pub next_cursor: u64,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor == 0
    }
}
