//! Conversion between native value shapes and [`ValueRecord`]s.

use serde_json::Value as Json;
use tracing::debug;

use crate::connection::{cmd, Connection};
use crate::error::{Error, Result};
use crate::reply::Reply;
use crate::types::{Kind, Payload, ScoredMember, SetAck, StreamEntry, ValueRecord};

/// Element budget used by callers that have no opinion.
pub const DEFAULT_MAX_ITEMS: usize = 200;

impl Connection {
    /// Read `key` into a display record.
    ///
    /// Lists, sorted sets and streams are bounded to `max_items` elements;
    /// hashes and sets are read whole. Read-only.
    pub fn decode_for_display(&mut self, key: &str, max_items: usize) -> Result<ValueRecord> {
        if max_items == 0 {
            return Err(Error::validation("max_items must be at least 1"));
        }
        let kind = self.key_type(key)?;
        let stop = (max_items - 1).to_string();

        let value = match &kind {
            Kind::String => self.read_scalar(key)?,
            Kind::Hash => {
                let pairs = self.query(cmd("HGETALL").arg(key))?.into_pairs()?;
                let mut fields = std::collections::BTreeMap::new();
                for (field, value) in pairs {
                    fields.insert(text_of(field)?, text_of(value)?);
                }
                Payload::Hash(fields)
            }
            Kind::List => Payload::List(
                self.query(cmd("LRANGE").arg(key).arg("0").arg(&stop))?
                    .into_strings()?,
            ),
            Kind::Set => {
                let mut members = self.query(cmd("SMEMBERS").arg(key))?.into_strings()?;
                members.sort();
                Payload::Set(members)
            }
            Kind::ZSet => {
                let pairs = self
                    .query(cmd("ZRANGE").arg(key).arg("0").arg(&stop).arg("WITHSCORES"))?
                    .into_pairs()?;
                let mut members = Vec::with_capacity(pairs.len());
                for (member, score) in pairs {
                    members.push(ScoredMember::new(text_of(member)?, score_of(score)?));
                }
                Payload::ZSet(members)
            }
            Kind::Stream => {
                let reply = self.query(
                    cmd("XRANGE")
                        .arg(key)
                        .arg("-")
                        .arg("+")
                        .arg("COUNT")
                        .arg(max_items.to_string()),
                )?;
                Payload::Stream(stream_entries(reply)?)
            }
            Kind::Absent => Payload::Absent,
            Kind::Other(name) => {
                debug!("No decoder for type {} of key {}, reading as string", name, key);
                self.read_scalar(key)?
            }
        };

        Ok(ValueRecord {
            kind,
            key: key.to_string(),
            value,
        })
    }

    /// Validate `text` for `kind` and write it to `key`.
    ///
    /// Lists, sets and sorted sets replace the existing key when the input
    /// is non-empty, so re-applying the same input is idempotent.
    pub fn encode_for_store(&mut self, key: &str, text: &str, kind: &str) -> Result<SetAck> {
        let kind: Kind = kind.parse()?;
        match kind {
            Kind::String => {
                self.query(cmd("SET").arg(key).arg(text))?;
                Ok(SetAck::new("SET", key))
            }
            Kind::Hash => {
                let object = match parse_json(text, "hash")? {
                    Json::Object(object) => object,
                    _ => return Err(Error::validation("hash value must be a JSON object")),
                };
                if object.is_empty() {
                    return Err(Error::validation("hash value must have at least one field"));
                }
                let mut request = cmd("HSET").arg(key);
                for (field, value) in &object {
                    request = request.arg(field).arg(store_text(value));
                }
                self.query(request)?;
                Ok(SetAck::new("HSET", key).fields(object.len()))
            }
            Kind::List => {
                let items = json_array(text, "list")?;
                if !items.is_empty() {
                    self.replace_with(key, cmd("RPUSH").arg(key), items.iter().map(store_text))?;
                }
                Ok(SetAck::new("RPUSH", key).length(items.len()))
            }
            Kind::Set => {
                let items = json_array(text, "set")?;
                if !items.is_empty() {
                    self.replace_with(key, cmd("SADD").arg(key), items.iter().map(store_text))?;
                }
                Ok(SetAck::new("SADD", key).length(items.len()))
            }
            Kind::ZSet => {
                let members = parse_scored(text)?;
                if !members.is_empty() {
                    let args = members
                        .iter()
                        .flat_map(|m| [m.score.to_string(), m.member.clone()]);
                    self.replace_with(key, cmd("ZADD").arg(key), args)?;
                }
                Ok(SetAck::new("ZADD", key).length(members.len()))
            }
            other => Err(Error::validation(format!(
                "writing values of type {} is not supported",
                other
            ))),
        }
    }

    fn read_scalar(&mut self, key: &str) -> Result<Payload> {
        match self.query(cmd("GET").arg(key))?.into_text()? {
            None => Ok(Payload::Absent),
            Some(text) => Ok(decode_scalar(text)),
        }
    }

    /// DEL then one bulk write. Not atomic.
    fn replace_with(
        &mut self,
        key: &str,
        mut write: crate::connection::Request,
        args: impl Iterator<Item = String>,
    ) -> Result<()> {
        self.query(cmd("DEL").arg(key))?;
        for arg in args {
            write = write.arg(arg);
        }
        self.query(write)?;
        Ok(())
    }
}

/// JSON text becomes structured, anything else stays text.
pub fn decode_scalar(text: String) -> Payload {
    match serde_json::from_str::<Json>(&text) {
        Ok(json) => Payload::Json(json),
        Err(_) => Payload::Text(text),
    }
}

/// Strings are stored as-is; numbers, booleans and null as their JSON text.
/// Objects and arrays are written with `", "` and `": "` separators, e.g.
/// `[1, 2]`.
pub fn store_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Array(_) | Json::Object(_) => spaced_json(value),
        other => other.to_string(),
    }
}

fn spaced_json(value: &Json) -> String {
    use serde::Serialize;

    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Single-line JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        writer.write_all(b": ")
    }
}

fn parse_json(text: &str, kind: &str) -> Result<Json> {
    serde_json::from_str(text)
        .map_err(|e| Error::validation(format!("{} value is not valid JSON: {}", kind, e)))
}

fn json_array(text: &str, kind: &str) -> Result<Vec<Json>> {
    match parse_json(text, kind)? {
        Json::Array(items) => Ok(items),
        _ => Err(Error::validation(format!("{} value must be a JSON array", kind))),
    }
}

/// Accepts `[{"member": m, "score": s}, ...]` or `[[m, s], ...]`.
pub fn parse_scored(text: &str) -> Result<Vec<ScoredMember>> {
    let items = match parse_json(text, "zset")? {
        Json::Array(items) => items,
        _ => {
            return Err(Error::validation(
                "zset value must be an array of pairs or objects",
            ))
        }
    };

    items
        .iter()
        .map(|item| match item {
            Json::Object(object) => {
                let member = object
                    .get("member")
                    .ok_or_else(|| Error::validation("zset entry is missing \"member\""))?;
                // A missing score defaults to 0.
                let score = match object.get("score") {
                    Some(score) => json_score(score)?,
                    None => 0.0,
                };
                Ok(ScoredMember::new(store_text(member), score))
            }
            Json::Array(pair) if pair.len() == 2 => {
                Ok(ScoredMember::new(store_text(&pair[0]), json_score(&pair[1])?))
            }
            other => Err(Error::validation(format!(
                "zset entry must be {{\"member\", \"score\"}} or [member, score], got {}",
                other
            ))),
        })
        .collect()
}

fn json_score(value: &Json) -> Result<f64> {
    let score = match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match score {
        Some(score) if !score.is_nan() => Ok(score),
        _ => Err(Error::validation(format!("zset score is not a number: {}", value))),
    }
}

fn text_of(reply: Reply) -> Result<String> {
    reply
        .into_text()?
        .ok_or_else(|| Error::unexpected_reply("element read", Reply::Nil))
}

fn score_of(reply: Reply) -> Result<f64> {
    match reply {
        Reply::Double(d) => Ok(d),
        Reply::Int(n) => Ok(n as f64),
        Reply::Text(s) => s
            .parse()
            .map_err(|_| Error::unexpected_reply("zset score", s)),
        other => Err(Error::unexpected_reply("zset score", other)),
    }
}

fn stream_entries(reply: Reply) -> Result<Vec<StreamEntry>> {
    let items = match reply {
        Reply::Nil => return Ok(Vec::new()),
        Reply::Array(items) => items,
        other => return Err(Error::unexpected_reply("XRANGE", other)),
    };

    items
        .into_iter()
        .map(|item| match item {
            Reply::Array(parts) if parts.len() == 2 => {
                let mut parts = parts.into_iter();
                let id = parts.next().map(text_of).transpose()?.unwrap_or_default();
                let fields = match parts.next() {
                    Some(fields) => fields
                        .into_pairs()?
                        .into_iter()
                        .map(|(f, v)| Ok((text_of(f)?, text_of(v)?)))
                        .collect::<Result<Vec<_>>>()?,
                    None => Vec::new(),
                };
                Ok(StreamEntry { id, fields })
            }
            other => Err(Error::unexpected_reply("XRANGE entry", other)),
        })
        .collect()
}
