//! Key and server level operations.

use std::collections::BTreeMap;

use tracing::debug;

use crate::connection::{cmd, Connection};
use crate::error::{Error, Result};
use crate::types::Kind;

impl Connection {
    /// TYPE key - native kind, `Kind::Absent` for a missing key
    pub fn key_type(&mut self, key: &str) -> Result<Kind> {
        let name = self
            .query(cmd("TYPE").arg(key))?
            .into_text()?
            .unwrap_or_else(|| "none".to_string());
        Ok(Kind::from_type_name(&name))
    }

    /// DEL key - number of keys removed
    pub fn delete(&mut self, key: &str) -> Result<i64> {
        self.query(cmd("DEL").arg(key))?.into_int()
    }

    /// TTL key - seconds remaining, passed through unchanged.
    ///
    /// The store answers `-1` for a key without expiry and `-2` for a missing
    /// key; both come back as-is.
    pub fn ttl(&mut self, key: &str) -> Result<i64> {
        self.query(cmd("TTL").arg(key))?.into_int()
    }

    /// EXPIRE key seconds - true when the timeout was applied.
    ///
    /// Values are forwarded verbatim, so a negative `seconds` gets the store's
    /// own semantics (the key is deleted immediately).
    pub fn expire(&mut self, key: &str, seconds: i64) -> Result<bool> {
        Ok(self
            .query(cmd("EXPIRE").arg(key).arg(seconds.to_string()))?
            .into_int()?
            == 1)
    }

    /// EXPIRE with seconds typed in by a user. Only non-negative integers are
    /// accepted.
    pub fn expire_from_text(&mut self, key: &str, seconds: &str) -> Result<bool> {
        let seconds = parse_ttl_seconds(seconds)?;
        self.expire(key, seconds)
    }

    pub fn ping(&mut self) -> Result<bool> {
        let reply = self.query(cmd("PING"))?.into_text()?;
        Ok(matches!(reply, Some(ref pong) if pong.eq_ignore_ascii_case("PONG")))
    }

    /// INFO parsed into `field -> value`.
    pub fn info(&mut self) -> Result<BTreeMap<String, String>> {
        let text = self.query(cmd("INFO"))?.into_text()?.unwrap_or_default();
        Ok(parse_info(&text))
    }

    pub fn dbsize(&mut self) -> Result<i64> {
        self.query(cmd("DBSIZE"))?.into_int()
    }
}

/// Parse a TTL entered as text.
pub fn parse_ttl_seconds(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let seconds: i64 = trimmed
        .parse()
        .map_err(|_| Error::validation(format!("expire seconds must be an integer: {:?}", text)))?;
    if seconds < 0 {
        return Err(Error::validation(format!(
            "expire seconds must not be negative: {}",
            seconds
        )));
    }
    Ok(seconds)
}

/// `# Section` headers and blank lines are skipped; later duplicates win.
pub fn parse_info(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(':') {
            Some((field, value)) => {
                fields.insert(field.to_string(), value.to_string());
            }
            None => debug!("Ignoring INFO line without separator: {}", line),
        }
    }
    fields
}
