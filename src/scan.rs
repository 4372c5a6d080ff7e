//! Cursor-based key enumeration.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::connection::{cmd, Connection};
use crate::error::{Error, Result};
use crate::reply::Reply;
use crate::types::{Kind, ScanPage};

/// How a walk applies the type filter.
#[derive(Debug, Clone, Copy)]
enum Filter<'a> {
    None,
    /// `SCAN ... TYPE kind`.
    Native(&'a Kind),
    /// Unfiltered `SCAN`, then `TYPE` per key.
    ClientSide(&'a Kind),
}

impl Connection {
    /// SCAN cursor MATCH pattern COUNT count [TYPE kind] - one page of keys.
    ///
    /// Keeps calling SCAN from `cursor` until `count` keys are collected or
    /// the store reports cursor 0. `next_cursor` is the cursor of the last
    /// SCAN issued, so resuming from it neither skips nor repeats keys. A
    /// page never repeats a key. Every SCAN gets the full `count` as its
    /// COUNT hint and every key of the last batch is kept, so a page can be
    /// longer than `count`.
    pub fn scan_page(
        &mut self,
        pattern: &str,
        type_filter: Option<&Kind>,
        count: usize,
        cursor: u64,
    ) -> Result<ScanPage> {
        if count == 0 {
            return Err(Error::validation("count must be at least 1"));
        }
        let kind = match type_filter {
            Some(kind) => kind,
            None => return self.walk(pattern, Filter::None, count, cursor),
        };

        match self.capabilities().scan_type_filter {
            Some(false) => self.walk(pattern, Filter::ClientSide(kind), count, cursor),
            Some(true) => self.walk(pattern, Filter::Native(kind), count, cursor),
            None => match self.walk(pattern, Filter::Native(kind), count, cursor) {
                Ok(page) => {
                    self.capabilities_mut().scan_type_filter = Some(true);
                    Ok(page)
                }
                Err(err) if err.is_unsupported_option() => {
                    warn!(
                        "{} rejected SCAN TYPE ({}), filtering by type on the client",
                        self.endpoint(),
                        err
                    );
                    self.capabilities_mut().scan_type_filter = Some(false);
                    self.walk(pattern, Filter::ClientSide(kind), count, cursor)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Walk from cursor 0 until the end or until `limit` keys are found.
    pub fn scan_all(
        &mut self,
        pattern: &str,
        type_filter: Option<&Kind>,
        count: usize,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let page = self.scan_page(pattern, type_filter, count, cursor)?;
            for key in page.keys {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            cursor = page.next_cursor;
            if cursor == 0 || keys.len() >= limit {
                break;
            }
        }
        keys.truncate(limit);
        Ok(keys)
    }

    fn walk(&mut self, pattern: &str, filter: Filter<'_>, count: usize, cursor: u64) -> Result<ScanPage> {
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut next = cursor;

        loop {
            let mut request = cmd("SCAN")
                .arg(next.to_string())
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count.to_string());
            if let Filter::Native(kind) = filter {
                request = request.arg("TYPE").arg(kind.as_str());
            }

            let (cursor, batch) = scan_reply(self.query(request)?)?;
            next = cursor;
            for key in batch {
                if seen.contains(&key) {
                    continue;
                }
                if let Filter::ClientSide(kind) = filter {
                    if self.key_type(&key)? != *kind {
                        continue;
                    }
                }
                seen.insert(key.clone());
                keys.push(key);
            }

            if next == 0 || keys.len() >= count {
                break;
            }
        }

        debug!("SCAN {} from {} -> {} keys, next cursor {}", pattern, cursor, keys.len(), next);
        Ok(ScanPage {
            keys,
            next_cursor: next,
        })
    }
}

/// `[cursor, [key, ...]]`
fn scan_reply(reply: Reply) -> Result<(u64, Vec<String>)> {
    match reply {
        Reply::Array(parts) if parts.len() == 2 => {
            let mut parts = parts.into_iter();
            let cursor = match parts.next() {
                Some(Reply::Text(text)) => text
                    .parse::<u64>()
                    .map_err(|_| Error::unexpected_reply("SCAN cursor", text))?,
                Some(Reply::Int(n)) if n >= 0 => n as u64,
                other => return Err(Error::unexpected_reply("SCAN cursor", other)),
            };
            let keys = match parts.next() {
                Some(keys) => keys.into_strings()?,
                None => Vec::new(),
            };
            Ok((cursor, keys))
        }
        other => Err(Error::unexpected_reply("SCAN", other)),
    }
}
