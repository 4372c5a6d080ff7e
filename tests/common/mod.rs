//! In-memory stand-in for a Redis server.
//!
//! `MemoryStore` answers the command subset the crate uses, with replies in
//! the same shape the `redis` crate hands back for a RESP2 server. SCAN
//! cursors are positions in key order, and COUNT is the number of keys
//! examined per call, as on a real server.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use redis::{ErrorKind, RedisError, RedisResult, Value};
use redscope::{
    Capability, Connection, ConnectionFactory, ConnectionProfile, Connector, OpenError, ParamSet,
    Transport, TransportCapabilities,
};

#[derive(Debug, Clone)]
enum Entry {
    String(Vec<u8>),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
    Set(BTreeSet<String>),
    ZSet(Vec<(String, f64)>),
    Stream(Vec<(String, Vec<(String, String)>)>),
    /// Module type, readable with GET.
    Module(&'static str, Vec<u8>),
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::String(_) => "string",
            Entry::Hash(_) => "hash",
            Entry::List(_) => "list",
            Entry::Set(_) => "set",
            Entry::ZSet(_) => "zset",
            Entry::Stream(_) => "stream",
            Entry::Module(name, _) => name,
        }
    }
}

#[derive(Default)]
struct State {
    keys: BTreeMap<String, Entry>,
    ttls: BTreeMap<String, i64>,
    /// Reject `SCAN ... TYPE` like servers older than 6.0.
    legacy_scan: bool,
    /// Answer PING with an error.
    unhealthy: bool,
    /// Time out on every request.
    stalled: bool,
    log: Vec<String>,
    /// Full argument lists, command name first.
    requests: Vec<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn legacy() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().legacy_scan = true;
        store
    }

    pub fn unhealthy() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().unhealthy = true;
        store
    }

    pub fn stalled() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().stalled = true;
        store
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            state: self.state.clone(),
        }
    }

    /// Commands received so far, upper-cased names only.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.log.clear();
        state.requests.clear();
    }

    /// Every request whose command name is `name`, arguments included.
    pub fn requests(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r[0].eq_ignore_ascii_case(name))
            .cloned()
            .collect()
    }

    pub fn put_string(&self, key: &str, value: &str) {
        self.insert(key, Entry::String(value.as_bytes().to_vec()));
    }

    pub fn put_bytes(&self, key: &str, value: &[u8]) {
        self.insert(key, Entry::String(value.to_vec()));
    }

    pub fn put_list(&self, key: &str, items: &[&str]) {
        self.insert(key, Entry::List(items.iter().map(|s| s.to_string()).collect()));
    }

    pub fn put_set(&self, key: &str, members: &[&str]) {
        self.insert(key, Entry::Set(members.iter().map(|s| s.to_string()).collect()));
    }

    pub fn put_hash(&self, key: &str, fields: &[(&str, &str)]) {
        self.insert(
            key,
            Entry::Hash(
                fields
                    .iter()
                    .map(|(f, v)| (f.to_string(), v.to_string()))
                    .collect(),
            ),
        );
    }

    pub fn put_stream(&self, key: &str, entries: Vec<(&str, Vec<(&str, &str)>)>) {
        self.insert(
            key,
            Entry::Stream(
                entries
                    .iter()
                    .map(|(id, fields)| {
                        (
                            id.to_string(),
                            fields
                                .iter()
                                .map(|(f, v)| (f.to_string(), v.to_string()))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        );
    }

    /// Value of a module type the crate has no decoder for.
    pub fn put_module_value(&self, key: &str, type_name: &'static str, value: &str) {
        self.insert(key, Entry::Module(type_name, value.as_bytes().to_vec()));
    }

    pub fn exists(&self, key: &str) -> bool {
        self.state.lock().unwrap().keys.contains_key(key)
    }

    fn insert(&self, key: &str, entry: Entry) {
        self.state.lock().unwrap().keys.insert(key.to_string(), entry);
    }
}

pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl Transport for MemoryTransport {
    fn request(&mut self, args: &[Vec<u8>]) -> RedisResult<Value> {
        let mut state = self.state.lock().unwrap();
        let name = String::from_utf8_lossy(&args[0]).to_uppercase();
        state.log.push(name.clone());
        state
            .requests
            .push(args.iter().map(|a| String::from_utf8_lossy(a).into_owned()).collect());
        if state.stalled {
            return Err(RedisError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read timed out",
            )));
        }
        let args: Vec<String> = args[1..]
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        execute_command(&mut state, &name, &args)
    }
}

fn server_error(detail: &str) -> RedisError {
    RedisError::from((
        ErrorKind::ResponseError,
        "An error was signalled by the server",
        detail.to_string(),
    ))
}

fn wrong_type() -> RedisError {
    server_error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn wrong_arity(cmd: &str) -> RedisError {
    server_error(&format!("wrong number of arguments for '{}' command", cmd.to_lowercase()))
}

fn bulk(s: &str) -> Value {
    Value::BulkString(s.as_bytes().to_vec())
}

fn bulk_array<'a>(items: impl IntoIterator<Item = &'a String>) -> Value {
    Value::Array(items.into_iter().map(|s| bulk(s)).collect())
}

fn parse_index(s: &str) -> RedisResult<i64> {
    s.parse()
        .map_err(|_| server_error("value is not an integer or out of range"))
}

/// Redis-style inclusive range with negative indexes.
fn range(len: usize, start: i64, stop: i64) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return 0..0;
    }
    start as usize..(stop + 1) as usize
}

fn execute_command(state: &mut State, cmd: &str, args: &[String]) -> RedisResult<Value> {
    match cmd {
        "PING" => {
            if state.unhealthy {
                Err(server_error("LOADING Redis is loading the dataset in memory"))
            } else {
                Ok(Value::SimpleString("PONG".to_string()))
            }
        }
        "DBSIZE" => Ok(Value::Int(state.keys.len() as i64)),
        "INFO" => Ok(bulk(&format!(
            "# Server\r\nredis_version:7.2.4\r\n\r\n# Keyspace\r\ndb0:keys={},expires=0,avg_ttl=0\r\n",
            state.keys.len()
        ))),
        "TYPE" => {
            let [key] = args else { return Err(wrong_arity(cmd)) };
            let name = state.keys.get(key).map(|e| e.type_name()).unwrap_or("none");
            Ok(Value::SimpleString(name.to_string()))
        }
        "DEL" => {
            let mut removed = 0;
            for key in args {
                state.ttls.remove(key);
                if state.keys.remove(key).is_some() {
                    removed += 1;
                }
            }
            Ok(Value::Int(removed))
        }
        "TTL" => {
            let [key] = args else { return Err(wrong_arity(cmd)) };
            if !state.keys.contains_key(key) {
                return Ok(Value::Int(-2));
            }
            Ok(Value::Int(state.ttls.get(key).copied().unwrap_or(-1)))
        }
        "EXPIRE" => {
            let [key, seconds] = args else { return Err(wrong_arity(cmd)) };
            let seconds = parse_index(seconds)?;
            if !state.keys.contains_key(key) {
                return Ok(Value::Int(0));
            }
            // Non-positive timeouts delete the key straight away.
            if seconds <= 0 {
                state.keys.remove(key);
                state.ttls.remove(key);
            } else {
                state.ttls.insert(key.clone(), seconds);
            }
            Ok(Value::Int(1))
        }
        "GET" => {
            let [key] = args else { return Err(wrong_arity(cmd)) };
            match state.keys.get(key) {
                None => Ok(Value::Nil),
                Some(Entry::String(bytes)) | Some(Entry::Module(_, bytes)) => {
                    Ok(Value::BulkString(bytes.clone()))
                }
                Some(_) => Err(wrong_type()),
            }
        }
        "SET" => {
            let [key, value] = args else { return Err(wrong_arity(cmd)) };
            state.ttls.remove(key);
            state
                .keys
                .insert(key.clone(), Entry::String(value.as_bytes().to_vec()));
            Ok(Value::Okay)
        }
        "HSET" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(wrong_arity(cmd));
            }
            let entry = state
                .keys
                .entry(args[0].clone())
                .or_insert_with(|| Entry::Hash(BTreeMap::new()));
            let Entry::Hash(fields) = entry else { return Err(wrong_type()) };
            let mut added = 0;
            for pair in args[1..].chunks(2) {
                if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            Ok(Value::Int(added))
        }
        "HGETALL" => {
            let [key] = args else { return Err(wrong_arity(cmd)) };
            match state.keys.get(key) {
                None => Ok(Value::Array(Vec::new())),
                Some(Entry::Hash(fields)) => Ok(Value::Array(
                    fields.iter().flat_map(|(f, v)| [bulk(f), bulk(v)]).collect(),
                )),
                Some(_) => Err(wrong_type()),
            }
        }
        "RPUSH" => {
            if args.len() < 2 {
                return Err(wrong_arity(cmd));
            }
            let entry = state
                .keys
                .entry(args[0].clone())
                .or_insert_with(|| Entry::List(Vec::new()));
            let Entry::List(items) = entry else { return Err(wrong_type()) };
            items.extend(args[1..].iter().cloned());
            Ok(Value::Int(items.len() as i64))
        }
        "LRANGE" => {
            let [key, start, stop] = args else { return Err(wrong_arity(cmd)) };
            let (start, stop) = (parse_index(start)?, parse_index(stop)?);
            match state.keys.get(key) {
                None => Ok(Value::Array(Vec::new())),
                Some(Entry::List(items)) => Ok(bulk_array(&items[range(items.len(), start, stop)])),
                Some(_) => Err(wrong_type()),
            }
        }
        "SADD" => {
            if args.len() < 2 {
                return Err(wrong_arity(cmd));
            }
            let entry = state
                .keys
                .entry(args[0].clone())
                .or_insert_with(|| Entry::Set(BTreeSet::new()));
            let Entry::Set(members) = entry else { return Err(wrong_type()) };
            let added = args[1..].iter().filter(|m| members.insert(m.to_string())).count();
            Ok(Value::Int(added as i64))
        }
        "SMEMBERS" => {
            let [key] = args else { return Err(wrong_arity(cmd)) };
            match state.keys.get(key) {
                None => Ok(Value::Array(Vec::new())),
                // Reverse order: callers must not rely on the store's order.
                Some(Entry::Set(members)) => Ok(bulk_array(members.iter().rev())),
                Some(_) => Err(wrong_type()),
            }
        }
        "ZADD" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(wrong_arity(cmd));
            }
            let mut parsed = Vec::new();
            for pair in args[1..].chunks(2) {
                let score: f64 = pair[0]
                    .parse()
                    .map_err(|_| server_error("value is not a valid float"))?;
                parsed.push((pair[1].clone(), score));
            }
            let entry = state
                .keys
                .entry(args[0].clone())
                .or_insert_with(|| Entry::ZSet(Vec::new()));
            let Entry::ZSet(members) = entry else { return Err(wrong_type()) };
            let mut added = 0;
            for (member, score) in parsed {
                match members.iter_mut().find(|(m, _)| *m == member) {
                    Some(existing) => existing.1 = score,
                    None => {
                        members.push((member, score));
                        added += 1;
                    }
                }
            }
            members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            Ok(Value::Int(added))
        }
        "ZRANGE" => {
            let (key, start, stop) = match args {
                [key, start, stop] | [key, start, stop, _] => (key, start, stop),
                _ => return Err(wrong_arity(cmd)),
            };
            let with_scores = args.len() == 4 && args[3].eq_ignore_ascii_case("WITHSCORES");
            let (start, stop) = (parse_index(start)?, parse_index(stop)?);
            match state.keys.get(key) {
                None => Ok(Value::Array(Vec::new())),
                Some(Entry::ZSet(members)) => {
                    let mut out = Vec::new();
                    for (member, score) in &members[range(members.len(), start, stop)] {
                        out.push(bulk(member));
                        if with_scores {
                            out.push(bulk(&score.to_string()));
                        }
                    }
                    Ok(Value::Array(out))
                }
                Some(_) => Err(wrong_type()),
            }
        }
        "XRANGE" => {
            let key = args.first().ok_or_else(|| wrong_arity(cmd))?;
            let count = match args.get(3).map(|s| s.to_uppercase()) {
                Some(opt) if opt == "COUNT" => {
                    parse_index(args.get(4).ok_or_else(|| server_error("syntax error"))?)? as usize
                }
                _ => usize::MAX,
            };
            match state.keys.get(key) {
                None => Ok(Value::Array(Vec::new())),
                Some(Entry::Stream(entries)) => Ok(Value::Array(
                    entries
                        .iter()
                        .take(count)
                        .map(|(id, fields)| {
                            Value::Array(vec![
                                bulk(id),
                                Value::Array(
                                    fields.iter().flat_map(|(f, v)| [bulk(f), bulk(v)]).collect(),
                                ),
                            ])
                        })
                        .collect(),
                )),
                Some(_) => Err(wrong_type()),
            }
        }
        "SCAN" => cmd_scan(state, args),
        _ => Err(server_error(&format!(
            "unknown command '{}', with args beginning with: {}",
            cmd,
            args.iter().map(|a| format!("'{}' ", a)).collect::<String>()
        ))),
    }
}

fn cmd_scan(state: &State, args: &[String]) -> RedisResult<Value> {
    let cursor: usize = args
        .first()
        .ok_or_else(|| wrong_arity("SCAN"))?
        .parse()
        .map_err(|_| server_error("invalid cursor"))?;

    let mut pattern = "*".to_string();
    let mut count = 10usize;
    let mut type_filter: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        let opt = args[i].to_uppercase();
        let value = args.get(i + 1).ok_or_else(|| server_error("syntax error"))?;
        match opt.as_str() {
            "MATCH" => pattern = value.clone(),
            "COUNT" => {
                count = value
                    .parse()
                    .map_err(|_| server_error("value is not an integer or out of range"))?
            }
            "TYPE" if !state.legacy_scan => type_filter = Some(value.to_lowercase()),
            _ => return Err(server_error("syntax error")),
        }
        i += 2;
    }

    let all: Vec<(&String, &Entry)> = state.keys.iter().collect();
    let end = (cursor + count.max(1)).min(all.len());
    let batch: Vec<&String> = all
        .get(cursor..end)
        .unwrap_or(&[])
        .iter()
        .filter(|(key, _)| glob_match(&pattern, key))
        .filter(|(_, entry)| {
            type_filter
                .as_deref()
                .map_or(true, |t| entry.type_name() == t)
        })
        .map(|(key, _)| *key)
        .collect();
    let next = if end >= all.len() { 0 } else { end };

    Ok(Value::Array(vec![bulk(&next.to_string()), bulk_array(batch)]))
}

/// Glob with `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Connector handing out transports onto one `MemoryStore`, recording every
/// parameter set it is asked to open.
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    capabilities: TransportCapabilities,
    refuse: Option<Capability>,
    opened: Arc<Mutex<Vec<ParamSet>>>,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            capabilities: TransportCapabilities::full(),
            refuse: None,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_capabilities(mut self, capabilities: TransportCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Advertise everything but refuse parameter sets needing `capability`
    /// at open time.
    pub fn refusing(mut self, capability: Capability) -> Self {
        self.refuse = Some(capability);
        self
    }

    pub fn opened(&self) -> Vec<ParamSet> {
        self.opened.lock().unwrap().clone()
    }
}

impl Connector for MemoryConnector {
    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn open(&self, params: &ParamSet) -> Result<Box<dyn Transport>, OpenError> {
        self.opened.lock().unwrap().push(params.clone());
        if let Some(capability) = self.refuse {
            let mut only = TransportCapabilities::full();
            match capability {
                Capability::Username => only.username = false,
                Capability::Tls => only.tls = false,
                Capability::TlsContext => only.tls_context = false,
                Capability::CertRequirement => only.cert_requirement = false,
                Capability::LegacyTls => only.legacy_tls = false,
            }
            if let Some(missing) = only.missing_for(params) {
                return Err(OpenError::Unsupported(missing));
            }
        }
        Ok(Box::new(self.store.transport()))
    }
}

/// Live connection to `store` through the real factory.
pub fn connect(store: &MemoryStore) -> Connection {
    ConnectionFactory::with_connector(MemoryConnector::new(store.clone()))
        .connect(&ConnectionProfile::default())
        .expect("memory connection")
}
