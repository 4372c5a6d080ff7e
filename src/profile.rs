use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to reach one logical database on a server.
///
/// The core never persists profiles; callers that want to remember them can
/// serialize this struct however they like.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    /// Verify the server certificate and hostname. Only meaningful with `tls`.
    pub verify_tls: bool,
    /// Connect, read and write timeout.
    pub timeout: Duration,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            tls: false,
            verify_tls: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConnectionProfile {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    /// Empty strings are treated as "not set".
    pub fn credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn tls(mut self, verify: bool) -> Self {
        self.tls = true;
        self.verify_tls = verify;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::validation("port must be between 1 and 65535"));
        }
        if self.timeout.is_zero() {
            return Err(Error::validation("timeout must be greater than zero"));
        }
        Ok(())
    }

    /// `host:port/db`, for logs and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }
}

// Hand-written so passwords never end up in logs.
impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}
