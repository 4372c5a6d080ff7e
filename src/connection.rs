//! Connection factory and capability negotiation.
//!
//! A [`Connector`] describes what its transport can accept through
//! [`TransportCapabilities`]. The factory walks an ordered list of
//! [`ParamSet`] variants, richest first, skips the ones the descriptor rules
//! out and opens the first one that remains. The resulting [`Connection`]
//! keeps a [`Capabilities`] record of what was negotiated.

use redis::{IntoConnectionInfo, RedisResult, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::profile::ConnectionProfile;
use crate::reply::Reply;

/// How TLS is brought up on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS selected by a flag on the regular connection.
    Negotiated,
    /// Dedicated TLS connection type of older transports.
    Legacy,
}

/// Explicit TLS context object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsContext {
    pub verify_hostname: bool,
    pub verify_certificate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertRequirement {
    Required,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsParams {
    pub mode: TlsMode,
    pub context: Option<TlsContext>,
    pub cert_requirement: Option<CertRequirement>,
}

impl TlsParams {
    /// Whether the peer gets verified. Without a context or a requirement
    /// flag the transport default applies, which is to verify.
    pub fn verifies_peer(&self) -> bool {
        match (self.context, self.cert_requirement) {
            (Some(ctx), _) => ctx.verify_certificate || ctx.verify_hostname,
            (None, Some(req)) => req == CertRequirement::Required,
            (None, None) => true,
        }
    }
}

/// One candidate set of connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSet {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsParams>,
}

impl ParamSet {
    /// Richest parameter set the profile asks for.
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        let tls = profile.tls.then(|| {
            let verify = profile.verify_tls;
            TlsParams {
                mode: TlsMode::Negotiated,
                context: Some(TlsContext {
                    verify_hostname: verify,
                    verify_certificate: verify,
                }),
                cert_requirement: Some(if verify {
                    CertRequirement::Required
                } else {
                    CertRequirement::Disabled
                }),
            }
        });
        Self {
            host: profile.host.clone(),
            port: profile.port,
            db: i64::from(profile.db),
            timeout: profile.timeout,
            username: profile.username.clone(),
            password: profile.password.clone(),
            tls,
        }
    }

    /// Short description for logs. Never includes secrets.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.username.is_some() {
            parts.push("username");
        }
        if let Some(tls) = &self.tls {
            parts.push(match tls.mode {
                TlsMode::Negotiated => "tls",
                TlsMode::Legacy => "legacy-tls",
            });
            if tls.context.is_some() {
                parts.push("tls-context");
            }
            if tls.cert_requirement.is_some() {
                parts.push("cert-reqs");
            }
        }
        if parts.is_empty() {
            "plain".to_string()
        } else {
            parts.join("+")
        }
    }
}

/// Parameter-set variants to try for a profile, in decreasing richness.
///
/// Optional parameters are dropped in priority order: username first, then
/// the TLS context object, then the certificate requirement flag, covering
/// every combination. For TLS profiles the sequence is repeated with the
/// legacy TLS mode. A TLS profile never falls back to plaintext, and an
/// unverified profile never gets a variant that cannot say "do not verify".
pub fn param_variants(profile: &ConnectionProfile) -> Vec<ParamSet> {
    let full = ParamSet::from_profile(profile);
    let modes: &[Option<TlsMode>] = if profile.tls {
        &[Some(TlsMode::Negotiated), Some(TlsMode::Legacy)]
    } else {
        &[None]
    };

    let mut variants: Vec<ParamSet> = Vec::new();
    for mode in modes {
        for dropped in 0u8..8 {
            let mut params = full.clone();
            if dropped & 0b001 != 0 {
                params.username = None;
            }
            if let (Some(tls), Some(mode)) = (params.tls.as_mut(), mode) {
                tls.mode = *mode;
                if dropped & 0b010 != 0 {
                    tls.context = None;
                }
                if dropped & 0b100 != 0 {
                    tls.cert_requirement = None;
                }
                if !profile.verify_tls && tls.verifies_peer() {
                    continue;
                }
            }
            if !variants.contains(&params) {
                variants.push(params);
            }
        }
    }
    variants
}

/// A parameter a transport may or may not accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Username,
    Tls,
    TlsContext,
    CertRequirement,
    LegacyTls,
}

impl Capability {
    pub fn describe(&self) -> &'static str {
        match self {
            Capability::Username => "username authentication (ACL)",
            Capability::Tls => "TLS negotiation",
            Capability::TlsContext => "explicit TLS context objects",
            Capability::CertRequirement => "certificate requirement flags",
            Capability::LegacyTls => "a dedicated TLS connection class",
        }
    }
}

/// Static description of what a connector's transport accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    pub username: bool,
    pub tls: bool,
    pub tls_context: bool,
    pub cert_requirement: bool,
    pub legacy_tls: bool,
}

impl TransportCapabilities {
    /// Everything supported.
    pub fn full() -> Self {
        Self {
            username: true,
            tls: true,
            tls_context: true,
            cert_requirement: true,
            legacy_tls: true,
        }
    }

    /// First capability `params` needs that the transport lacks.
    pub fn missing_for(&self, params: &ParamSet) -> Option<Capability> {
        if let Some(tls) = &params.tls {
            match tls.mode {
                TlsMode::Negotiated if !self.tls => return Some(Capability::Tls),
                TlsMode::Legacy if !self.legacy_tls => return Some(Capability::LegacyTls),
                _ => {}
            }
            if tls.context.is_some() && !self.tls_context {
                return Some(Capability::TlsContext);
            }
            if tls.cert_requirement.is_some() && !self.cert_requirement {
                return Some(Capability::CertRequirement);
            }
        }
        if params.username.is_some() && !self.username {
            return Some(Capability::Username);
        }
        None
    }
}

/// Request/response channel to the store. One command per call.
pub trait Transport: Send {
    /// `args[0]` is the command name.
    fn request(&mut self, args: &[Vec<u8>]) -> RedisResult<Value>;
}

#[derive(Debug)]
pub enum OpenError {
    /// The transport refused the parameter set itself.
    Unsupported(Capability),
    /// The parameter set was fine but connecting failed.
    Failed(redis::RedisError),
}

/// Builds transports from parameter sets.
pub trait Connector: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    fn open(&self, params: &ParamSet) -> std::result::Result<Box<dyn Transport>, OpenError>;
}

/// What was negotiated for a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Credentials were sent with a username (ACL auth).
    pub username_auth: bool,
    pub tls: Option<TlsMode>,
    pub tls_verified: bool,
    /// Whether `SCAN ... TYPE` works; `None` until the first filtered scan.
    pub scan_type_filter: Option<bool>,
}

impl Capabilities {
    fn from_params(params: &ParamSet) -> Self {
        Self {
            username_auth: params.username.is_some(),
            tls: params.tls.map(|t| t.mode),
            tls_verified: params.tls.map(|t| t.verifies_peer()).unwrap_or(false),
            scan_type_filter: None,
        }
    }
}

/// Command under construction, in the spirit of `redis::cmd`.
#[derive(Debug, Clone)]
pub struct Request {
    args: Vec<Vec<u8>>,
}

impl Request {
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_uppercase()
    }
}

pub fn cmd(name: &str) -> Request {
    Request {
        args: vec![name.as_bytes().to_vec()],
    }
}

/// Live connection to one `host:port/db`.
///
/// Not internally synchronized: every operation takes `&mut self`.
pub struct Connection {
    transport: Box<dyn Transport>,
    endpoint: String,
    capabilities: Capabilities,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, endpoint: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            capabilities,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub(crate) fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.capabilities
    }

    /// Send one request and normalize the reply.
    pub fn query(&mut self, request: Request) -> Result<Reply> {
        let value = self.transport.request(&request.args)?;
        Ok(Reply::from_value(value))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Connector backed by the `redis` crate's blocking client.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

impl RedisConnector {
    fn connection_info(params: &ParamSet) -> RedisResult<redis::ConnectionInfo> {
        let host = if params.host.contains(':') {
            format!("[{}]", params.host)
        } else {
            params.host.clone()
        };
        let url = match &params.tls {
            None => format!("redis://{}:{}", host, params.port),
            Some(tls) if tls.verifies_peer() => format!("rediss://{}:{}", host, params.port),
            // The insecure fragment turns off both hostname and certificate checks.
            Some(_) => format!("rediss://{}:{}/#insecure", host, params.port),
        };
        let mut info = url.as_str().into_connection_info()?;
        info.redis.db = params.db;
        info.redis.username = params.username.clone();
        info.redis.password = params.password.clone();
        Ok(info)
    }
}

impl Connector for RedisConnector {
    fn capabilities(&self) -> TransportCapabilities {
        let tls = cfg!(feature = "tls");
        TransportCapabilities {
            username: true,
            tls,
            tls_context: false,
            cert_requirement: tls,
            legacy_tls: false,
        }
    }

    fn open(&self, params: &ParamSet) -> std::result::Result<Box<dyn Transport>, OpenError> {
        let info = Self::connection_info(params).map_err(OpenError::Failed)?;
        let client = redis::Client::open(info).map_err(OpenError::Failed)?;
        let conn = client
            .get_connection_with_timeout(params.timeout)
            .map_err(OpenError::Failed)?;
        conn.set_read_timeout(Some(params.timeout))
            .map_err(OpenError::Failed)?;
        conn.set_write_timeout(Some(params.timeout))
            .map_err(OpenError::Failed)?;
        Ok(Box::new(RedisTransport { conn }))
    }
}

struct RedisTransport {
    conn: redis::Connection,
}

impl Transport for RedisTransport {
    fn request(&mut self, args: &[Vec<u8>]) -> RedisResult<Value> {
        let mut cmd = redis::Cmd::new();
        for arg in args {
            cmd.arg(arg.as_slice());
        }
        cmd.query(&mut self.conn)
    }
}

/// Turns profiles into live connections.
pub struct ConnectionFactory {
    connector: Box<dyn Connector>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory {
    pub fn new() -> Self {
        Self::with_connector(RedisConnector)
    }

    pub fn with_connector(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
        }
    }

    /// Open a connection for `profile` and check it answers `PING`.
    pub fn connect(&self, profile: &ConnectionProfile) -> Result<Connection> {
        profile.validate()?;
        let endpoint = profile.endpoint();
        let available = self.connector.capabilities();
        let mut missing = Vec::new();

        for params in param_variants(profile) {
            if let Some(capability) = available.missing_for(&params) {
                debug!(
                    "Skipping parameter set [{}] for {}: transport lacks {}",
                    params.describe(),
                    endpoint,
                    capability.describe()
                );
                missing.push(capability);
                continue;
            }

            debug!("Opening {} with parameter set [{}]", endpoint, params.describe());
            let transport = match self.connector.open(&params) {
                Ok(transport) => transport,
                Err(OpenError::Unsupported(capability)) => {
                    debug!(
                        "Transport rejected parameter set [{}]: {}",
                        params.describe(),
                        capability.describe()
                    );
                    missing.push(capability);
                    continue;
                }
                Err(OpenError::Failed(err)) => return Err(Error::while_connecting(err)),
            };

            let mut conn = Connection::new(transport, endpoint.clone(), Capabilities::from_params(&params));
            check_liveness(&mut conn)?;
            info!("Connected to {} [{}]", endpoint, params.describe());
            return Ok(conn);
        }

        Err(exhausted(&missing))
    }
}

fn check_liveness(conn: &mut Connection) -> Result<()> {
    match conn.query(cmd("PING")) {
        Ok(reply) => match reply.into_text()? {
            Some(pong) if pong.eq_ignore_ascii_case("PONG") => Ok(()),
            other => Err(Error::Connection(format!(
                "liveness check failed: unexpected PING reply {:?}",
                other
            ))),
        },
        // A store that never answers is a connection failure, not a slow command.
        Err(Error::Timeout(msg)) => Err(Error::Connection(format!(
            "liveness check failed: timed out: {}",
            msg
        ))),
        Err(err) => Err(Error::Connection(format!("liveness check failed: {}", err))),
    }
}

fn exhausted(missing: &[Capability]) -> Error {
    let capability = if missing.contains(&Capability::Tls) {
        Some(Capability::Tls)
    } else {
        missing.last().copied()
    };
    match capability {
        Some(Capability::Tls) => Error::Connection(
            "this transport version does not support TLS negotiation; upgrade required \
             (rebuild with the `tls` feature)"
                .to_string(),
        ),
        Some(capability) => Error::Connection(format!(
            "this transport version does not support {}; upgrade required",
            capability.describe()
        )),
        None => Error::Connection("no connection parameter set was accepted".to_string()),
    }
}
