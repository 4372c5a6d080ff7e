use redis::{ErrorKind, RedisError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connecting, authenticating, negotiating or the liveness check failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Caller-supplied input does not have the shape the operation needs.
    #[error("validation error: {0}")]
    Validation(String),

    /// The store rejected a well-formed request.
    #[error("command error: {0}")]
    Command(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Reply had a shape the operation did not expect.
    pub fn unexpected_reply(context: &str, reply: impl std::fmt::Debug) -> Self {
        Error::Command(format!("unexpected reply to {}: {:?}", context, reply))
    }

    /// True when the store refused the request because it does not know an
    /// option or argument, as opposed to a failure of the request itself.
    pub fn is_unsupported_option(&self) -> bool {
        match self {
            Error::Command(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("syntax error") || msg.contains("unknown option")
            }
            _ => false,
        }
    }

    /// Errors raised while a connection is being established are all
    /// connection errors, socket timeouts included.
    pub fn while_connecting(err: RedisError) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<RedisError> for Error {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
            || err.kind() == ErrorKind::AuthenticationFailed
        {
            Error::Connection(err.to_string())
        } else {
            Error::Command(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
