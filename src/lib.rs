//! Redscope - data access layer for Redis-compatible servers
//!
//! Connects under plain or TLS profiles, turns every native value shape into
//! a uniform [`ValueRecord`], writes JSON-typed input back, walks the
//! keyspace page by page and runs raw commands.
//!
//! # Example
//!
//! ```no_run
//! use redscope::{ConnectionFactory, ConnectionProfile, Kind};
//!
//! # fn main() -> redscope::Result<()> {
//! let profile = ConnectionProfile::new("127.0.0.1", 6379);
//! let mut conn = ConnectionFactory::new().connect(&profile)?;
//!
//! conn.encode_for_store("h1", r#"{"a":1,"b":[1,2]}"#, "hash")?;
//! let record = conn.decode_for_display("h1", 200)?;
//! assert_eq!(record.kind, Kind::Hash);
//!
//! let page = conn.scan_page("user:*", None, 100, 0)?;
//! if page.next_cursor != 0 {
//!     // more keys to fetch from page.next_cursor
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod command;
pub mod connection;
pub mod error;
pub mod keys;
pub mod profile;
pub mod reply;
pub mod scan;
pub mod types;

pub use codec::DEFAULT_MAX_ITEMS;
pub use command::{split_command_line, CommandOutput};
pub use connection::{
    Capabilities, Capability, Connection, ConnectionFactory, Connector, OpenError, ParamSet,
    RedisConnector, Transport, TransportCapabilities,
};
pub use error::{Error, Result};
pub use profile::ConnectionProfile;
pub use reply::Reply;
pub use types::{Kind, Payload, ScanPage, ScoredMember, SetAck, StreamEntry, ValueRecord};
