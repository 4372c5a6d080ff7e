use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use redscope::{ConnectionFactory, ConnectionProfile, Kind, DEFAULT_MAX_ITEMS};

#[derive(Parser)]
#[command(name = "redscope")]
#[command(about = "Inspect keys and values on a Redis-compatible server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6379")]
    port: u16,

    /// Database index
    #[arg(short = 'n', long, default_value = "0")]
    db: u32,

    /// ACL username
    #[arg(long)]
    username: Option<String>,

    /// Password (or ACL password with --username)
    #[arg(long)]
    password: Option<String>,

    /// Connect with TLS
    #[arg(long)]
    tls: bool,

    /// Skip certificate and hostname verification (implies --tls)
    #[arg(long)]
    insecure: bool,

    /// Socket timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the server answers
    Ping,
    /// Server INFO fields
    Info,
    /// Number of keys in the database
    Dbsize,
    /// One page of keys matching a pattern
    Scan {
        #[arg(default_value = "*")]
        pattern: String,
        /// Only keys of this type (string, hash, list, set, zset, stream, all)
        #[arg(long = "type")]
        type_filter: Option<String>,
        #[arg(long, default_value = "100")]
        count: usize,
        /// Cursor returned by the previous page
        #[arg(long, default_value = "0")]
        cursor: u64,
    },
    /// Read a key
    Get {
        key: String,
        #[arg(long, default_value_t = DEFAULT_MAX_ITEMS)]
        max_items: usize,
    },
    /// Write a key from text (JSON for container types)
    Set {
        key: String,
        value: String,
        #[arg(long = "type", default_value = "string")]
        kind: String,
    },
    /// Delete a key
    Del { key: String },
    /// Seconds until a key expires (-1 no expiry, -2 missing)
    Ttl { key: String },
    /// Set a key's time to live
    Expire {
        key: String,
        #[arg(allow_hyphen_values = true)]
        seconds: String,
    },
    /// Native type of a key
    Type { key: String },
    /// Run a raw command line, e.g. "CONFIG GET maxmemory"
    Exec { line: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let timeout = parse_timeout(args.timeout)?;

    let mut profile = ConnectionProfile::new(args.host, args.port)
        .db(args.db)
        .credentials(args.username, args.password)
        .timeout(timeout);
    if args.tls || args.insecure {
        profile = profile.tls(!args.insecure);
    }

    let mut conn = ConnectionFactory::new()
        .connect(&profile)
        .with_context(|| format!("Failed to connect to {}", profile.endpoint()))?;

    match args.command {
        Command::Ping => print(&conn.ping()?),
        Command::Info => print(&conn.info()?),
        Command::Dbsize => print(&conn.dbsize()?),
        Command::Scan {
            pattern,
            type_filter,
            count,
            cursor,
        } => {
            let kind = match type_filter.as_deref() {
                None => None,
                Some(name) if name.eq_ignore_ascii_case("all") => None,
                Some(name) => Some(name.parse::<Kind>()?),
            };
            print(&conn.scan_page(&pattern, kind.as_ref(), count, cursor)?)
        }
        Command::Get { key, max_items } => print(&conn.decode_for_display(&key, max_items)?),
        Command::Set { key, value, kind } => print(&conn.encode_for_store(&key, &value, &kind)?),
        Command::Del { key } => print(&conn.delete(&key)?),
        Command::Ttl { key } => print(&conn.ttl(&key)?),
        Command::Expire { key, seconds } => print(&conn.expire_from_text(&key, &seconds)?),
        Command::Type { key } => print(&conn.key_type(&key)?),
        Command::Exec { line } => print(&conn.execute_line(&line)?),
    }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Seconds from the command line. Rejects zero, negative, NaN and values
/// too large for a `Duration`.
fn parse_timeout(seconds: f64) -> anyhow::Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => anyhow::bail!("Invalid timeout: {}. Use a positive number of seconds", seconds),
    }
}
