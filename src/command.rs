//! Raw command execution.

use serde::Serialize;
use tracing::debug;

use crate::connection::{cmd, Connection};
use crate::error::{Error, Result};
use crate::reply::Reply;

/// `{ "command": ..., "args": [...], "result": ... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutput {
    pub command: String,
    pub args: Vec<String>,
    pub result: Reply,
}

impl Connection {
    /// Send `name args...` verbatim and return the normalized reply.
    ///
    /// No command-specific checks are made; store errors come back as
    /// `Error::Command` with the store's message.
    pub fn execute<S: AsRef<str>>(&mut self, name: &str, args: &[S]) -> Result<CommandOutput> {
        if name.trim().is_empty() {
            return Err(Error::validation("command cannot be empty"));
        }
        let mut request = cmd(name);
        for arg in args {
            request = request.arg(arg.as_ref());
        }
        debug!("Executing {} with {} argument(s)", request.name(), args.len());
        let result = self.query(request)?;
        Ok(CommandOutput {
            command: name.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            result,
        })
    }

    /// Tokenize a console line with shell quoting rules and execute it.
    pub fn execute_line(&mut self, line: &str) -> Result<CommandOutput> {
        let parts = split_command_line(line)?;
        self.execute(&parts[0], &parts[1..])
    }
}

/// Split a console line into command and arguments. Never returns an empty
/// vector.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let parts = shlex::split(line)
        .ok_or_else(|| Error::validation("unbalanced quotes in command line"))?;
    if parts.is_empty() {
        return Err(Error::validation("command cannot be empty"));
    }
    Ok(parts)
}
