//! text command parsing and the canonical response strings
//!
//! Replies are tallied byte-for-byte by the client-side quorum router, so
//! every honest replica must produce identical text for the same state.

use serde::{Deserialize, Serialize};

pub const NOT_FOUND: &str = "The key you entered does not exist!";
pub const INVALID_OP: &str = "Invalid operation. Try again.";
pub const BUSY: &str = "busy, retry.";
pub const ABORTED: &str = "Aborted.";
pub const WRITE_OK: &str = "write successful.";
pub const DELETE_OK: &str = "delete successful.";
pub const INTERNAL_ERROR: &str = "Something went wrong. Try again.";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `get <key>`: answer `{value}` or the not-found string.
    Get { key: String },
    /// `read <key>` / `download <key>`: answer the raw value.
    Read { key: String },
    /// `list`: answer the sorted key list, newline-joined.
    List,
    Write(Mutation),
}

/// The replicated side effect of a write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Put { key: String, value: String },
    Delete { key: String },
}

impl Mutation {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Mutation::Put { key, .. } => key,
            Mutation::Delete { key } => key,
        }
    }

    #[must_use]
    pub const fn applied_response(&self) -> &'static str {
        match self {
            Mutation::Put { .. } => WRITE_OK,
            Mutation::Delete { .. } => DELETE_OK,
        }
    }
}

impl Command {
    /// Parses a raw command line. `None` means an unusable command.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(3, char::is_whitespace);
        let verb = parts.next()?.to_ascii_lowercase();
        let key = parts.next();
        let rest = parts.next();

        match verb.as_str() {
            "get" => Some(Command::Get { key: key?.to_owned() }),
            "read" | "download" => Some(Command::Read { key: key?.to_owned() }),
            "list" => Some(Command::List),
            "put" | "upload" => {
                let key = key?.to_owned();
                let value = rest?.to_owned();
                Some(Command::Write(Mutation::Put { key, value }))
            }
            "delete" | "remove" => Some(Command::Write(Mutation::Delete { key: key?.to_owned() })),
            _ => None,
        }
    }
}
