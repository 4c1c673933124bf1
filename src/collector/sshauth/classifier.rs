//! Classification of raw auth log lines into SSH events.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref ACCEPT_RE: Regex = Regex::new(
        r"sshd\[(\d+)\]: Accepted (password|publickey) for ((?-u:\w)+) from ([^ ]+) port (\d+)"
    )
    .expect("accept pattern is valid");
    static ref SESSION_RE: Regex =
        Regex::new(r"sshd\[(\d+)\]: pam_unix\(sshd:session\): session (opened|closed)")
            .expect("session pattern is valid");
}

/// Authentication method reported on an accept line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    Password,
    Publickey,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Password => "password",
            AuthType::Publickey => "publickey",
        }
    }

    fn from_log(value: &str) -> Option<Self> {
        match value {
            "password" => Some(AuthType::Password),
            "publickey" => Some(AuthType::Publickey),
            _ => None,
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session phase reported by pam_unix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Opened,
    Closed,
}

/// A successful authentication for an sshd process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAcceptEvent {
    pub process_id: String,
    pub auth_type: AuthType,
    pub username: String,
    pub remote_address: String,
    pub remote_port: String,
}

/// A pam session transition for an sshd process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub process_id: String,
    pub phase: SessionPhase,
}

/// Result of classifying one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Accept(AuthAcceptEvent),
    Session(SessionEvent),
    Unrecognized,
}

/// Classify a raw log line.
///
/// The accept shape is tried before the session shape. Anything that does not
/// match either shape exactly is `Unrecognized`.
pub fn classify(line: &str) -> LineEvent {
    if let Some(event) = parse_accept(line) {
        return LineEvent::Accept(event);
    }
    if let Some(event) = parse_session(line) {
        return LineEvent::Session(event);
    }
    LineEvent::Unrecognized
}

fn parse_accept(line: &str) -> Option<AuthAcceptEvent> {
    let caps = ACCEPT_RE.captures(line)?;
    Some(AuthAcceptEvent {
        process_id: caps.get(1)?.as_str().to_string(),
        auth_type: AuthType::from_log(caps.get(2)?.as_str())?,
        username: caps.get(3)?.as_str().to_string(),
        remote_address: caps.get(4)?.as_str().to_string(),
        remote_port: caps.get(5)?.as_str().to_string(),
    })
}

fn parse_session(line: &str) -> Option<SessionEvent> {
    let caps = SESSION_RE.captures(line)?;
    let phase = match caps.get(2)?.as_str() {
        "opened" => SessionPhase::Opened,
        "closed" => SessionPhase::Closed,
        _ => return None,
    };
    Some(SessionEvent {
        process_id: caps.get(1)?.as_str().to_string(),
        phase,
    })
}
