//! SASL authentication, which precedes the binary D-Bus protocol.
//!
//! The handshake runs in ASCII lines terminated by CRLF over the same
//! transport. See
//! <https://dbus.freedesktop.org/doc/dbus-specification.html#auth-protocol>.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

pub use self::identity::{IdentityResolver, StaticIdentity, UidIdentity};
mod identity;

pub(crate) use self::client::{SaslClient, SaslOutcome};
mod client;

mod cookie;

#[cfg(test)]
mod tests;

/// Authentication mechanisms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mechanism {
    /// The recommended mechanism on platforms where credentials can be
    /// transferred out-of-band, in particular Unix domain sockets.
    External,
    /// Establishes that the client can read a private file owned by the
    /// user being authenticated. The usual choice over TCP.
    Cookie,
    /// No authentication at all. Message buses should not accept it, but it
    /// can be useful for non-message-bus uses of D-Bus.
    Anonymous,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mechanism::External => "EXTERNAL",
            Mechanism::Cookie => "DBUS_COOKIE_SHA1",
            Mechanism::Anonymous => "ANONYMOUS",
        };

        write!(f, "{name}")
    }
}

impl FromStr for Mechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EXTERNAL" => Ok(Mechanism::External),
            "DBUS_COOKIE_SHA1" => Ok(Mechanism::Cookie),
            "ANONYMOUS" => Ok(Mechanism::Anonymous),
            _ => Err(Error::new(ErrorKind::UnknownMechanism(s.into()))),
        }
    }
}

/// The commands exchanged during the handshake, parsed from and rendered to
/// CRLF-terminated ASCII lines.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Auth(Option<Mechanism>, Option<Vec<u8>>),
    Cancel,
    Begin,
    Data(Vec<u8>),
    Error(String),
    Rejected(Vec<Mechanism>),
    Ok(String),
    AgreeUnixFd,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Auth(mechanism, response) => match (mechanism, response) {
                (Some(mechanism), Some(response)) => {
                    write!(f, "AUTH {mechanism} {}", hex::encode(response))
                }
                (Some(mechanism), None) => write!(f, "AUTH {mechanism}"),
                _ => write!(f, "AUTH"),
            },
            Command::Cancel => write!(f, "CANCEL"),
            Command::Begin => write!(f, "BEGIN"),
            Command::Data(data) => write!(f, "DATA {}", hex::encode(data)),
            Command::Error(explanation) => write!(f, "ERROR {explanation}"),
            Command::Rejected(mechanisms) => {
                write!(f, "REJECTED")?;

                for mechanism in mechanisms {
                    write!(f, " {mechanism}")?;
                }

                Ok(())
            }
            Command::Ok(guid) => write!(f, "OK {guid}"),
            Command::AgreeUnixFd => write!(f, "AGREE_UNIX_FD"),
        }
    }
}

impl Command {
    /// Render the command as a CRLF-terminated line.
    pub(crate) fn to_line(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }

    /// Parse a command from a line with the CRLF already stripped.
    pub(crate) fn parse(line: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(line).map_err(|_| Error::new(ErrorKind::InvalidSaslLine))?;
        let mut words = line.split_ascii_whitespace();

        let command = match words.next() {
            Some("AUTH") => {
                let mechanism = match words.next() {
                    Some(word) => Some(word.parse()?),
                    None => None,
                };
                let response = match words.next() {
                    Some(word) => Some(decode_hex(word)?),
                    None => None,
                };
                Command::Auth(mechanism, response)
            }
            Some("CANCEL") => Command::Cancel,
            Some("BEGIN") => Command::Begin,
            Some("DATA") => {
                let data = match words.next() {
                    Some(word) => decode_hex(word)?,
                    None => Vec::new(),
                };
                Command::Data(data)
            }
            Some("ERROR") => {
                let explanation = line.strip_prefix("ERROR").unwrap_or("").trim();
                Command::Error(explanation.into())
            }
            Some("REJECTED") => {
                // Mechanisms we don't implement are skipped rather than
                // rejected, so a server offering extras still negotiates.
                let mechanisms = words.filter_map(|word| word.parse().ok()).collect();
                Command::Rejected(mechanisms)
            }
            Some("OK") => {
                let guid = words
                    .next()
                    .ok_or_else(|| Error::new(ErrorKind::InvalidSaslLine))?;
                Command::Ok(guid.into())
            }
            Some("AGREE_UNIX_FD") => Command::AgreeUnixFd,
            _ => return Err(Error::new(ErrorKind::InvalidSaslLine)),
        };

        Ok(command)
    }
}

fn decode_hex(word: &str) -> Result<Vec<u8>> {
    hex::decode(word).map_err(|_| Error::new(ErrorKind::InvalidSaslLine))
}

/// Accumulates transport bytes and splits off CRLF-terminated lines.
///
/// Bytes following the final handshake line are the first bytes of the
/// binary protocol and are handed back through [`take_remainder`].
///
/// [`take_remainder`]: LineBuffer::take_remainder
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Split off the next complete line, without its CRLF terminator.
    pub(crate) fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(n) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        if n == 0 || self.buf[n - 1] != b'\r' {
            return Err(Error::new(ErrorKind::InvalidSaslLine));
        }

        let mut line: Vec<u8> = self.buf.drain(..=n).collect();
        line.truncate(n - 1);
        Ok(Some(line))
    }

    /// Take whatever bytes trail the last consumed line.
    pub(crate) fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
