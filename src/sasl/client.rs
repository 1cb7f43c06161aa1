use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, ErrorKind, Result};

use super::{cookie, Command, IdentityResolver, Mechanism};

/// The trace token sent for ANONYMOUS authentication.
const ANONYMOUS_TRACE: &[u8] = b"steadybus";

/// Client-side SASL state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing sent yet.
    Idle,
    /// A bare `AUTH` probe was sent; waiting for the server's mechanism
    /// list in its `REJECTED` reply.
    AwaitingServerMechs,
    /// An `AUTH <mech>` was sent for a mechanism that exchanges `DATA`.
    Negotiating,
    /// An `AUTH <mech>` or final `DATA` was sent; waiting for `OK`.
    AwaitingOk,
    /// `BEGIN` has been sent; the transport switches to binary frames.
    Authenticated,
    /// Authentication failed; the connection must be torn down.
    Failed,
}

/// What a completed [`SaslClient::advance`] step means for the caller.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SaslOutcome {
    /// Keep feeding lines.
    Continue,
    /// `BEGIN` has been written; the server GUID is recorded and the
    /// handshake stages remove themselves from the inbound path.
    Authenticated,
}

/// The client half of the SASL handshake, as a pure state machine.
///
/// Transport bytes go in through [`advance`]; bytes to be written come out
/// through the `out` buffer. The caller owns the socket.
///
/// [`advance`]: SaslClient::advance
pub(crate) struct SaslClient {
    state: State,
    /// Remaining mechanisms to attempt, highest preference first.
    mechanisms: VecDeque<Mechanism>,
    /// The mechanism currently being attempted.
    current: Option<Mechanism>,
    identity: Arc<dyn IdentityResolver>,
    keyring_override: Option<PathBuf>,
    guid: Option<String>,
}

impl SaslClient {
    pub(crate) fn new(
        mechanisms: impl IntoIterator<Item = Mechanism>,
        identity: Arc<dyn IdentityResolver>,
        keyring_override: Option<PathBuf>,
    ) -> Result<Self> {
        let mechanisms: VecDeque<Mechanism> = mechanisms.into_iter().collect();

        if mechanisms.is_empty() {
            return Err(Error::new(ErrorKind::InvalidConfiguration(
                "at least one SASL mechanism must be configured".into(),
            )));
        }

        Ok(Self {
            state: State::Idle,
            mechanisms,
            current: None,
            identity,
            keyring_override,
            guid: None,
        })
    }

    /// The GUID the server sent in its `OK` reply.
    pub(crate) fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Produce the opening bytes: the mandatory NUL byte followed by the
    /// first `AUTH` line.
    ///
    /// When the preferred mechanism has an initial response available it is
    /// attempted directly; otherwise a bare `AUTH` asks the server to list
    /// its mechanisms.
    pub(crate) fn initial(&mut self, out: &mut Vec<u8>) -> Result<()> {
        debug_assert_eq!(self.state, State::Idle);

        out.push(0);

        let Some(mechanism) = self.front_mechanism() else {
            return Err(Error::new(ErrorKind::MechanismsExhausted));
        };

        match self.send_auth(mechanism, out) {
            Ok(()) => Ok(()),
            Err(error) if matches!(error.kind(), ErrorKind::IdentityUnavailable) => {
                // No initial response available; ask the server to list its
                // mechanisms instead and pick from the REJECTED reply.
                trace!("no initial response available, probing server mechanisms");
                out.extend_from_slice(&Command::Auth(None, None).to_line());
                self.state = State::AwaitingServerMechs;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Feed one server line (CRLF stripped) into the state machine.
    pub(crate) fn advance(&mut self, line: &[u8], out: &mut Vec<u8>) -> Result<SaslOutcome> {
        let command = Command::parse(line)?;
        trace!(state = ?self.state, command = ?command, "sasl");

        match (self.state, command) {
            (State::AwaitingServerMechs, Command::Rejected(server)) => {
                self.retain_server_mechanisms(&server);
                self.next_mechanism(out)?;
                Ok(SaslOutcome::Continue)
            }
            (State::Negotiating | State::AwaitingOk, Command::Rejected(server)) => {
                trace!("server rejected {:?}", self.current);
                self.retain_server_mechanisms(&server);
                self.next_mechanism(out)?;
                Ok(SaslOutcome::Continue)
            }
            (State::Negotiating, Command::Data(payload)) => {
                let response = match self.current {
                    Some(Mechanism::Cookie) => {
                        cookie::respond(&payload, self.keyring_override.as_deref())?
                    }
                    _ => {
                        return Err(Error::new(ErrorKind::UnexpectedSaslCommand("DATA".into())));
                    }
                };

                out.extend_from_slice(&Command::Data(response).to_line());
                self.state = State::AwaitingOk;
                Ok(SaslOutcome::Continue)
            }
            (State::Negotiating | State::AwaitingOk, Command::Ok(guid)) => {
                trace!(guid = %guid, "authenticated");
                self.guid = Some(guid);
                out.extend_from_slice(&Command::Begin.to_line());
                self.state = State::Authenticated;
                Ok(SaslOutcome::Authenticated)
            }
            (
                State::AwaitingServerMechs | State::Negotiating | State::AwaitingOk,
                Command::Error(message),
            ) => {
                // An ERROR is handled like a rejection of the current
                // mechanism, after telling the server to cancel it.
                trace!(message = %message, "server error");
                out.extend_from_slice(&Command::Cancel.to_line());
                self.next_mechanism(out)?;
                Ok(SaslOutcome::Continue)
            }
            (_, Command::AgreeUnixFd) => {
                // We never send NEGOTIATE_UNIX_FD; tolerate the line.
                Ok(SaslOutcome::Continue)
            }
            (_, command) => {
                self.state = State::Failed;
                Err(Error::new(ErrorKind::UnexpectedSaslCommand(
                    format!("{command:?}").into(),
                )))
            }
        }
    }

    /// Drop queued mechanisms the server does not announce.
    fn retain_server_mechanisms(&mut self, server: &[Mechanism]) {
        self.mechanisms
            .retain(|mechanism| server.contains(mechanism));
    }

    fn front_mechanism(&mut self) -> Option<Mechanism> {
        self.mechanisms.pop_front()
    }

    fn next_mechanism(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let Some(mechanism) = self.front_mechanism() else {
            self.state = State::Failed;
            return Err(Error::new(ErrorKind::MechanismsExhausted));
        };

        self.send_auth(mechanism, out)
    }

    fn send_auth(&mut self, mechanism: Mechanism, out: &mut Vec<u8>) -> Result<()> {
        let response = match mechanism {
            Mechanism::External => self.identity.resolve_authorization_identity()?.into_bytes(),
            // The cookie lives in the user's keyring, so the server is told
            // the user name, not the process UID.
            Mechanism::Cookie => self.identity.resolve_user_name()?.into_bytes(),
            Mechanism::Anonymous => ANONYMOUS_TRACE.to_vec(),
        };

        trace!(mechanism = %mechanism, "attempting");
        out.extend_from_slice(&Command::Auth(Some(mechanism), Some(response)).to_line());
        self.current = Some(mechanism);

        self.state = match mechanism {
            // The cookie mechanism expects a DATA challenge before OK.
            Mechanism::Cookie => State::Negotiating,
            _ => State::AwaitingOk,
        };

        Ok(())
    }
}
