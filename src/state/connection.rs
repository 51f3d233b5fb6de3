//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::auth::auth_method_name;
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion,
    parse_ready_for_query,
};
use crate::protocol::frontend::{
    md5_password, write_password, write_sasl_initial_response, write_sasl_response, write_startup,
};
use crate::protocol::tag::MessageTag;
use crate::protocol::types::TransactionStatus;
use crate::scram::{ClientFinalSent, ClientFirst, ScramError};

use super::action::{Action, AsyncMessage};
use super::{StateMachine, async_message, unexpected};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingAuth,
    WaitingSaslContinue,
    WaitingSaslFinal,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// SCRAM exchange in progress.
#[derive(Debug)]
enum Sasl {
    ServerFirst(ClientFirst),
    ServerFinal(ClientFinalSent),
}

/// Connection startup state machine.
///
/// Sends the startup packet, answers the server's authentication requests,
/// then collects BackendKeyData and ParameterStatus until ReadyForQuery.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    sasl: Option<Sasl>,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
}

fn require_password(options: &Opts) -> Result<&str> {
    options
        .password
        .as_deref()
        .ok_or_else(|| Error::Auth("Password required but not provided".into()))
}

fn sasl_text(data: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(data)
        .map_err(|e| ScramError::Parse(format!("SASL payload is not UTF-8: {e}")).into())
}

impl ConnectionStateMachine {
    /// Create a new connection state machine.
    pub fn new(options: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            sasl: None,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get server parameters reported so far.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Queue the startup message.
    pub fn start(&mut self, buffer_set: &mut BufferSet) -> Action {
        self.write_startup_message(&mut buffer_set.write_buffer);
        self.state = ConnectionState::WaitingAuth;
        Action::WriteAndReadMessage
    }

    fn write_startup_message(&self, buf: &mut Vec<u8>) {
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.options.user),
            ("client_encoding", "UTF8"),
        ];

        if let Some(ref db) = self.options.database {
            params.push(("database", db));
        }

        if let Some(ref app) = self.options.application_name {
            params.push(("application_name", app));
        }

        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        write_startup(buf, &params);
    }

    fn set_param(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.server_params.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.server_params.push((name.to_string(), value.to_string()));
        }
    }

    fn step_inner(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let BufferSet {
            read_buffer,
            write_buffer,
            tag,
        } = buffer_set;
        let tag = (*tag).ok_or_else(|| Error::Protocol("no message has been read".into()))?;
        let payload = read_buffer.as_slice();

        if tag.is_async() {
            let msg = async_message(crate::protocol::RawMessage::new(tag, payload))?;
            if let AsyncMessage::ParameterChanged { name, value } = &msg {
                self.set_param(name, value);
            }
            return Ok(Action::HandleAsyncMessageAndReadMessage(msg));
        }

        match tag {
            MessageTag::ErrorResponse => {
                return Err(ErrorResponse::parse(payload)?.into_error());
            }
            MessageTag::NegotiateProtocolVersion => {
                let negotiate = NegotiateProtocolVersion::parse(payload)?;
                tracing::warn!(
                    newest_minor_version = negotiate.newest_minor_version,
                    unrecognized = ?negotiate.unrecognized_options,
                    "server negotiated protocol version"
                );
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        match self.state {
            ConnectionState::WaitingAuth
            | ConnectionState::WaitingSaslContinue
            | ConnectionState::WaitingSaslFinal
            | ConnectionState::WaitingAuthResult => {
                if tag != MessageTag::Authentication {
                    return Err(unexpected(tag, self.state));
                }
                let auth = AuthenticationMessage::parse(payload)?;
                self.handle_auth(auth, write_buffer)
            }
            ConnectionState::WaitingReady => self.handle_ready(tag, payload),
            state => Err(unexpected(tag, state)),
        }
    }

    fn handle_auth(&mut self, auth: AuthenticationMessage<'_>, buf: &mut Vec<u8>) -> Result<Action> {
        match (self.state, auth) {
            (
                ConnectionState::WaitingAuth | ConnectionState::WaitingAuthResult,
                AuthenticationMessage::Ok,
            ) => {
                tracing::debug!("authenticated");
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            (ConnectionState::WaitingAuth, AuthenticationMessage::CleartextPassword) => {
                tracing::debug!(method = "cleartext", "server requested authentication");
                let password = require_password(&self.options)?;
                write_password(buf, password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::WaitingAuth, AuthenticationMessage::Md5Password { salt }) => {
                tracing::debug!(method = "md5", "server requested authentication");
                let password = require_password(&self.options)?;
                let hashed = md5_password(&self.options.user, password, &salt);
                write_password(buf, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::WaitingAuth, AuthenticationMessage::Sasl { mechanisms }) => {
                tracing::debug!(method = "sasl", ?mechanisms, "server requested authentication");
                require_password(&self.options)?;
                // The server takes the user name from the startup packet.
                let session = self.options.scram_factory().start(&mechanisms, "")?;
                let mechanism = session.mechanism();
                let first = session.client_first(None)?;
                write_sasl_initial_response(buf, mechanism.name(), Some(first.message().as_bytes()));
                self.sasl = Some(Sasl::ServerFirst(first));
                self.state = ConnectionState::WaitingSaslContinue;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::WaitingSaslContinue, AuthenticationMessage::SaslContinue { data }) => {
                let Some(Sasl::ServerFirst(first)) = self.sasl.take() else {
                    return Err(Error::Protocol("SASL exchange was not started".into()));
                };
                let binding_data = self
                    .options
                    .channel_binding
                    .as_ref()
                    .map(|cb| cb.data.as_slice());
                let server_first = first.receive_server_first(sasl_text(data)?, binding_data)?;
                let password = require_password(&self.options)?;
                let (message, sent) = server_first.with_password(password)?.client_final_message();
                write_sasl_response(buf, message.as_bytes());
                self.sasl = Some(Sasl::ServerFinal(sent));
                self.state = ConnectionState::WaitingSaslFinal;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::WaitingSaslFinal, AuthenticationMessage::SaslFinal { data }) => {
                let Some(Sasl::ServerFinal(sent)) = self.sasl.take() else {
                    return Err(Error::Protocol("SASL exchange was not started".into()));
                };
                sent.receive_server_final(sasl_text(data)?)?;
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            (_, AuthenticationMessage::Unsupported { code }) => Err(Error::Unsupported(format!(
                "{} authentication (code {code})",
                auth_method_name(code)
            ))),
            (state, auth) => Err(Error::Protocol(format!(
                "unexpected authentication message {auth:?} while {state:?}"
            ))),
        }
    }

    fn handle_ready(&mut self, tag: MessageTag, payload: &[u8]) -> Result<Action> {
        match tag {
            MessageTag::BackendKeyData => {
                self.backend_key = Some(*BackendKeyData::parse(payload)?);
                Ok(Action::ReadMessage)
            }
            MessageTag::ReadyForQuery => {
                self.transaction_status = parse_ready_for_query(payload)?;
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            _ => Err(unexpected(tag, self.state)),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let result = self.step_inner(buffer_set);
        if result.is_err() {
            self.state = ConnectionState::Failed;
            self.sasl = None;
        }
        result
    }

    fn is_complete(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}
