//! Client side of the SCRAM SASL mechanisms (RFC 5802, RFC 7677).
//!
//! The handshake is a typed chain of steps, each consuming the previous one:
//!
//! ```text
//! ScramSession ── client_first() ──▶ ClientFirst
//!   ── receive_server_first() ──▶ ServerFirst
//!   ── with_password() / with_keys() ──▶ ClientFinal
//!   ── client_final_message() ──▶ ClientFinalSent
//!   ── receive_server_final() ──▶ ()
//! ```
//!
//! [`ScramSessionFactory`] picks the mechanism from the list the server
//! advertises in AuthenticationSASL.

mod factory;
mod mechanism;
mod message;
mod session;

pub use factory::ScramSessionFactory;
pub use mechanism::{ScramKeys, ScramMechanism};
pub use message::{
    ChannelBindingFlag, Gs2Header, ServerFinalMessage, ServerFirstMessage, from_sasl_name,
    to_sasl_name,
};
pub use session::{ClientFinal, ClientFinalSent, ClientFirst, ScramSession, ServerFirst};

use thiserror::Error;

/// Minimum iteration count accepted in a server-first-message.
pub const MIN_ITERATIONS: u32 = 4096;

/// Default client nonce length in bytes (before base64 encoding).
pub const DEFAULT_NONCE_LENGTH: usize = 24;

/// SCRAM handshake failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScramError {
    /// A SCRAM message was malformed.
    #[error("malformed SCRAM message: {0}")]
    Parse(String),

    /// The server nonce does not start with the client nonce.
    #[error("server nonce does not start with the client nonce")]
    NonceMismatch,

    /// The server signature did not verify.
    #[error("invalid server signature")]
    InvalidServerSignature,

    /// The server answered the client-final-message with `e=<error>`.
    #[error("server reported error: {0}")]
    ServerError(ServerErrorKind),

    /// None of the advertised mechanisms is supported.
    #[error("no supported SASL mechanism (server advertised {0:?})")]
    NoSupportedMechanism(Vec<String>),

    /// The mechanism requires channel binding but no binding data was supplied.
    #[error("channel binding data is required by the selected mechanism")]
    MissingChannelBindingData,

    /// Iteration count below [`MIN_ITERATIONS`].
    #[error("iteration count {0} is below the minimum of {MIN_ITERATIONS}")]
    InvalidIterationCount(u32),

    /// HMAC could not be keyed.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

/// Error values of a server-final-message (RFC 5802 section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    InvalidEncoding,
    ExtensionsNotSupported,
    InvalidProof,
    ChannelBindingsDontMatch,
    ServerDoesSupportChannelBinding,
    ChannelBindingNotSupported,
    UnsupportedChannelBindingType,
    UnknownUser,
    InvalidUsernameEncoding,
    NoResources,
    OtherError,
}

impl ServerErrorKind {
    /// Parse the `e=` attribute value.
    pub fn from_value(value: &str) -> Option<Self> {
        Some(match value {
            "invalid-encoding" => Self::InvalidEncoding,
            "extensions-not-supported" => Self::ExtensionsNotSupported,
            "invalid-proof" => Self::InvalidProof,
            "channel-bindings-dont-match" => Self::ChannelBindingsDontMatch,
            "server-does-support-channel-binding" => Self::ServerDoesSupportChannelBinding,
            "channel-binding-not-supported" => Self::ChannelBindingNotSupported,
            "unsupported-channel-binding-type" => Self::UnsupportedChannelBindingType,
            "unknown-user" => Self::UnknownUser,
            "invalid-username-encoding" => Self::InvalidUsernameEncoding,
            "no-resources" => Self::NoResources,
            "other-error" => Self::OtherError,
            _ => return None,
        })
    }

    /// Wire value of the `e=` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidEncoding => "invalid-encoding",
            Self::ExtensionsNotSupported => "extensions-not-supported",
            Self::InvalidProof => "invalid-proof",
            Self::ChannelBindingsDontMatch => "channel-bindings-dont-match",
            Self::ServerDoesSupportChannelBinding => "server-does-support-channel-binding",
            Self::ChannelBindingNotSupported => "channel-binding-not-supported",
            Self::UnsupportedChannelBindingType => "unsupported-channel-binding-type",
            Self::UnknownUser => "unknown-user",
            Self::InvalidUsernameEncoding => "invalid-username-encoding",
            Self::NoResources => "no-resources",
            Self::OtherError => "other-error",
        }
    }
}

impl std::fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_values_round_trip() {
        for value in [
            "invalid-encoding",
            "extensions-not-supported",
            "invalid-proof",
            "channel-bindings-dont-match",
            "server-does-support-channel-binding",
            "channel-binding-not-supported",
            "unsupported-channel-binding-type",
            "unknown-user",
            "invalid-username-encoding",
            "no-resources",
            "other-error",
        ] {
            let kind = ServerErrorKind::from_value(value).unwrap();
            assert_eq!(kind.as_str(), value);
        }
        assert_eq!(ServerErrorKind::from_value("bogus"), None);
    }
}
