//! Startup and session-level backend messages.

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthenticationMessage<'a> {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// SASL authentication required (with list of mechanisms)
    Sasl { mechanisms: Vec<&'a str> },
    /// SASL continue (with server-first-message)
    SaslContinue { data: &'a [u8] },
    /// SASL final (with server-final-message)
    SaslFinal { data: &'a [u8] },
    /// A method this crate does not implement (Kerberos, SCM, GSS, SSPI, or
    /// an unknown code)
    Unsupported { code: i32 },
}

impl<'a> AuthenticationMessage<'a> {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;

        Ok(match code {
            auth_type::OK => AuthenticationMessage::Ok,
            auth_type::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(salt);
                AuthenticationMessage::Md5Password { salt: buf }
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                loop {
                    let (mechanism, remaining) = read_cstr(data)?;
                    data = remaining;
                    if mechanism.is_empty() {
                        break;
                    }
                    mechanisms.push(mechanism);
                }
                AuthenticationMessage::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => AuthenticationMessage::SaslContinue { data: rest },
            auth_type::SASL_FINAL => AuthenticationMessage::SaslFinal { data: rest },
            code => AuthenticationMessage::Unsupported { code },
        })
    }
}

/// Human-readable name of an authentication code.
pub fn auth_method_name(code: i32) -> &'static str {
    match code {
        auth_type::KERBEROS_V5 => "Kerberos V5",
        auth_type::SCM_CREDENTIAL => "SCM credential",
        auth_type::GSS | auth_type::GSS_CONTINUE => "GSSAPI",
        auth_type::SSPI => "SSPI",
        _ => "unknown",
    }
}

/// BackendKeyData message - contains process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pid: U32BE,
    secret_key: U32BE,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))
    }

    /// Get the process ID.
    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    /// Get the secret key.
    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    /// Parameter name
    pub name: &'a str,
    /// Parameter value
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// Parse a ReadyForQuery payload. An unknown status byte is a protocol error.
pub fn parse_ready_for_query(payload: &[u8]) -> Result<TransactionStatus> {
    match payload {
        [status] => TransactionStatus::from_byte(*status).ok_or_else(|| {
            Error::Protocol(format!(
                "ReadyForQuery: invalid transaction status {:?}",
                *status as char
            ))
        }),
        _ => Err(Error::Protocol(format!(
            "ReadyForQuery: expected 1 byte, got {}",
            payload.len()
        ))),
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: &'a str,
    /// Notification payload
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload: payload_str,
        })
    }
}

/// NegotiateProtocolVersion message - server doesn't support requested protocol features.
#[derive(Debug, Clone)]
pub struct NegotiateProtocolVersion<'a> {
    /// Newest minor protocol version supported
    pub newest_minor_version: u32,
    /// Unrecognized protocol options
    pub unrecognized_options: Vec<&'a str>,
}

impl<'a> NegotiateProtocolVersion<'a> {
    /// Parse a NegotiateProtocolVersion message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (newest_minor_version, rest) = read_u32(payload)?;
        let (num_options, mut rest) = read_u32(rest)?;

        let mut unrecognized_options = Vec::new();
        for _ in 0..num_options {
            let (option, remaining) = read_cstr(rest)?;
            unrecognized_options.push(option);
            rest = remaining;
        }

        Ok(Self {
            newest_minor_version,
            unrecognized_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(code: i32, rest: &[u8]) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(rest);
        payload
    }

    #[test]
    fn parse_sasl_mechanisms() {
        let payload = auth(10, b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        assert_eq!(
            AuthenticationMessage::parse(&payload).unwrap(),
            AuthenticationMessage::Sasl {
                mechanisms: vec!["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]
            }
        );
        // missing list terminator
        assert!(AuthenticationMessage::parse(&auth(10, b"SCRAM-SHA-256\0")).is_err());
    }

    #[test]
    fn parse_md5_salt() {
        let payload = auth(5, &[1, 2, 3, 4]);
        assert_eq!(
            AuthenticationMessage::parse(&payload).unwrap(),
            AuthenticationMessage::Md5Password { salt: [1, 2, 3, 4] }
        );
        assert!(AuthenticationMessage::parse(&auth(5, &[1, 2])).is_err());
    }

    #[test]
    fn unsupported_codes() {
        for code in [2, 6, 7, 8, 9, 42] {
            assert_eq!(
                AuthenticationMessage::parse(&auth(code, b"")).unwrap(),
                AuthenticationMessage::Unsupported { code }
            );
        }
        assert_eq!(auth_method_name(7), "GSSAPI");
    }

    #[test]
    fn ready_for_query_is_strict() {
        assert_eq!(parse_ready_for_query(b"T").unwrap(), TransactionStatus::Active);
        assert!(parse_ready_for_query(b"Q").is_err());
        assert!(parse_ready_for_query(b"").is_err());
        assert!(parse_ready_for_query(b"II").is_err());
    }

    #[test]
    fn backend_key_data() {
        let mut payload = 1234u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        let key = BackendKeyData::parse(&payload).unwrap();
        assert_eq!(key.process_id(), 1234);
        assert_eq!(key.secret(), 0xDEAD_BEEF);
        assert!(BackendKeyData::parse(&payload[..6]).is_err());
    }

    #[test]
    fn notification() {
        let mut payload = 7u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"jobs\0{\"id\":1}\0");
        let n = NotificationResponse::parse(&payload).unwrap();
        assert_eq!(n.pid, 7);
        assert_eq!(n.channel, "jobs");
        assert_eq!(n.payload, "{\"id\":1}");
    }

    #[test]
    fn negotiate_protocol_version() {
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(b"_pq_.foo\0");
        let n = NegotiateProtocolVersion::parse(&payload).unwrap();
        assert_eq!(n.newest_minor_version, 0);
        assert_eq!(n.unrecognized_options, ["_pq_.foo"]);
    }
}
