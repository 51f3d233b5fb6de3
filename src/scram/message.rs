//! SCRAM message formats: GS2 header, server-first and server-final.

use std::borrow::Cow;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{MIN_ITERATIONS, ScramError, ServerErrorKind};

/// GS2 channel binding flag (`gs2-cbind-flag`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBindingFlag {
    /// `n`: the client does not use channel binding.
    NotUsed,
    /// `y`: the client supports channel binding but thinks the server does not.
    ClientSupported,
    /// `p=<name>`: the client requires channel binding of the named type.
    Required(String),
}

/// GS2 header that prefixes the client-first-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gs2Header {
    /// Channel binding flag
    pub flag: ChannelBindingFlag,
    /// Authorization identity (unescaped)
    pub authzid: Option<String>,
}

impl Gs2Header {
    pub fn new(flag: ChannelBindingFlag, authzid: Option<String>) -> Self {
        Self { flag, authzid }
    }

    /// Append the header (including its trailing comma) to `out`.
    pub fn write_to(&self, out: &mut String) {
        match &self.flag {
            ChannelBindingFlag::NotUsed => out.push('n'),
            ChannelBindingFlag::ClientSupported => out.push('y'),
            ChannelBindingFlag::Required(name) => {
                out.push_str("p=");
                out.push_str(name);
            }
        }
        out.push(',');
        if let Some(authzid) = &self.authzid {
            out.push_str("a=");
            out.push_str(&to_sasl_name(authzid));
        }
        out.push(',');
    }

    /// Parse a GS2 header from the start of `text`, returning the rest.
    pub fn parse(text: &str) -> Result<(Self, &str), ScramError> {
        let (flag, rest) = text
            .split_once(',')
            .ok_or_else(|| ScramError::Parse("GS2 header: missing channel binding flag".into()))?;
        let flag = match flag {
            "n" => ChannelBindingFlag::NotUsed,
            "y" => ChannelBindingFlag::ClientSupported,
            _ => match flag.strip_prefix("p=") {
                Some(name) if !name.is_empty() => ChannelBindingFlag::Required(name.to_string()),
                _ => {
                    return Err(ScramError::Parse(format!(
                        "GS2 header: invalid channel binding flag {flag:?}"
                    )));
                }
            },
        };

        let (authzid, rest) = rest
            .split_once(',')
            .ok_or_else(|| ScramError::Parse("GS2 header: missing authzid".into()))?;
        let authzid = if authzid.is_empty() {
            None
        } else {
            let name = authzid
                .strip_prefix("a=")
                .ok_or_else(|| ScramError::Parse(format!("GS2 header: invalid authzid {authzid:?}")))?;
            Some(from_sasl_name(name)?.into_owned())
        };

        Ok((Self { flag, authzid }, rest))
    }
}

impl std::fmt::Display for Gs2Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out);
        f.write_str(&out)
    }
}

/// Escape `,` as `=2C` and `=` as `=3D`.
pub fn to_sasl_name(value: &str) -> Cow<'_, str> {
    if !value.contains([',', '=']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        match ch {
            ',' => out.push_str("=2C"),
            '=' => out.push_str("=3D"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Reverse of [`to_sasl_name`].
///
/// A bare `,` or an `=` not followed by `2C` or `3D` is rejected.
pub fn from_sasl_name(value: &str) -> Result<Cow<'_, str>, ScramError> {
    if value.contains(',') {
        return Err(ScramError::Parse("invalid ',' in saslname".into()));
    }
    if !value.contains('=') {
        return Ok(Cow::Borrowed(value));
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('=') {
        out.push_str(rest.get(..pos).unwrap_or_default());
        let escape = rest.get(pos..pos + 3);
        match escape {
            Some("=2C") => out.push(','),
            Some("=3D") => out.push('='),
            _ => {
                return Err(ScramError::Parse(format!(
                    "invalid escape {:?} in saslname",
                    escape.unwrap_or(rest.get(pos..).unwrap_or_default())
                )));
            }
        }
        rest = rest.get(pos + 3..).unwrap_or_default();
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

/// Split `x=value` and check the attribute letter.
fn attribute<'a>(part: Option<&'a str>, name: char, what: &str) -> Result<&'a str, ScramError> {
    let part = part.ok_or_else(|| ScramError::Parse(format!("missing {what}")))?;
    let mut chars = part.chars();
    match (chars.next(), chars.next()) {
        (Some(c), Some('=')) if c == name => Ok(chars.as_str()),
        _ => Err(ScramError::Parse(format!(
            "{what} must be the '{name}' attribute, got {part:?}"
        ))),
    }
}

/// Nonces are printable ASCII excluding `,`.
fn is_valid_nonce(nonce: &str) -> bool {
    nonce.bytes().all(|b| (0x21..=0x7e).contains(&b) && b != b',')
}

/// Parsed server-first-message (`r=...,s=...,i=...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFirstMessage<'a> {
    /// Full nonce (client nonce followed by the server's part)
    pub nonce: &'a str,
    /// Decoded salt
    pub salt: Vec<u8>,
    /// Iteration count
    pub iterations: u32,
}

impl<'a> ServerFirstMessage<'a> {
    /// Parse a server-first-message sent in response to `client_nonce`.
    ///
    /// Attributes must appear in the order `r`, `s`, `i`. Extensions after
    /// `i` are ignored.
    pub fn parse(text: &'a str, client_nonce: &str) -> Result<Self, ScramError> {
        let mut parts = text.split(',');

        let nonce = attribute(parts.next(), 'r', "nonce")?;
        if !nonce.starts_with(client_nonce) {
            return Err(ScramError::NonceMismatch);
        }
        if nonce.len() == client_nonce.len() || !is_valid_nonce(nonce) {
            return Err(ScramError::Parse(format!("invalid server nonce {nonce:?}")));
        }

        let salt = attribute(parts.next(), 's', "salt")?;
        if salt.is_empty() {
            return Err(ScramError::Parse("empty salt".into()));
        }
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| ScramError::Parse(format!("invalid salt: {e}")))?;

        let iterations = attribute(parts.next(), 'i', "iteration count")?;
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| ScramError::Parse(format!("invalid iteration count {iterations:?}")))?;
        if iterations < MIN_ITERATIONS {
            return Err(ScramError::InvalidIterationCount(iterations));
        }

        Ok(Self {
            nonce,
            salt,
            iterations,
        })
    }
}

/// Parsed server-final-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFinalMessage {
    /// `v=<base64 ServerSignature>`
    Verifier(Vec<u8>),
    /// `e=<server-error-value>`
    Error(ServerErrorKind),
}

impl ServerFinalMessage {
    pub fn parse(text: &str) -> Result<Self, ScramError> {
        let first = text.split(',').next().unwrap_or_default();
        if let Some(signature) = first.strip_prefix("v=") {
            let signature = STANDARD
                .decode(signature)
                .map_err(|e| ScramError::Parse(format!("invalid server signature: {e}")))?;
            if signature.is_empty() {
                return Err(ScramError::Parse("empty server signature".into()));
            }
            return Ok(ServerFinalMessage::Verifier(signature));
        }
        if let Some(value) = first.strip_prefix("e=") {
            let kind = ServerErrorKind::from_value(value)
                .ok_or_else(|| ScramError::Parse(format!("unknown server error {value:?}")))?;
            return Ok(ServerFinalMessage::Error(kind));
        }
        Err(ScramError::Parse(
            "server-final-message must contain a verifier or an error".into(),
        ))
    }
}
