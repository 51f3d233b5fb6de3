//! One SCRAM authentication exchange, as a chain of owned steps.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use super::message::{ChannelBindingFlag, Gs2Header, ServerFinalMessage, ServerFirstMessage, to_sasl_name};
use super::{DEFAULT_NONCE_LENGTH, ScramError, ScramKeys, ScramMechanism};
use crate::error::{Error, Result};
use crate::saslprep;

/// Random client nonce: `length` random bytes, base64 encoded.
fn generate_nonce(length: usize) -> String {
    let mut bytes = vec![0u8; length.max(1)];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// A SCRAM exchange that has not sent anything yet.
///
/// A session is bound to one user and one attempt; it cannot be reused.
#[derive(Debug, Clone)]
pub struct ScramSession {
    mechanism: ScramMechanism,
    username: String,
    nonce: String,
    channel_binding_method: Option<String>,
    server_supports_channel_binding: bool,
}

impl ScramSession {
    /// Start a session with a freshly generated nonce and no channel binding.
    pub fn new(mechanism: ScramMechanism, username: impl Into<String>) -> Self {
        Self {
            mechanism,
            username: username.into(),
            nonce: generate_nonce(DEFAULT_NONCE_LENGTH),
            channel_binding_method: None,
            server_supports_channel_binding: false,
        }
    }

    /// Replace the client nonce.
    ///
    /// Only useful for reproducing known exchanges; real sessions should keep
    /// the random nonce.
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }

    /// Regenerate the nonce from `length` random bytes.
    pub fn with_nonce_length(mut self, length: usize) -> Self {
        self.nonce = generate_nonce(length);
        self
    }

    /// Configure the channel binding method the client is able to use.
    pub fn with_channel_binding(
        mut self,
        method: impl Into<String>,
        server_supports_channel_binding: bool,
    ) -> Self {
        self.channel_binding_method = Some(method.into());
        self.server_supports_channel_binding = server_supports_channel_binding;
        self
    }

    pub fn mechanism(&self) -> ScramMechanism {
        self.mechanism
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn channel_binding_method(&self) -> Option<&str> {
        self.channel_binding_method.as_deref()
    }

    /// Whether channel binding data must be passed to
    /// [`ClientFirst::receive_server_first`].
    pub fn requires_channel_binding_data(&self) -> bool {
        self.mechanism.requires_channel_binding()
    }

    fn channel_binding_flag(&self) -> ChannelBindingFlag {
        match &self.channel_binding_method {
            Some(method) if self.mechanism.requires_channel_binding() => {
                ChannelBindingFlag::Required(method.clone())
            }
            Some(_) if !self.server_supports_channel_binding => ChannelBindingFlag::ClientSupported,
            _ => ChannelBindingFlag::NotUsed,
        }
    }

    /// Build the client-first-message.
    ///
    /// The username is prepared with SASLprep first.
    pub fn client_first(self, authzid: Option<&str>) -> Result<ClientFirst> {
        let username = saslprep::prepare(&self.username, false)?;
        let header = Gs2Header::new(self.channel_binding_flag(), authzid.map(str::to_string));

        let mut message = String::new();
        header.write_to(&mut message);
        let bare_start = message.len();
        message.push_str("n=");
        message.push_str(&to_sasl_name(&username));
        message.push_str(",r=");
        message.push_str(&self.nonce);

        Ok(ClientFirst {
            mechanism: self.mechanism,
            nonce: self.nonce,
            header,
            message,
            bare_start,
        })
    }
}

/// The client-first-message has been built and is waiting for the server.
#[derive(Debug, Clone)]
pub struct ClientFirst {
    mechanism: ScramMechanism,
    nonce: String,
    header: Gs2Header,
    message: String,
    bare_start: usize,
}

impl ClientFirst {
    /// Full client-first-message, GS2 header included.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// client-first-message-bare (without the GS2 header).
    pub fn bare(&self) -> &str {
        self.message.get(self.bare_start..).unwrap_or_default()
    }

    pub fn mechanism(&self) -> ScramMechanism {
        self.mechanism
    }

    /// Parse the server-first-message.
    ///
    /// `channel_binding_data` is required for `-PLUS` mechanisms.
    pub fn receive_server_first(
        self,
        server_first: &str,
        channel_binding_data: Option<&[u8]>,
    ) -> Result<ServerFirst> {
        if self.mechanism.requires_channel_binding() && channel_binding_data.is_none() {
            return Err(ScramError::MissingChannelBindingData.into());
        }

        let parsed = ServerFirstMessage::parse(server_first, &self.nonce)?;
        let nonce = parsed.nonce.to_string();

        Ok(ServerFirst {
            mechanism: self.mechanism,
            client_first_bare: self.bare().to_string(),
            header: self.header,
            server_first: server_first.to_string(),
            nonce,
            salt: parsed.salt,
            iterations: parsed.iterations,
            channel_binding_data: channel_binding_data.map(<[u8]>::to_vec),
        })
    }
}

/// The server-first-message has been accepted; credentials are next.
#[derive(Debug, Clone)]
pub struct ServerFirst {
    mechanism: ScramMechanism,
    client_first_bare: String,
    header: Gs2Header,
    server_first: String,
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
    channel_binding_data: Option<Vec<u8>>,
}

impl ServerFirst {
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Combined client and server nonce.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Derive keys from the password and build the client-final-message.
    pub fn with_password(self, password: &str) -> Result<ClientFinal> {
        if password.is_empty() {
            return Err(Error::Auth("password must not be empty".into()));
        }
        let keys = ScramKeys::derive(self.mechanism, password, &self.salt, self.iterations)?;
        self.with_keys(keys)
    }

    /// Build the client-final-message from keys derived earlier for the
    /// same salt and iteration count.
    pub fn with_keys(self, keys: ScramKeys) -> Result<ClientFinal> {
        let mut channel_binding = String::new();
        self.header.write_to(&mut channel_binding);
        let mut cbind_input = channel_binding.into_bytes();
        if let (ChannelBindingFlag::Required(_), Some(data)) =
            (&self.header.flag, &self.channel_binding_data)
        {
            cbind_input.extend_from_slice(data);
        }

        let without_proof = format!("c={},r={}", STANDARD.encode(&cbind_input), self.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof
        );

        let client_signature = self
            .mechanism
            .hmac(&keys.stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = keys
            .client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let message = format!("{without_proof},p={}", STANDARD.encode(proof));

        Ok(ClientFinal {
            sent: ClientFinalSent {
                mechanism: self.mechanism,
                server_key: keys.server_key,
                auth_message,
            },
            message,
        })
    }
}

/// The client-final-message is ready to send.
#[derive(Debug, Clone)]
pub struct ClientFinal {
    message: String,
    sent: ClientFinalSent,
}

impl ClientFinal {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Take the message to send and the state that verifies the reply.
    pub fn client_final_message(self) -> (String, ClientFinalSent) {
        (self.message, self.sent)
    }
}

/// The client-final-message was sent; only the server signature is left.
#[derive(Clone)]
pub struct ClientFinalSent {
    mechanism: ScramMechanism,
    server_key: Vec<u8>,
    auth_message: String,
}

impl ClientFinalSent {
    pub fn auth_message(&self) -> &str {
        &self.auth_message
    }

    /// Check the server-final-message.
    pub fn receive_server_final(self, server_final: &str) -> Result<()> {
        match ServerFinalMessage::parse(server_final)? {
            ServerFinalMessage::Error(kind) => Err(ScramError::ServerError(kind).into()),
            ServerFinalMessage::Verifier(signature) => {
                let valid = self.mechanism.verify_hmac(
                    &self.server_key,
                    self.auth_message.as_bytes(),
                    &signature,
                )?;
                if valid {
                    Ok(())
                } else {
                    Err(ScramError::InvalidServerSignature.into())
                }
            }
        }
    }
}

impl std::fmt::Debug for ClientFinalSent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFinalSent")
            .field("mechanism", &self.mechanism)
            .field("auth_message", &self.auth_message)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scram::ServerErrorKind;

    const SHA1_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const SHA1_SERVER_FIRST: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";

    const SHA256_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SHA256_SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    #[test]
    fn rfc5802_sha1_exchange() {
        let first = ScramSession::new(ScramMechanism::Sha1, "user")
            .with_nonce(SHA1_NONCE)
            .client_first(None)
            .unwrap();
        assert_eq!(first.message(), "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL");
        assert_eq!(first.bare(), "n=user,r=fyko+d2lbbFgONRv9qkxdawL");

        let server_first = first.receive_server_first(SHA1_SERVER_FIRST, None).unwrap();
        assert_eq!(server_first.iterations(), 4096);

        let (message, sent) = server_first
            .with_password("pencil")
            .unwrap()
            .client_final_message();
        assert_eq!(
            message,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        sent.receive_server_final("v=rmF9pqV8S7suAoZWja4dJRkFsKQ=")
            .unwrap();
    }

    #[test]
    fn rfc7677_sha256_exchange() {
        let first = ScramSession::new(ScramMechanism::Sha256, "user")
            .with_nonce(SHA256_NONCE)
            .client_first(None)
            .unwrap();
        assert_eq!(first.message(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let (message, sent) = first
            .receive_server_first(SHA256_SERVER_FIRST, None)
            .unwrap()
            .with_password("pencil")
            .unwrap()
            .client_final_message();
        assert_eq!(
            message,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        sent.receive_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn cached_keys_give_the_same_proof() {
        let salt = STANDARD.decode("W22ZaJ0SNY7soEsUEjb6gQ==").unwrap();
        let keys = ScramKeys::derive(ScramMechanism::Sha256, "pencil", &salt, 4096).unwrap();

        let (message, sent) = ScramSession::new(ScramMechanism::Sha256, "user")
            .with_nonce(SHA256_NONCE)
            .client_first(None)
            .unwrap()
            .receive_server_first(SHA256_SERVER_FIRST, None)
            .unwrap()
            .with_keys(keys)
            .unwrap()
            .client_final_message();
        assert!(message.ends_with(",p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="));
        sent.receive_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn wrong_server_signature_is_rejected() {
        let (_, sent) = ScramSession::new(ScramMechanism::Sha1, "user")
            .with_nonce(SHA1_NONCE)
            .client_first(None)
            .unwrap()
            .receive_server_first(SHA1_SERVER_FIRST, None)
            .unwrap()
            .with_password("pencil")
            .unwrap()
            .client_final_message();
        let err = sent
            .receive_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert!(matches!(err, Error::Scram(ScramError::InvalidServerSignature)));
    }

    #[test]
    fn server_error_is_reported() {
        let (_, sent) = ScramSession::new(ScramMechanism::Sha1, "user")
            .with_nonce(SHA1_NONCE)
            .client_first(None)
            .unwrap()
            .receive_server_first(SHA1_SERVER_FIRST, None)
            .unwrap()
            .with_password("pencil")
            .unwrap()
            .client_final_message();
        let err = sent.receive_server_final("e=invalid-proof").unwrap_err();
        assert!(matches!(
            err,
            Error::Scram(ScramError::ServerError(ServerErrorKind::InvalidProof))
        ));
    }

    #[test]
    fn nonce_mismatch() {
        let err = ScramSession::new(ScramMechanism::Sha256, "user")
            .with_nonce("abc")
            .client_first(None)
            .unwrap()
            .receive_server_first(SHA256_SERVER_FIRST, None)
            .unwrap_err();
        assert!(matches!(err, Error::Scram(ScramError::NonceMismatch)));
    }

    #[test]
    fn empty_password_is_rejected() {
        let err = ScramSession::new(ScramMechanism::Sha1, "user")
            .with_nonce(SHA1_NONCE)
            .client_first(None)
            .unwrap()
            .receive_server_first(SHA1_SERVER_FIRST, None)
            .unwrap()
            .with_password("")
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn plus_mechanism_needs_binding_data() {
        let first = ScramSession::new(ScramMechanism::Sha256Plus, "")
            .with_nonce(SHA256_NONCE)
            .with_channel_binding("tls-server-end-point", true)
            .client_first(None)
            .unwrap();
        assert_eq!(
            first.message(),
            "p=tls-server-end-point,,n=,r=rOprNGfwEbeRWgbNEkqO"
        );
        let err = first
            .clone()
            .receive_server_first(SHA256_SERVER_FIRST, None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Scram(ScramError::MissingChannelBindingData)
        ));

        let (message, _) = first
            .receive_server_first(SHA256_SERVER_FIRST, Some(&b"\x01\x02"[..]))
            .unwrap()
            .with_password("pencil")
            .unwrap()
            .client_final_message();
        let expected_c = STANDARD.encode(b"p=tls-server-end-point,,\x01\x02");
        assert!(message.starts_with(&format!("c={expected_c},r=")));
    }

    #[test]
    fn gs2_flag_selection() {
        let flag = |mechanism, method: Option<&str>, server_supports| {
            let mut session = ScramSession::new(mechanism, "u");
            if let Some(method) = method {
                session = session.with_channel_binding(method, server_supports);
            }
            session.channel_binding_flag()
        };

        assert_eq!(flag(ScramMechanism::Sha256, None, false), ChannelBindingFlag::NotUsed);
        assert_eq!(
            flag(ScramMechanism::Sha256, Some("tls-unique"), false),
            ChannelBindingFlag::ClientSupported
        );
        assert_eq!(
            flag(ScramMechanism::Sha256, Some("tls-unique"), true),
            ChannelBindingFlag::NotUsed
        );
        assert_eq!(
            flag(ScramMechanism::Sha256Plus, Some("tls-unique"), true),
            ChannelBindingFlag::Required("tls-unique".into())
        );
    }

    #[test]
    fn username_and_authzid_are_escaped() {
        let first = ScramSession::new(ScramMechanism::Sha256, "a,b")
            .with_nonce("xyz")
            .client_first(Some("c=d"))
            .unwrap();
        assert_eq!(first.message(), "n,a=c=3Dd,n=a=2Cb,r=xyz");
    }

    #[test]
    fn generated_nonces_differ() {
        let a = ScramSession::new(ScramMechanism::Sha256, "u");
        let b = ScramSession::new(ScramMechanism::Sha256, "u");
        assert_ne!(a.nonce(), b.nonce());
        assert_eq!(a.nonce().len(), 32);
        let short = a.with_nonce_length(3);
        assert_eq!(short.nonce().len(), 4);
    }
}
