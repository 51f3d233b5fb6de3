//! SCRAM mechanisms and the key derivation functions behind them.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::ScramError;
use crate::error::Result;
use crate::saslprep;

/// A SCRAM mechanism this client can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramMechanism {
    /// SCRAM-SHA-1
    Sha1,
    /// SCRAM-SHA-1-PLUS
    Sha1Plus,
    /// SCRAM-SHA-256
    Sha256,
    /// SCRAM-SHA-256-PLUS
    Sha256Plus,
}

impl ScramMechanism {
    /// Every supported mechanism.
    pub const ALL: [ScramMechanism; 4] = [
        ScramMechanism::Sha1,
        ScramMechanism::Sha1Plus,
        ScramMechanism::Sha256,
        ScramMechanism::Sha256Plus,
    ];

    /// IANA mechanism name.
    pub fn name(self) -> &'static str {
        match self {
            ScramMechanism::Sha1 => "SCRAM-SHA-1",
            ScramMechanism::Sha1Plus => "SCRAM-SHA-1-PLUS",
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
            ScramMechanism::Sha256Plus => "SCRAM-SHA-256-PLUS",
        }
    }

    /// Look up a mechanism by its IANA name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether this is a `-PLUS` mechanism.
    pub fn requires_channel_binding(self) -> bool {
        matches!(self, ScramMechanism::Sha1Plus | ScramMechanism::Sha256Plus)
    }

    /// Key length in bits.
    pub fn key_length(self) -> u32 {
        match self {
            ScramMechanism::Sha1 | ScramMechanism::Sha1Plus => 160,
            ScramMechanism::Sha256 | ScramMechanism::Sha256Plus => 256,
        }
    }

    fn is_sha1(self) -> bool {
        matches!(self, ScramMechanism::Sha1 | ScramMechanism::Sha1Plus)
    }

    /// `H(data)`
    pub(crate) fn hash(self, data: &[u8]) -> Vec<u8> {
        if self.is_sha1() {
            Sha1::digest(data).to_vec()
        } else {
            Sha256::digest(data).to_vec()
        }
    }

    /// `HMAC(key, data)`
    pub(crate) fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if self.is_sha1() {
            let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(crypto_error)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        } else {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(crypto_error)?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }

    /// Constant-time check of `HMAC(key, data) == expected`.
    pub(crate) fn verify_hmac(self, key: &[u8], data: &[u8], expected: &[u8]) -> Result<bool> {
        if self.is_sha1() {
            let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(crypto_error)?;
            mac.update(data);
            Ok(mac.verify_slice(expected).is_ok())
        } else {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(crypto_error)?;
            mac.update(data);
            Ok(mac.verify_slice(expected).is_ok())
        }
    }

    /// `Hi(password, salt, iterations)`, i.e. PBKDF2 with this mechanism's HMAC.
    pub(crate) fn salted_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        if self.is_sha1() {
            let mut out = vec![0u8; 20];
            pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut out);
            out
        } else {
            let mut out = vec![0u8; 32];
            pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
            out
        }
    }
}

impl std::fmt::Display for ScramMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn crypto_error(err: hmac::digest::InvalidLength) -> crate::error::Error {
    ScramError::Crypto(err.to_string()).into()
}

/// Keys derived from a password for one salt and iteration count.
///
/// These can be cached by the caller and fed back through
/// [`ServerFirst::with_keys`](super::ServerFirst::with_keys) to skip the
/// PBKDF2 step on later logins with the same salt.
#[derive(Clone, PartialEq, Eq)]
pub struct ScramKeys {
    /// `HMAC(SaltedPassword, "Client Key")`
    pub client_key: Vec<u8>,
    /// `H(ClientKey)`
    pub stored_key: Vec<u8>,
    /// `HMAC(SaltedPassword, "Server Key")`
    pub server_key: Vec<u8>,
}

impl ScramKeys {
    /// Derive keys from a plaintext password.
    ///
    /// The password is prepared with SASLprep (query variant) before use.
    pub fn derive(
        mechanism: ScramMechanism,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Self> {
        let prepared = saslprep::prepare(password, false)?;
        let salted = mechanism.salted_password(prepared.as_bytes(), salt, iterations);
        Self::from_salted_password(mechanism, &salted)
    }

    /// Derive keys from an already salted password.
    pub fn from_salted_password(mechanism: ScramMechanism, salted_password: &[u8]) -> Result<Self> {
        let client_key = mechanism.hmac(salted_password, b"Client Key")?;
        let stored_key = mechanism.hash(&client_key);
        let server_key = mechanism.hmac(salted_password, b"Server Key")?;
        Ok(Self {
            client_key,
            stored_key,
            server_key,
        })
    }
}

impl std::fmt::Debug for ScramKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramKeys").finish_non_exhaustive()
    }
}
