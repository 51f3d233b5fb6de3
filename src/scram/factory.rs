//! Mechanism negotiation.

use super::{DEFAULT_NONCE_LENGTH, ScramError, ScramMechanism, ScramSession};

/// Picks a SCRAM mechanism from the server's list and starts sessions with it.
#[derive(Debug, Clone)]
pub struct ScramSessionFactory {
    channel_binding_method: Option<String>,
    prefer_channel_binding: bool,
    nonce_length: usize,
}

impl Default for ScramSessionFactory {
    fn default() -> Self {
        Self {
            channel_binding_method: None,
            prefer_channel_binding: false,
            nonce_length: DEFAULT_NONCE_LENGTH,
        }
    }
}

/// Keeps the first element on ties.
fn strongest(mechanisms: impl Iterator<Item = ScramMechanism>) -> Option<ScramMechanism> {
    mechanisms.reduce(|best, m| if m.key_length() > best.key_length() { m } else { best })
}

impl ScramSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel binding method the client can provide data for (e.g.
    /// `tls-server-end-point`). Without one, `-PLUS` mechanisms are never
    /// selected.
    pub fn channel_binding_method(mut self, method: Option<String>) -> Self {
        self.channel_binding_method = method;
        self
    }

    /// Prefer a channel binding mechanism over a stronger hash.
    pub fn prefer_channel_binding(mut self, prefer: bool) -> Self {
        self.prefer_channel_binding = prefer;
        self
    }

    /// Client nonce length in random bytes.
    pub fn nonce_length(mut self, length: usize) -> Self {
        self.nonce_length = length.max(1);
        self
    }

    /// Select a mechanism from the names the server advertised.
    ///
    /// Returns the mechanism and whether a channel binding mechanism was
    /// available. Unknown names are ignored.
    pub fn select<S: AsRef<str>>(&self, advertised: &[S]) -> Result<(ScramMechanism, bool), ScramError> {
        let known: Vec<ScramMechanism> = advertised
            .iter()
            .filter_map(|name| ScramMechanism::from_name(name.as_ref()))
            .collect();

        let binding = if self.channel_binding_method.is_some() {
            strongest(known.iter().copied().filter(|m| m.requires_channel_binding()))
        } else {
            None
        };
        let plain = strongest(known.iter().copied().filter(|m| !m.requires_channel_binding()));

        let selected = match (binding, plain) {
            (Some(binding), Some(_)) if self.prefer_channel_binding => Some(binding),
            (Some(binding), Some(plain)) => strongest([binding, plain].into_iter()),
            (Some(binding), None) => Some(binding),
            (None, plain) => plain,
        };

        match selected {
            Some(mechanism) => Ok((mechanism, binding.is_some())),
            None => Err(ScramError::NoSupportedMechanism(
                advertised.iter().map(|s| s.as_ref().to_string()).collect(),
            )),
        }
    }

    /// Select a mechanism and start a session for `username`.
    pub fn start<S: AsRef<str>>(
        &self,
        advertised: &[S],
        username: &str,
    ) -> Result<ScramSession, ScramError> {
        let (mechanism, server_supports_channel_binding) = self.select(advertised)?;
        tracing::debug!(mechanism = mechanism.name(), "selected SASL mechanism");

        let mut session = ScramSession::new(mechanism, username).with_nonce_length(self.nonce_length);
        if let Some(method) = &self.channel_binding_method {
            session = session.with_channel_binding(method.clone(), server_supports_channel_binding);
        }
        Ok(session)
    }
}
