//! Connection options.

use no_panic::no_panic;
use url::Url;

use crate::error::Error;
use crate::scram::{DEFAULT_NONCE_LENGTH, ScramSessionFactory};

/// Channel binding material supplied by the TLS layer.
///
/// The crate never computes this itself; `data` is passed through verbatim
/// in the SCRAM client-final-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    /// Binding type name, e.g. `tls-server-end-point`
    pub method: String,
    /// Binding data for that type
    pub data: Vec<u8>,
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Pick a `-PLUS` SCRAM mechanism whenever the server offers one, even if
    /// a stronger plain mechanism is available.
    ///
    /// Default: `false`
    pub prefer_channel_binding: bool,

    /// Channel binding data from the TLS layer. Without it, `-PLUS`
    /// mechanisms are never selected.
    ///
    /// Default: `None`
    pub channel_binding: Option<ChannelBinding>,

    /// Random bytes in the SCRAM client nonce.
    ///
    /// Default: `24`
    pub scram_nonce_length: usize,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            params: Vec::new(),
            prefer_channel_binding: false,
            channel_binding: None,
            scram_nonce_length: DEFAULT_NONCE_LENGTH,
        }
    }
}

impl Opts {
    /// SCRAM session factory configured from these options.
    pub fn scram_factory(&self) -> ScramSessionFactory {
        ScramSessionFactory::new()
            .channel_binding_method(self.channel_binding.as_ref().map(|cb| cb.method.clone()))
            .prefer_channel_binding(self.prefer_channel_binding)
            .nonce_length(self.scram_nonce_length)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {key}: {value}"))),
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `application_name`: application name
    /// - `host`: Unix socket path (when it starts with `/`)
    /// - `prefer_channel_binding`: true/True/1/yes/on or false/False/0/no/off
    /// - `scram_nonce_length`: client nonce length in bytes (positive integer)
    ///
    /// Any other parameter is sent to the server as a startup parameter.
    #[no_panic]
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "host" if value.starts_with('/') => {
                    opts.socket = Some(value.to_string());
                }
                "prefer_channel_binding" => {
                    opts.prefer_channel_binding = parse_bool("prefer_channel_binding", &value)?;
                }
                "scram_nonce_length" => {
                    opts.scram_nonce_length = match value.parse() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid scram_nonce_length: {}",
                                value
                            )));
                        }
                    };
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    #[no_panic]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
