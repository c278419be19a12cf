//! Connection and pool configuration.

use crate::error::ClientError;
use bson::spec::BinarySubtype;
use bson::{doc, Binary, Document};
use docwire_protocol::DEFAULT_PORT;
use std::time::Duration;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The logical database and credentials a connection operates under.
///
/// The authentication exchange itself is opaque here: a context carries the
/// command document to send when it becomes the active one on a socket.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    pub database: String,
    pub username: Option<String>,
    pub command: Option<Document>,
}

impl AuthContext {
    /// A context that selects `database` without authenticating.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            username: None,
            command: None,
        }
    }

    /// A context authenticating with single-step SASL PLAIN.
    pub fn plain(
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl AsRef<str>,
    ) -> Self {
        let username = username.into();
        let mut payload = Vec::with_capacity(username.len() + password.as_ref().len() + 2);
        payload.push(0);
        payload.extend_from_slice(username.as_bytes());
        payload.push(0);
        payload.extend_from_slice(password.as_ref().as_bytes());

        let command = doc! {
            "saslStart": 1,
            "mechanism": "PLAIN",
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: payload },
            "autoAuthorize": 1,
        };

        Self {
            database: database.into(),
            username: Some(username),
            command: Some(command),
        }
    }

    pub fn with_command(mut self, command: Document) -> Self {
        self.command = Some(command);
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Set TCP_NODELAY on new sockets.
    pub nodelay: bool,
    /// Auth context selected before every namespaced operation.
    pub auth: Option<AuthContext>,
    /// Follow every write with `getLastError` and report its error.
    pub safe: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
            auth: None,
            safe: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    /// `host:port`, as used for connecting and in diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Maximum number of connections alive at once. `None` is unbounded;
    /// when set, `lease` waits for a connection to be returned.
    pub max_size: Option<usize>,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size.max(1));
        self
    }
}

/// Parses `mongodb://[user:pass@]host[:port][/database][?options]`.
///
/// Recognised options: `safe`, `connectTimeoutMS`, `maxPoolSize`.
pub fn parse_url(url: &str) -> Result<(ConnectionConfig, PoolConfig), ClientError> {
    let rest = url
        .strip_prefix("mongodb://")
        .ok_or_else(|| ClientError::Config(format!("unsupported scheme in '{url}'")))?;

    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };

    let (authority, database) = match rest.split_once('/') {
        Some((authority, db)) if !db.is_empty() => (authority, Some(db)),
        Some((authority, _)) => (authority, None),
        None => (rest, None),
    };

    let (credentials, hostport) = match authority.rsplit_once('@') {
        Some((creds, hostport)) => (Some(creds), hostport),
        None => (None, authority),
    };

    let (host, port) = match hostport.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ClientError::Config(format!("invalid port '{port}'")))?;
            (host, port)
        }
        None => (hostport, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(ClientError::Config("missing host".into()));
    }

    let mut config = ConnectionConfig::new(host, port);
    let mut pool = PoolConfig::new();

    let database = database.unwrap_or("admin");
    match credentials {
        Some(creds) => {
            let (user, pass) = creds
                .split_once(':')
                .ok_or_else(|| ClientError::Config("credentials must be user:password".into()))?;
            config.auth = Some(AuthContext::plain(
                database,
                percent_decode(user)?,
                percent_decode(pass)?,
            ));
        }
        None => config.auth = Some(AuthContext::new(database)),
    }

    for option in query.unwrap_or("").split('&').filter(|o| !o.is_empty()) {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| ClientError::Config(format!("malformed option '{option}'")))?;
        match key {
            "safe" => config.safe = parse_bool(key, value)?,
            "connectTimeoutMS" => {
                let ms = value
                    .parse::<u64>()
                    .map_err(|_| ClientError::Config(format!("invalid {key} '{value}'")))?;
                config.connect_timeout = Duration::from_millis(ms);
            }
            "maxPoolSize" => {
                let size = value
                    .parse::<usize>()
                    .map_err(|_| ClientError::Config(format!("invalid {key} '{value}'")))?;
                if size > 0 {
                    pool = pool.with_max_size(size);
                }
            }
            other => tracing::warn!("Ignoring unknown connection option '{}'", other),
        }
    }

    Ok((config, pool))
}

/// Decodes `%XX` escapes in a URL component.
fn percent_decode(component: &str) -> Result<String, ClientError> {
    let bytes = component.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| {
                    ClientError::Config(format!("invalid percent escape in '{component}'"))
                })?;
            decoded.push(byte);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded)
        .map_err(|_| ClientError::Config(format!("credentials are not UTF-8 in '{component}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ClientError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ClientError::Config(format!("invalid {key} '{value}'"))),
    }
}
