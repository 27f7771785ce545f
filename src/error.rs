use std::fmt;
use std::io;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  Error
//  ├── Connection        (I/O failure talking to the socket)
//  ├── Disconnected      (socket lost while the command was in flight)
//  ├── Protocol          (malformed RESP stream, fatal for the connection)
//  ├── Server            (error reply, classified by ServerErrorKind)
//  │   ├── Ask / Moved   (cluster redirects, recovered by the router)
//  │   ├── Loading / TryAgain
//  │   └── Err / WrongType / ClusterDown / ReadOnly / NoScript / Busy / Other
//  ├── Unhandled         (error reply for a command sent without a handler)
//  ├── Usage             (caller bug, e.g. an unset argument)
//  ├── Config            (bad URL or option)
//  ├── Type              (typed wrapper got an unexpected reply shape)
//  ├── Timeout
//  ├── Cluster           (routing / topology discovery failure)
//  └── Closed            (connection or router shut down)

/// Structured server error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// MOVED slot host:port
    Moved { slot: u16, host: String, port: u16 },
    /// ASK slot host:port
    Ask { slot: u16, host: String, port: u16 },
    /// CLUSTERDOWN
    ClusterDown,
    /// LOADING the dataset is being loaded in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY the server is busy running a script
    Busy,
    /// TRYAGAIN
    TryAgain,
    /// Any other error prefix
    Other(String),
}

impl ServerErrorKind {
    /// Classify a server error line (e.g. "WRONGTYPE Operation against…").
    pub fn from_error_msg(msg: &str) -> Self {
        if let Some(rest) = msg.strip_prefix("MOVED ") {
            return match parse_redirect(rest) {
                Some((slot, host, port)) => Self::Moved { slot, host, port },
                None => Self::Other("MOVED".to_string()),
            };
        }
        if let Some(rest) = msg.strip_prefix("ASK ") {
            return match parse_redirect(rest) {
                Some((slot, host, port)) => Self::Ask { slot, host, port },
                None => Self::Other("ASK".to_string()),
            };
        }

        let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
        match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "CLUSTERDOWN" => Self::ClusterDown,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "TRYAGAIN" => Self::TryAgain,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Parse `<slot> <host>:<port>`. The host may itself contain colons (IPv6),
/// so the port is split off at the last one.
fn parse_redirect(rest: &str) -> Option<(u16, String, u16)> {
    let (slot_str, addr) = rest.split_once(' ')?;
    let slot = slot_str.parse::<u16>().ok()?;
    if slot >= crate::crc16::SLOT_COUNT {
        return None;
    }
    let (host, port_str) = addr.trim().rsplit_once(':')?;
    let port = port_str.parse::<u16>().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((slot, host.to_string(), port))
}

/// An error reply from the server, with its classified kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub message: String,
}

impl ServerError {
    /// Build from the raw text of a `-` line, auto-classifying the kind.
    pub fn new(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = ServerErrorKind::from_error_msg(&message);
        Self { kind, message }
    }

    /// `host:port` of a MOVED/ASK target.
    pub fn redirect_addr(&self) -> Option<String> {
        match &self.kind {
            ServerErrorKind::Moved { host, port, .. } | ServerErrorKind::Ask { host, port, .. } => {
                Some(format!("{host}:{port}"))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// All error variants for respline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(ServerError),

    #[error("unhandled server error: {0}")]
    Unhandled(ServerError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Create a server error from a raw error line, auto-parsing the kind.
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(ServerError::new(msg))
    }

    /// The classified kind, if this is a server error reply.
    pub fn server_kind(&self) -> Option<&ServerErrorKind> {
        match self {
            Self::Server(e) | Self::Unhandled(e) => Some(&e.kind),
            _ => None,
        }
    }

    /// Check if this is a MOVED redirect.
    pub fn is_moved(&self) -> bool {
        matches!(self.server_kind(), Some(ServerErrorKind::Moved { .. }))
    }

    /// Check if this is an ASK redirect.
    pub fn is_ask(&self) -> bool {
        matches!(self.server_kind(), Some(ServerErrorKind::Ask { .. }))
    }

    /// True for failures of the transport rather than of the command.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Disconnected(_) | Self::Timeout(_) | Self::Closed
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_err() {
        let e = ServerError::new("ERR unknown command 'FOO'");
        assert_eq!(e.kind, ServerErrorKind::Err);
        assert_eq!(e.message, "ERR unknown command 'FOO'");
    }

    #[test]
    fn kind_wrongtype() {
        let kind =
            ServerErrorKind::from_error_msg("WRONGTYPE Operation against a key holding wrong type");
        assert_eq!(kind, ServerErrorKind::WrongType);
    }

    #[test]
    fn kind_moved() {
        let kind = ServerErrorKind::from_error_msg("MOVED 3999 127.0.0.1:6381");
        assert_eq!(
            kind,
            ServerErrorKind::Moved {
                slot: 3999,
                host: "127.0.0.1".to_string(),
                port: 6381,
            }
        );
    }

    #[test]
    fn kind_ask() {
        let kind = ServerErrorKind::from_error_msg("ASK 12345 127.0.0.1:9876");
        assert_eq!(
            kind,
            ServerErrorKind::Ask {
                slot: 12345,
                host: "127.0.0.1".to_string(),
                port: 9876,
            }
        );
    }

    #[test]
    fn kind_moved_ipv6() {
        let kind = ServerErrorKind::from_error_msg("MOVED 1 ::1:7000");
        assert_eq!(
            kind,
            ServerErrorKind::Moved {
                slot: 1,
                host: "::1".to_string(),
                port: 7000,
            }
        );
    }

    #[test]
    fn kind_moved_invalid_slot() {
        let kind = ServerErrorKind::from_error_msg("MOVED abc 127.0.0.1:6381");
        assert_eq!(kind, ServerErrorKind::Other("MOVED".to_string()));
    }

    #[test]
    fn kind_moved_slot_out_of_range() {
        let kind = ServerErrorKind::from_error_msg("MOVED 16384 127.0.0.1:6381");
        assert_eq!(kind, ServerErrorKind::Other("MOVED".to_string()));
    }

    #[test]
    fn kind_ask_missing_port() {
        let kind = ServerErrorKind::from_error_msg("ASK 10 127.0.0.1");
        assert_eq!(kind, ServerErrorKind::Other("ASK".to_string()));
    }

    #[test]
    fn kind_loading_and_tryagain() {
        assert_eq!(
            ServerErrorKind::from_error_msg("LOADING Redis is loading the dataset in memory"),
            ServerErrorKind::Loading
        );
        assert_eq!(
            ServerErrorKind::from_error_msg("TRYAGAIN Multiple keys request during rehashing"),
            ServerErrorKind::TryAgain
        );
    }

    #[test]
    fn kind_other_prefixes() {
        assert_eq!(
            ServerErrorKind::from_error_msg("CLUSTERDOWN The cluster is down"),
            ServerErrorKind::ClusterDown
        );
        assert_eq!(
            ServerErrorKind::from_error_msg("READONLY You can't write against a read only replica"),
            ServerErrorKind::ReadOnly
        );
        assert_eq!(
            ServerErrorKind::from_error_msg("NOSCRIPT No matching script"),
            ServerErrorKind::NoScript
        );
        assert_eq!(
            ServerErrorKind::from_error_msg("BUSY Redis is busy running a script"),
            ServerErrorKind::Busy
        );
        assert_eq!(
            ServerErrorKind::from_error_msg("CUSTOMPREFIX something happened"),
            ServerErrorKind::Other("CUSTOMPREFIX".to_string())
        );
    }

    #[test]
    fn kind_prefix_must_be_whole_word() {
        // "ERRORS" is not "ERR"
        assert_eq!(
            ServerErrorKind::from_error_msg("ERRORS happened"),
            ServerErrorKind::Other("ERRORS".to_string())
        );
    }

    #[test]
    fn redirect_addr() {
        let e = ServerError::new("ASK 5 10.0.0.2:7001");
        assert_eq!(e.redirect_addr().as_deref(), Some("10.0.0.2:7001"));
        assert_eq!(ServerError::new("ERR nope").redirect_addr(), None);
    }

    #[test]
    fn error_display() {
        let err = Error::Connection(io::Error::new(io::ErrorKind::Other, "refused"));
        assert!(err.to_string().contains("connection error"));

        let err = Error::Protocol("bad input".into());
        assert_eq!(err.to_string(), "protocol error: bad input");

        let err = Error::server("ERR unknown command");
        assert_eq!(err.to_string(), "server error: ERR unknown command");

        let err = Error::Usage("argument 2 is unset".into());
        assert_eq!(err.to_string(), "usage error: argument 2 is unset");

        let err = Error::Cluster("no node for slot".into());
        assert_eq!(err.to_string(), "cluster error: no node for slot");

        assert_eq!(Error::Closed.to_string(), "connection closed");
    }

    #[test]
    fn error_redirect_helpers() {
        let err = Error::server("MOVED 3999 127.0.0.1:6381");
        assert!(err.is_moved());
        assert!(!err.is_ask());

        let err = Error::server("ASK 3999 127.0.0.1:6381");
        assert!(err.is_ask());
        assert!(!err.is_moved());

        let err = Error::server("WRONGTYPE Operation against wrong type");
        assert!(!err.is_moved());
        assert!(!err.is_ask());
        assert_eq!(err.server_kind(), Some(&ServerErrorKind::WrongType));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.is_transport());
        assert!(!Error::server("ERR x").is_transport());
    }
}
