//! Server, check and upload configuration

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How articles are submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PostMethod {
    /// POST (RFC 3977 §6.3.1)
    #[default]
    Post,
    /// IHAVE (RFC 3977 §6.3.2)
    Ihave,
}

/// What to do when a post times out after the article was sent
///
/// The N-th post timeout of one request uses the N-th configured action;
/// once the list is exhausted the timeout is returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum PostTimeoutAction {
    /// Post again with a fresh message-id
    Retry,
    /// Assume the server committed the article
    Ignore,
    /// Remove the named header, then post again
    StripHeader(String),
}

impl FromStr for PostTimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "retry" => Ok(PostTimeoutAction::Retry),
            "ignore" => Ok(PostTimeoutAction::Ignore),
            other => match other.strip_prefix("strip-hdr=") {
                Some(name) if !name.is_empty() => {
                    Ok(PostTimeoutAction::StripHeader(name.to_string()))
                }
                _ => Err(format!("unknown post timeout action: {other}")),
            },
        }
    }
}

impl fmt::Display for PostTimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostTimeoutAction::Retry => f.write_str("retry"),
            PostTimeoutAction::Ignore => f.write_str("ignore"),
            PostTimeoutAction::StripHeader(name) => write!(f, "strip-hdr={name}"),
        }
    }
}

impl TryFrom<String> for PostTimeoutAction {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PostTimeoutAction> for String {
    fn from(value: PostTimeoutAction) -> Self {
        value.to_string()
    }
}

/// NNTP server configuration
///
/// Contains the connection details plus the timeout and retry policy every
/// connection to this server follows.
///
/// # Example
///
/// ```
/// use nntp_upload::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::tls("news.example.com", "user", "pass")
///     .with_connections(8)
///     .with_post_timeout(Duration::from_secs(60));
/// assert_eq!(config.connections, 8);
/// ```
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    /// Server hostname (e.g., "news.example.com")
    pub host: String,

    /// Server port (typically 119 for plain, 563 for TLS)
    pub port: u16,

    /// Use TLS/SSL encryption
    pub tls: bool,

    /// Allow insecure TLS connections (self-signed certificates, expired certificates)
    ///
    /// **Security Warning:** Setting this to `true` disables certificate validation,
    /// making your connection vulnerable to man-in-the-middle attacks.
    pub allow_insecure_tls: bool,

    /// Username for AUTHINFO; no authentication when `None`
    pub username: Option<String>,

    /// Password for AUTHINFO
    pub password: String,

    /// Number of simultaneous connections opened to this server
    pub connections: usize,

    /// Budget for TCP connect, TLS handshake and greeting
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub connect_timeout: Duration,

    /// Budget for each command response
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub request_timeout: Duration,

    /// Budget for sending an article and reading the final post response
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub post_timeout: Duration,

    /// Reconnect attempts before a connect failure is reported
    pub connect_retries: u32,

    /// Times a request is replayed after a lost connection or timeout
    pub request_retries: u32,

    /// Times a rejected article is posted again with a fresh message-id
    pub post_retries: u32,

    /// Pause before reconnecting
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub reconnect_delay: Duration,

    /// Enable TCP keep-alive on the socket
    pub keep_alive: bool,

    /// POST or IHAVE
    pub post_method: PostMethod,

    /// Actions for successive post timeouts
    pub on_post_timeout: Vec<PostTimeoutAction>,

    /// Never regenerate the message-id, even when posting again
    pub keep_message_id: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 119,
            tls: false,
            allow_insecure_tls: false,
            username: None,
            password: String::new(),
            connections: 3,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            post_timeout: Duration::from_secs(120),
            connect_retries: 1,
            request_retries: 5,
            post_retries: 1,
            reconnect_delay: Duration::from_secs(15),
            keep_alive: false,
            post_method: PostMethod::Post,
            on_post_timeout: vec![
                PostTimeoutAction::Retry,
                PostTimeoutAction::Retry,
                PostTimeoutAction::Retry,
            ],
            keep_message_id: false,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration
    ///
    /// # Arguments
    ///
    /// * `host` - Server hostname
    /// * `port` - Server port
    /// * `tls` - Whether to use TLS/SSL
    /// * `username` - Authentication username (empty for none)
    /// * `password` - Authentication password
    pub fn new(
        host: impl Into<String>,
        port: u16,
        tls: bool,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            host: host.into(),
            port,
            tls,
            username: (!username.is_empty()).then_some(username),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Create a configuration for a TLS connection on the standard secure port (563)
    pub fn tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 563, true, username, password)
    }

    /// Create a configuration for a plain connection on the standard port (119)
    ///
    /// **Warning:** Plain connections transmit credentials in clear text.
    pub fn plain(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 119, false, username, password)
    }

    /// Create a TLS configuration that accepts self-signed certificates
    ///
    /// **Security Warning:** This configuration disables certificate validation.
    pub fn tls_insecure(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::tls(host, username, password);
        config.allow_insecure_tls = true;
        config
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the number of connections
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    /// Set connect, request and post timeouts at once
    pub fn with_timeouts(mut self, connect: Duration, request: Duration, post: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self.post_timeout = post;
        self
    }

    /// Set the post timeout
    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }

    /// Set connect, request and post retry limits
    pub fn with_retries(mut self, connect: u32, request: u32, post: u32) -> Self {
        self.connect_retries = connect;
        self.request_retries = request;
        self.post_retries = post;
        self
    }

    /// Set the reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the post method
    pub fn with_post_method(mut self, method: PostMethod) -> Self {
        self.post_method = method;
        self
    }

    /// Set the post timeout actions
    pub fn with_post_timeout_actions(mut self, actions: Vec<PostTimeoutAction>) -> Self {
        self.on_post_timeout = actions;
        self
    }
}

/// Post verification settings
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CheckConfig {
    /// Dedicated checking connections; 0 lets posting connections check
    pub connections: usize,
    /// Server to check against; the posting server when `None`
    pub server: Option<ServerConfig>,
    /// Consecutive failed STATs before giving up on a post; 0 disables checking
    pub tries: u32,
    /// Wait after posting before the first STAT
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub delay: Duration,
    /// Wait between failed STATs
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub recheck_delay: Duration,
    /// Times an article that never showed up is posted again
    pub post_retries: u32,
    /// Capacity of the check queue
    pub queue_size: usize,
    /// Group selected before STAT, for servers that insist on one
    pub group: Option<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            connections: 1,
            server: None,
            tries: 2,
            delay: Duration::from_secs(5),
            recheck_delay: Duration::from_secs(30),
            post_retries: 1,
            queue_size: 10_000,
            group: None,
        }
    }
}

impl CheckConfig {
    /// Checking switched off
    pub fn disabled() -> Self {
        Self {
            connections: 0,
            tries: 0,
            ..Default::default()
        }
    }

    /// Whether posts are verified at all
    pub fn enabled(&self) -> bool {
        self.tries > 0
    }
}

/// Error classes that may be downgraded to a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SkippableError {
    /// Post timed out after every retry
    PostTimeout,
    /// Server rejected the article after every retry
    PostReject,
    /// Any other post failure
    PostFail,
    /// STAT timed out after every retry
    CheckTimeout,
    /// Article not found and no repost budget left
    CheckMissing,
    /// Any other check failure
    CheckFail,
}

impl SkippableError {
    const ALL: [SkippableError; 6] = [
        SkippableError::PostTimeout,
        SkippableError::PostReject,
        SkippableError::PostFail,
        SkippableError::CheckTimeout,
        SkippableError::CheckMissing,
        SkippableError::CheckFail,
    ];

    fn name(&self) -> &'static str {
        match self {
            SkippableError::PostTimeout => "post-timeout",
            SkippableError::PostReject => "post-reject",
            SkippableError::PostFail => "post-fail",
            SkippableError::CheckTimeout => "check-timeout",
            SkippableError::CheckMissing => "check-missing",
            SkippableError::CheckFail => "check-fail",
        }
    }
}

impl fmt::Display for SkippableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SkippableError {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SkippableError::ALL
            .into_iter()
            .find(|e| e.name() == s.trim())
            .ok_or_else(|| format!("unknown error class: {s}"))
    }
}

/// Set of error classes downgraded to warnings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkipErrors(HashSet<SkippableError>);

impl SkipErrors {
    /// Nothing is skipped
    pub fn none() -> Self {
        Self::default()
    }

    /// Everything skippable is skipped
    pub fn all() -> Self {
        Self(SkippableError::ALL.into_iter().collect())
    }

    /// Add an error class
    pub fn with(mut self, error: SkippableError) -> Self {
        self.0.insert(error);
        self
    }

    /// Whether the class is downgraded
    pub fn contains(&self, error: SkippableError) -> bool {
        self.0.contains(&error)
    }
}

impl FromStr for SkipErrors {
    type Err = String;

    /// Parse `all`, `none` or a comma separated list of classes
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Self::all()),
            "none" | "" => Ok(Self::none()),
            list => list
                .split(',')
                .map(str::parse)
                .collect::<std::result::Result<HashSet<_>, _>>()
                .map(Self),
        }
    }
}

/// Upload rate limit: at most `amount` bytes per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleConfig {
    /// Bytes allowed per window
    pub amount: u64,
    /// Window length; zero here or in `amount` disables throttling
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub window: Duration,
}

/// Everything the upload orchestrator needs
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UploadConfig {
    /// Posting server
    pub server: ServerConfig,
    /// Post verification
    #[cfg_attr(feature = "serde", serde(default))]
    pub check: CheckConfig,
    /// Capacity of the post queue
    #[cfg_attr(feature = "serde", serde(default = "default_post_queue_size"))]
    pub post_queue_size: usize,
    /// Errors downgraded to warnings
    #[cfg_attr(feature = "serde", serde(default))]
    pub skip_errors: SkipErrors,
    /// Optional upload rate limit
    #[cfg_attr(feature = "serde", serde(default))]
    pub throttle: Option<ThrottleConfig>,
}

fn default_post_queue_size() -> usize {
    10
}

impl UploadConfig {
    /// Configuration with default check and queue settings
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            check: CheckConfig::default(),
            post_queue_size: default_post_queue_size(),
            skip_errors: SkipErrors::none(),
            throttle: None,
        }
    }

    /// Server the checking connections talk to
    pub fn check_server(&self) -> &ServerConfig {
        self.check.server.as_ref().unwrap_or(&self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let config = ServerConfig::new("news.example.com", 563, true, "user", "pass");
        assert_eq!(config.host, "news.example.com");
        assert_eq!(config.port, 563);
        assert!(config.tls);
        assert!(!config.allow_insecure_tls);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password, "pass");
    }

    #[test]
    fn test_empty_username_disables_auth() {
        let config = ServerConfig::plain("localhost", "", "");
        assert_eq!(config.port, 119);
        assert!(config.username.is_none());
    }

    #[test]
    fn test_tls_insecure_helper() {
        let config = ServerConfig::tls_insecure("localhost", "user", "pass");
        assert_eq!(config.port, 563);
        assert!(config.tls);
        assert!(config.allow_insecure_tls);
    }

    #[test]
    fn test_builder_methods() {
        let config = ServerConfig::plain("localhost", "", "")
            .with_port(1119)
            .with_connections(2)
            .with_retries(0, 1, 2)
            .with_reconnect_delay(Duration::from_millis(5))
            .with_post_method(PostMethod::Ihave);
        assert_eq!(config.port, 1119);
        assert_eq!(config.connections, 2);
        assert_eq!(
            (config.connect_retries, config.request_retries, config.post_retries),
            (0, 1, 2)
        );
        assert_eq!(config.reconnect_delay, Duration::from_millis(5));
        assert_eq!(config.post_method, PostMethod::Ihave);
    }

    #[test]
    fn test_post_timeout_action_parse() {
        assert_eq!("retry".parse(), Ok(PostTimeoutAction::Retry));
        assert_eq!("ignore".parse(), Ok(PostTimeoutAction::Ignore));
        assert_eq!(
            "strip-hdr=X-Test".parse(),
            Ok(PostTimeoutAction::StripHeader("X-Test".to_string()))
        );
        assert!("strip-hdr=".parse::<PostTimeoutAction>().is_err());
        assert!("explode".parse::<PostTimeoutAction>().is_err());
        assert_eq!(
            PostTimeoutAction::StripHeader("Date".to_string()).to_string(),
            "strip-hdr=Date"
        );
    }

    #[test]
    fn test_skip_errors_parse() {
        let all: SkipErrors = "all".parse().unwrap();
        assert!(all.contains(SkippableError::CheckFail));
        assert!(all.contains(SkippableError::PostTimeout));

        let none: SkipErrors = "none".parse().unwrap();
        assert!(!none.contains(SkippableError::CheckMissing));

        let some: SkipErrors = "post-timeout, check-missing".parse().unwrap();
        assert!(some.contains(SkippableError::PostTimeout));
        assert!(some.contains(SkippableError::CheckMissing));
        assert!(!some.contains(SkippableError::PostReject));

        assert!("post-timeout,bogus".parse::<SkipErrors>().is_err());
    }

    #[test]
    fn test_check_config() {
        assert!(CheckConfig::default().enabled());
        assert!(!CheckConfig::disabled().enabled());
    }

    #[test]
    fn test_check_server_defaults_to_posting_server() {
        let mut config = UploadConfig::new(ServerConfig::plain("post.example", "", ""));
        assert_eq!(config.check_server().host, "post.example");

        config.check.server = Some(ServerConfig::plain("check.example", "", ""));
        assert_eq!(config.check_server().host, "check.example");
    }
}
