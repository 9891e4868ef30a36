use encoding_rs::Encoding;
use std::{
    fmt::{self, Debug, Formatter},
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

/// The default read/write timeout applied to accepted sockets.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);

/// The default worker cap for the thread-per-connection taskmaster.
pub const DEFAULT_MAX_THREAD_COUNT: usize = 100;

/// The default content type assumed for responses that do not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// The maximum accepted length of a request head, in bytes.
pub const DEFAULT_HEAD_MAX_LEN: usize = 8 * 1024;

/// A shared handle to a debugging stream that mirrors request and
/// response heads as they cross the wire codec.
pub type HeaderTap = Arc<Mutex<dyn Write + Send>>;

/// # Tunable parameters for a hearth server.
///
/// These replace what a dynamic-language server would keep in process
/// globals: one options value is built alongside the
/// [`Acceptor`](crate::Acceptor) and threaded through every request.
/// Construct with [`ServerOptions::default`] and adjust with the
/// `with_` builders.
#[derive(Clone)]
pub struct ServerOptions {
    pub(crate) default_content_type: String,
    pub(crate) default_charset: &'static Encoding,
    pub(crate) external_format: &'static Encoding,
    pub(crate) head_max_len: usize,
    pub(crate) tmp_dir: PathBuf,
    pub(crate) log_errors: bool,
    pub(crate) log_warnings: bool,
    pub(crate) error_log_level: log::Level,
    pub(crate) warning_log_level: log::Level,
    pub(crate) log_backtraces: bool,
    pub(crate) show_errors: bool,
    pub(crate) show_backtraces: bool,
    pub(crate) header_tap: Option<HeaderTap>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            default_content_type: DEFAULT_CONTENT_TYPE.into(),
            default_charset: encoding_rs::UTF_8,
            external_format: encoding_rs::UTF_8,
            head_max_len: DEFAULT_HEAD_MAX_LEN,
            tmp_dir: std::env::temp_dir(),
            log_errors: true,
            log_warnings: true,
            error_log_level: log::Level::Error,
            warning_log_level: log::Level::Warn,
            log_backtraces: false,
            show_errors: false,
            show_backtraces: false,
            header_tap: None,
        }
    }
}

impl ServerOptions {
    /// Construct the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The content type used when a response does not set one.
    ///
    /// **Default**: `text/html`
    #[must_use]
    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// The charset appended to `text/*` response content types and used
    /// to encode string response bodies.
    ///
    /// **Default**: UTF-8
    #[must_use]
    pub fn with_default_charset(mut self, charset: &'static Encoding) -> Self {
        self.default_charset = charset;
        self
    }

    /// The character encoding assumed for query strings and form bodies
    /// that do not declare their own charset.
    ///
    /// **Default**: UTF-8
    #[must_use]
    pub fn with_external_format(mut self, encoding: &'static Encoding) -> Self {
        self.external_format = encoding;
        self
    }

    /// The maximum length allowed for a request head.
    ///
    /// **Default**: 8kb
    #[must_use]
    pub fn with_head_max_len(mut self, head_max_len: usize) -> Self {
        self.head_max_len = head_max_len;
        self
    }

    /// The directory multipart file uploads are spooled into.
    ///
    /// **Default**: [`std::env::temp_dir`]
    #[must_use]
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    /// Whether handler errors are reported to the message logger.
    ///
    /// **Default**: `true`
    #[must_use]
    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    /// Whether warnings are reported to the message logger.
    ///
    /// **Default**: `true`
    #[must_use]
    pub fn with_log_warnings(mut self, log_warnings: bool) -> Self {
        self.log_warnings = log_warnings;
        self
    }

    /// The [`log`] level error reports are emitted at.
    ///
    /// **Default**: [`log::Level::Error`]
    #[must_use]
    pub fn with_error_log_level(mut self, level: log::Level) -> Self {
        self.error_log_level = level;
        self
    }

    /// The [`log`] level warnings are emitted at.
    ///
    /// **Default**: [`log::Level::Warn`]
    #[must_use]
    pub fn with_warning_log_level(mut self, level: log::Level) -> Self {
        self.warning_log_level = level;
        self
    }

    /// Whether a backtrace is captured and logged alongside handler
    /// errors.
    ///
    /// **Default**: `false`
    #[must_use]
    pub fn with_log_backtraces(mut self, log_backtraces: bool) -> Self {
        self.log_backtraces = log_backtraces;
        self
    }

    /// Whether the default error page includes the error message.
    ///
    /// **Default**: `false`
    #[must_use]
    pub fn with_show_errors(mut self, show_errors: bool) -> Self {
        self.show_errors = show_errors;
        self
    }

    /// Whether the default error page includes a backtrace.
    ///
    /// **Default**: `false`
    #[must_use]
    pub fn with_show_backtraces(mut self, show_backtraces: bool) -> Self {
        self.show_backtraces = show_backtraces;
        self
    }

    /// Mirror every parsed request head and emitted response head to
    /// `tap`, for debugging.
    ///
    /// **Default**: none
    #[must_use]
    pub fn with_header_tap(mut self, tap: HeaderTap) -> Self {
        self.header_tap = Some(tap);
        self
    }
}

impl Debug for ServerOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("default_content_type", &self.default_content_type)
            .field("default_charset", &self.default_charset.name())
            .field("external_format", &self.external_format.name())
            .field("head_max_len", &self.head_max_len)
            .field("tmp_dir", &self.tmp_dir)
            .field("log_errors", &self.log_errors)
            .field("log_warnings", &self.log_warnings)
            .field("error_log_level", &self.error_log_level)
            .field("warning_log_level", &self.warning_log_level)
            .field("log_backtraces", &self.log_backtraces)
            .field("show_errors", &self.show_errors)
            .field("show_backtraces", &self.show_backtraces)
            .field("header_tap", &self.header_tap.is_some())
            .finish()
    }
}
