//! Public types consumed by the probe binary.
//!
//! The binary builds a [`ClientConfig`], receives [`Document`] handles and
//! reads [`CompletionList`]s. Wire-level serde types live in `protocol`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Where the language server listens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Endpoint {
    /// `host:port`.
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    Unix(PathBuf),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid endpoint {0:?}: expected host:port or a socket path")]
pub struct EndpointParseError(String);

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointParseError(s.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(EndpointParseError(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if s.contains('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(s.to_string()))
            }
            _ => Err(EndpointParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Tcp(String::from("localhost:3333"))
    }
}

/// Connect retry policy.
///
/// Applies to establishing the socket only; a session whose connection drops
/// is closed, never silently reconnected.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectPolicy {
    /// Total connect attempts, including the first. Values below 1 act as 1.
    pub attempts: u32,
    /// Delay between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl ConnectPolicy {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Configuration for one client session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Workspace root sent in `initialize`; relative document paths resolve
    /// against it. `None` means the current directory.
    pub workspace_root: Option<PathBuf>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub connect: ConnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            workspace_root: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect: ConnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(endpoint: Endpoint, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            endpoint,
            workspace_root: Some(workspace_root.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// A cursor position: 0-based line and 0-based UTF-16 code unit offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// Build a position from a UTF-8 byte column within `line_text`.
    ///
    /// Byte columns past the end clamp to the line length; columns inside a
    /// multi-byte character round down to its start.
    #[must_use]
    pub fn from_byte_column(line: u32, line_text: &str, byte_col: usize) -> Self {
        let mut end = byte_col.min(line_text.len());
        while !line_text.is_char_boundary(end) {
            end -= 1;
        }
        let character = line_text[..end].encode_utf16().count();
        Self {
            line,
            character: u32::try_from(character).unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for Position {
    /// 1-indexed `line:col` for humans.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.character + 1)
    }
}

/// Snapshot handle of a document registered with a session.
///
/// The session's registry holds the authoritative version; handles returned
/// by `open`/`change` reflect the version at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    path: PathBuf,
    uri: Url,
    language_id: String,
    version: i32,
}

impl Document {
    pub(crate) fn new(path: PathBuf, uri: Url, language_id: String, version: i32) -> Self {
        Self {
            path,
            uri,
            language_id,
            version,
        }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }
}

/// Kind of a completion item (LSP numeric kinds 1..=25).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionItemKind {
    Text = 1,
    Method = 2,
    Function = 3,
    Constructor = 4,
    Field = 5,
    Variable = 6,
    Class = 7,
    Interface = 8,
    Module = 9,
    Property = 10,
    Unit = 11,
    Value = 12,
    Enum = 13,
    Keyword = 14,
    Snippet = 15,
    Color = 16,
    File = 17,
    Reference = 18,
    Folder = 19,
    EnumMember = 20,
    Constant = 21,
    Struct = 22,
    Event = 23,
    Operator = 24,
    TypeParameter = 25,
}

impl CompletionItemKind {
    /// Convert from the LSP numeric kind.
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        Some(match value {
            1 => Self::Text,
            2 => Self::Method,
            3 => Self::Function,
            4 => Self::Constructor,
            5 => Self::Field,
            6 => Self::Variable,
            7 => Self::Class,
            8 => Self::Interface,
            9 => Self::Module,
            10 => Self::Property,
            11 => Self::Unit,
            12 => Self::Value,
            13 => Self::Enum,
            14 => Self::Keyword,
            15 => Self::Snippet,
            16 => Self::Color,
            17 => Self::File,
            18 => Self::Reference,
            19 => Self::Folder,
            20 => Self::EnumMember,
            21 => Self::Constant,
            22 => Self::Struct,
            23 => Self::Event,
            24 => Self::Operator,
            25 => Self::TypeParameter,
            _ => return None,
        })
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Method => "method",
            Self::Function => "function",
            Self::Constructor => "constructor",
            Self::Field => "field",
            Self::Variable => "variable",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Module => "module",
            Self::Property => "property",
            Self::Unit => "unit",
            Self::Value => "value",
            Self::Enum => "enum",
            Self::Keyword => "keyword",
            Self::Snippet => "snippet",
            Self::Color => "color",
            Self::File => "file",
            Self::Reference => "reference",
            Self::Folder => "folder",
            Self::EnumMember => "enum member",
            Self::Constant => "constant",
            Self::Struct => "struct",
            Self::Event => "event",
            Self::Operator => "operator",
            Self::TypeParameter => "type parameter",
        }
    }
}

/// A single completion suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<CompletionItemKind>,
    pub detail: Option<String>,
    /// Plain text, or the `value` of a markup content object.
    pub documentation: Option<String>,
    pub insert_text: Option<String>,
    pub sort_text: Option<String>,
    pub filter_text: Option<String>,
}

impl CompletionItem {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: None,
            detail: None,
            documentation: None,
            insert_text: None,
            sort_text: None,
            filter_text: None,
        }
    }

    /// Text to insert when accepted: `insertText`, falling back to the label.
    #[must_use]
    pub fn text_to_insert(&self) -> &str {
        self.insert_text.as_deref().unwrap_or(&self.label)
    }
}

/// Normalized completion reply.
///
/// Servers may answer with a bare item array, a `{isIncomplete, items}`
/// list, or `null`; all three arrive here in this single shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionList {
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

impl CompletionList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.label.as_str())
    }
}

/// Server identity reported by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: Option<String>,
}

/// A server-initiated notification (e.g. `window/logMessage`).
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub method: String,
    pub params: Option<serde_json::Value>,
}
