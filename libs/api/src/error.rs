// ════════════════════════════════════════════════════════════════
//  Store Error
// ════════════════════════════════════════════════════════════════

/// Category of a store error. Allows parents and the category worker
/// to make intelligent decisions about error handling (retry, buffer,
/// fail fast).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration — permanent, fail at startup.
    Config,
    /// Local I/O error — transient, batch stays with the caller.
    Io,
    /// Remote protocol error (malformed reply, transport failure).
    Protocol,
    /// Remote explicitly asked to back off. Transient by definition.
    TryLater,
    /// Operation on a closed node.
    Closed,
    /// Internal invariant violation — the node should be closed.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Protocol => f.write_str("protocol"),
            ErrorKind::TryLater => f.write_str("try_later"),
            ErrorKind::Closed => f.write_str("closed"),
            ErrorKind::Internal => f.write_str("internal"),
        }
    }
}

/// Unified error type for all store operations.
///
/// Несёт `ErrorKind` для категоризации и человекочитаемое сообщение.
/// Ошибка `handle_messages` — это сигнал retry, а не фатальный сбой:
/// batch остаётся у вызывающего, родитель решает что делать по своему
/// правилу композиции.
#[derive(Clone)]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
}

impl StoreError {
    /// Configuration error — permanent, fail at startup.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    /// Local I/O error — transient, may retry.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    /// Remote protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Protocol, message: msg.into() }
    }

    /// Remote asked to back off.
    pub fn try_later(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::TryLater, message: msg.into() }
    }

    /// Operation attempted on a closed node.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    /// Internal invariant violation.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Internal, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Транзиентная ли ошибка (имеет смысл повторять/буферизовать).
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Io | ErrorKind::Protocol | ErrorKind::TryLater | ErrorKind::Closed
        )
    }
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self { kind: ErrorKind::Io, message: e.to_string() }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self { kind: ErrorKind::Protocol, message: e.to_string() }
    }
}
