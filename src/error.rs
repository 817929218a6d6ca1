use thiserror::Error;

/// How a caller should treat a failed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Template or data problem; the fill is aborted but the environment is sound.
    Recoverable,
    /// Invariant violation: the template or environment cannot produce a layout.
    Fatal,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum FillError {
    #[error("evaluation of expression {expression} failed: {message}")]
    Evaluation { expression: u32, message: String },

    #[error("component `{node}` failed: {message}")]
    Component { node: String, message: String },

    #[error("missing template part: {0}")]
    MissingTemplate(String),

    #[error("malformed virtualization stream {stream} at byte {position}: {message}")]
    MalformedStream {
        stream: u64,
        position: usize,
        message: String,
    },

    #[error("corrupt reference to object {index} of type {tag:#04x} in stream {stream} at byte {position}")]
    CorruptReference {
        stream: u64,
        tag: u8,
        index: u32,
        position: usize,
    },

    #[error("reference {tag:#04x}:{index} was written by stream {origin}, not stream {stream}")]
    ForeignReference {
        stream: u64,
        origin: u64,
        tag: u8,
        index: u32,
    },

    #[error(
        "list `{node}` cannot fit a row: overflowed at column {column} on page {page}, no progress since page {since}"
    )]
    RowOverflow {
        node: String,
        page: usize,
        since: usize,
        column: usize,
    },

    #[error("band `{band}` cannot fit on any page (page {page})")]
    UnplaceableBand { band: String, page: usize },

    #[error("distinct objects resolved to the same rank {0}")]
    RankCollision(i64),

    #[error("rank counter overflow")]
    RankOverflow,

    #[error("delayed value for element {element} on page {page} was already resolved")]
    DelayedAlreadyResolved { page: usize, element: u64 },

    #[error("delayed element {element} not found on page {page}")]
    DelayedElementMissing { page: usize, element: u64 },

    #[error("fill cancelled on page {page}")]
    Cancelled { page: usize },

    #[error("virtualization store already disposed")]
    StoreDisposed,

    #[error("unknown store handle {0}")]
    UnknownHandle(u64),

    #[error("page {index} out of range ({count} pages)")]
    PageOutOfRange { index: usize, count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FillError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FillError::Evaluation { .. }
            | FillError::Component { .. }
            | FillError::MissingTemplate(_)
            | FillError::MalformedStream { .. }
            | FillError::InvalidConfiguration(_)
            | FillError::Font(_)
            | FillError::Io(_) => ErrorClass::Recoverable,
            FillError::Cancelled { .. } => ErrorClass::Cancelled,
            FillError::CorruptReference { .. }
            | FillError::ForeignReference { .. }
            | FillError::RowOverflow { .. }
            | FillError::UnplaceableBand { .. }
            | FillError::RankCollision(_)
            | FillError::RankOverflow
            | FillError::DelayedAlreadyResolved { .. }
            | FillError::DelayedElementMissing { .. }
            | FillError::StoreDisposed
            | FillError::UnknownHandle(_)
            | FillError::PageOutOfRange { .. } => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub(crate) fn evaluation(expression: u32, message: impl Into<String>) -> Self {
        FillError::Evaluation {
            expression,
            message: message.into(),
        }
    }

    pub(crate) fn component(node: impl Into<String>, message: impl Into<String>) -> Self {
        FillError::Component {
            node: node.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_split_recoverable_from_fatal() {
        assert_eq!(
            FillError::evaluation(3, "boom").class(),
            ErrorClass::Recoverable
        );
        assert!(
            FillError::RowOverflow {
                node: "list".into(),
                page: 3,
                since: 1,
                column: 0
            }
            .is_fatal()
        );
        assert_eq!(
            FillError::Cancelled { page: 2 }.class(),
            ErrorClass::Cancelled
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = FillError::MalformedStream {
            stream: 7,
            position: 42,
            message: "digest mismatch".into(),
        };
        let text = err.to_string();
        assert!(text.contains("stream 7"));
        assert!(text.contains("byte 42"));
    }
}
