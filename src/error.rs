use crate::net::SlotId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arena exhausted: requested {requested} bytes with {reserved} of {limit} reserved")]
    ArenaExhausted {
        requested: usize,
        reserved: usize,
        limit: usize,
    },

    #[error("Arena page limit reached ({pages} pages)")]
    PageLimit { pages: usize },

    #[error("Arena state error: expected {expected}, found {found}")]
    ArenaState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Span does not belong to the current arena pages")]
    DanglingSpan,

    #[error("Invalid state transition: {0}")]
    InvalidTransition(&'static str),

    #[error("Invalid slot id {0}")]
    InvalidSlot(SlotId),

    #[error("Slot id space exhausted")]
    SlotsExhausted,

    #[error("Queue full: {0}")]
    QueueFull(&'static str),

    #[error("Only the most recent reservation can be undone")]
    UndoOrder,

    #[error("Memory allocation error: {0}")]
    Memory(String),

    #[error("No request is running")]
    NotRunning,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Net query failed: {message}")]
    NetQuery {
        message: String,
        description: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Json(_) => -2,
            Error::ArenaExhausted { .. } => -3,
            Error::PageLimit { .. } => -4,
            Error::ArenaState { .. } => -5,
            Error::DanglingSpan => -6,
            Error::InvalidTransition(_) => -7,
            Error::InvalidSlot(_) => -8,
            Error::SlotsExhausted => -9,
            Error::QueueFull(_) => -10,
            Error::UndoOrder => -11,
            Error::Memory(_) => -12,
            Error::NotRunning => -13,
            Error::Protocol(_) => -14,
            Error::NetQuery { .. } => -15,
            Error::Config(_) => -16,
        }
    }

    /// Errors that abort the current request rather than surfacing to the handler.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ArenaExhausted { .. } | Error::PageLimit { .. } | Error::ArenaState { .. }
        )
    }
}
