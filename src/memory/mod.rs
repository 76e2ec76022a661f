//! Request-scoped memory: the query arena and the containers built on it

pub mod arena;
pub mod buffer;
pub mod chain;

pub use arena::{AnswerRef, ArenaConfig, ArenaStats, QueryArena, Span, MAX_FORMATTED_LEN};
pub use buffer::StrBuf;
pub use chain::{ByteChain, ChainIter};
