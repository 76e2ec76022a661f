//! Slot ids and the fixed-capacity queues shared with the network side

pub mod exchange;
pub mod queue;
pub mod slots;

pub use exchange::{
    NetEvent, NetEventKind, NetExchange, NetQuery, NetQueryKind, DEFAULT_MAX_RPC_ANSWER_LEN,
};
pub use queue::{RingQueue, RingSlot};
pub use slots::{SlotId, SlotSpace, DEFAULT_SLOT_CEILING};
