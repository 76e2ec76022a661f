use crate::error::{Error, Result};
use crate::net::queue::{RingQueue, RingSlot};
use crate::net::slots::{SlotId, SlotSpace};
use bytes::Bytes;
use tracing::{trace, warn};

/// Largest RPC answer payload accepted from the network side.
pub const DEFAULT_MAX_RPC_ANSWER_LEN: usize = (1 << 30) - 13;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NetEventKind {
    #[default]
    Vacant,
    RpcAnswer {
        result: Vec<u8>,
    },
    RpcError {
        code: i32,
        message: &'static str,
    },
}

/// Completion of an asynchronous RPC round-trip, addressed by slot id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetEvent {
    pub slot_id: SlotId,
    pub kind: NetEventKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetQueryKind {
    #[default]
    Vacant,
    RpcSend,
}

/// Outbound request waiting for the network side to pick it up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetQuery {
    pub kind: NetQueryKind,
    pub host_num: i32,
    pub request: Bytes,
    pub timeout_ms: i32,
    pub slot_id: SlotId,
}

/// Hand-off point between the request handler and the network side: the
/// slot id space plus the net event and net query queues.
#[derive(Debug)]
pub struct NetExchange {
    slots: SlotSpace,
    events: RingQueue<NetEvent>,
    queries: RingQueue<NetQuery>,
    max_answer_len: usize,
    freed_queries: u64,
}

impl NetExchange {
    pub fn new(
        slots: SlotSpace,
        event_capacity: usize,
        query_capacity: usize,
        max_answer_len: usize,
    ) -> Self {
        Self {
            slots,
            events: RingQueue::new(event_capacity),
            queries: RingQueue::new(query_capacity),
            max_answer_len,
            freed_queries: 0,
        }
    }

    pub fn slots(&self) -> &SlotSpace {
        &self.slots
    }

    pub fn create_slot(&mut self) -> Result<SlotId> {
        self.slots.create().ok_or(Error::SlotsExhausted)
    }

    pub fn is_valid_slot(&self, slot_id: SlotId) -> bool {
        self.slots.is_valid(slot_id)
    }

    /// Reserves an event addressed to `slot_id`. Events for slots that are no
    /// longer valid are refused.
    pub fn alloc_net_event(&mut self, slot_id: SlotId, kind: NetEventKind) -> Result<RingSlot> {
        if !self.slots.is_valid(slot_id) {
            trace!(slot_id, "net event for unknown slot");
            return Err(Error::InvalidSlot(slot_id));
        }
        let Some((slot, event)) = self.events.create() else {
            warn!(capacity = self.events.capacity(), "net event queue full");
            return Err(Error::QueueFull("net events"));
        };
        event.slot_id = slot_id;
        event.kind = kind;
        Ok(slot)
    }

    pub fn unalloc_net_event(&mut self, slot: RingSlot) -> Result<()> {
        self.events.undo_create(slot)
    }

    pub fn net_event_mut(&mut self, slot: RingSlot) -> Option<&mut NetEvent> {
        self.events.get_mut(slot)
    }

    /// `message` must be static text; the event outlives the caller's buffers.
    pub fn create_rpc_error_event(
        &mut self,
        slot_id: SlotId,
        code: i32,
        message: &'static str,
    ) -> Result<RingSlot> {
        self.alloc_net_event(slot_id, NetEventKind::RpcError { code, message })
    }

    /// Reserves an answer event with a zero-filled payload of `len` bytes for
    /// the caller to read into. The reservation is released if the payload
    /// cannot be allocated.
    pub fn create_rpc_answer_event(&mut self, slot_id: SlotId, len: usize) -> Result<&mut NetEvent> {
        let slot = self.alloc_net_event(slot_id, NetEventKind::Vacant)?;
        let result = match self.answer_buffer(len) {
            Ok(result) => result,
            Err(e) => {
                self.events.undo_create(slot)?;
                return Err(e);
            }
        };
        let event = self
            .events
            .get_mut(slot)
            .ok_or_else(|| Error::Memory("net event slot vanished".into()))?;
        event.kind = NetEventKind::RpcAnswer { result };
        Ok(event)
    }

    pub fn pop_net_event(&mut self) -> Option<NetEvent> {
        self.events.pop()
    }

    pub fn net_events_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn create_net_query(&mut self, kind: NetQueryKind) -> Result<RingSlot> {
        let Some((slot, query)) = self.queries.create() else {
            warn!(capacity = self.queries.capacity(), "net query queue full");
            return Err(Error::QueueFull("net queries"));
        };
        query.kind = kind;
        Ok(slot)
    }

    pub fn net_query_mut(&mut self, slot: RingSlot) -> Option<&mut NetQuery> {
        self.queries.get_mut(slot)
    }

    pub fn unalloc_net_query(&mut self, slot: RingSlot) -> Result<()> {
        self.queries.undo_create(slot)
    }

    pub fn pop_net_query(&mut self) -> Option<NetQuery> {
        self.queries.pop()
    }

    pub fn pending_queries(&self) -> usize {
        self.queries.len()
    }

    /// Releases the request bytes of a query taken with [`pop_net_query`](Self::pop_net_query).
    pub fn free_net_query(&mut self, query: NetQuery) {
        trace!(
            slot_id = query.slot_id,
            len = query.request.len(),
            "net query released"
        );
        drop(query);
        self.freed_queries += 1;
    }

    pub fn freed_queries(&self) -> u64 {
        self.freed_queries
    }

    /// Invalidates every issued slot and drops both queues.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.events.clear();
        self.queries.clear();
    }

    fn answer_buffer(&self, len: usize) -> Result<Vec<u8>> {
        if len > self.max_answer_len {
            return Err(Error::Memory(format!(
                "rpc answer of {} bytes exceeds limit of {}",
                len, self.max_answer_len
            )));
        }
        let mut result = Vec::new();
        result
            .try_reserve_exact(len)
            .map_err(|e| Error::Memory(e.to_string()))?;
        result.resize(len, 0);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> NetExchange {
        NetExchange::new(SlotSpace::with_seed(1_000, 11), 4, 4, 64)
    }

    #[test]
    fn test_answer_event_round_trip() {
        let mut ex = exchange();
        let slot_id = ex.create_slot().unwrap();
        let event = ex.create_rpc_answer_event(slot_id, 3).unwrap();
        if let NetEventKind::RpcAnswer { result } = &mut event.kind {
            assert_eq!(result.as_slice(), &[0u8, 0, 0]);
            result.copy_from_slice(b"abc");
        }

        assert!(!ex.net_events_empty());
        let popped = ex.pop_net_event().unwrap();
        assert_eq!(popped.slot_id, slot_id);
        assert_eq!(
            popped.kind,
            NetEventKind::RpcAnswer {
                result: b"abc".to_vec()
            }
        );
        assert!(ex.net_events_empty());
    }

    #[test]
    fn test_event_for_unknown_slot_is_refused() {
        let mut ex = exchange();
        let slot_id = ex.create_slot().unwrap();
        assert!(matches!(
            ex.create_rpc_error_event(slot_id + 1, -3, "refused"),
            Err(Error::InvalidSlot(_))
        ));
        assert!(ex.net_events_empty());
    }

    #[test]
    fn test_oversized_answer_undoes_reservation() {
        let mut ex = exchange();
        let slot_id = ex.create_slot().unwrap();
        assert!(matches!(
            ex.create_rpc_answer_event(slot_id, 65),
            Err(Error::Memory(_))
        ));
        assert!(ex.net_events_empty());
    }

    #[test]
    fn test_event_queue_full() {
        let mut ex = exchange();
        let slot_id = ex.create_slot().unwrap();
        for _ in 0..4 {
            ex.create_rpc_error_event(slot_id, -1, "x").unwrap();
        }
        assert!(matches!(
            ex.create_rpc_error_event(slot_id, -1, "x"),
            Err(Error::QueueFull("net events"))
        ));
    }

    #[test]
    fn test_query_lifecycle() {
        let mut ex = exchange();
        let slot = ex.create_net_query(NetQueryKind::RpcSend).unwrap();
        let query = ex.net_query_mut(slot).unwrap();
        query.request = Bytes::from_static(b"ping");
        query.host_num = 2;

        let query = ex.pop_net_query().unwrap();
        assert_eq!(query.kind, NetQueryKind::RpcSend);
        assert_eq!(&query.request[..], b"ping");
        ex.free_net_query(query);
        assert_eq!(ex.freed_queries(), 1);
        assert!(ex.pop_net_query().is_none());
    }

    #[test]
    fn test_clear_invalidates_slots_and_queues() {
        let mut ex = exchange();
        let slot_id = ex.create_slot().unwrap();
        ex.create_rpc_error_event(slot_id, -1, "x").unwrap();
        ex.create_net_query(NetQueryKind::RpcSend).unwrap();

        ex.clear();
        assert!(!ex.is_valid_slot(slot_id));
        assert!(ex.net_events_empty());
        assert_eq!(ex.pending_queries(), 0);
    }
}
