use crate::error::{Error, Result};

/// Handle to one reservation in a [`RingQueue`]. It goes stale once the
/// record is popped, undone or cleared, even if the position is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSlot {
    index: usize,
    seq: u64,
}

impl RingSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

const VACANT_SEQ: u64 = 0;

/// Fixed-capacity FIFO of records populated in place.
///
/// Storage is reserved up front and never grows past `capacity`. A caller
/// reserves a record with [`create`](Self::create), fills it, and may back
/// out of the most recent reservation with [`undo_create`](Self::undo_create).
#[derive(Debug)]
pub struct RingQueue<T> {
    items: Vec<T>,
    /// Reservation number held by each position, `VACANT_SEQ` when not queued.
    seqs: Vec<u64>,
    next_seq: u64,
    capacity: usize,
    begin: usize,
    end: usize,
    count: usize,
}

impl<T: Default> RingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            seqs: Vec::with_capacity(capacity),
            next_seq: VACANT_SEQ + 1,
            capacity,
            begin: 0,
            end: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Reserves the next record, reset to its default value. `None` when full.
    pub fn create(&mut self) -> Option<(RingSlot, &mut T)> {
        if self.is_full() {
            return None;
        }
        let index = self.end;
        let seq = self.next_seq;
        self.next_seq += 1;
        if index == self.items.len() {
            self.items.push(T::default());
            self.seqs.push(seq);
        } else {
            self.items[index] = T::default();
            self.seqs[index] = seq;
        }
        self.end = (self.end + 1) % self.capacity;
        self.count += 1;
        Some((RingSlot { index, seq }, &mut self.items[index]))
    }

    /// Releases `slot`, which must be the most recent reservation.
    pub fn undo_create(&mut self, slot: RingSlot) -> Result<()> {
        if self.count == 0 {
            return Err(Error::UndoOrder);
        }
        let last = if self.end == 0 {
            self.capacity - 1
        } else {
            self.end - 1
        };
        if slot.index != last || !self.is_live(slot) {
            return Err(Error::UndoOrder);
        }
        self.items[last] = T::default();
        self.seqs[last] = VACANT_SEQ;
        self.end = last;
        self.count -= 1;
        Ok(())
    }

    /// The record behind `slot`, or `None` once it has left the queue.
    pub fn get_mut(&mut self, slot: RingSlot) -> Option<&mut T> {
        if !self.is_live(slot) {
            return None;
        }
        self.items.get_mut(slot.index)
    }

    fn is_live(&self, slot: RingSlot) -> bool {
        slot.seq != VACANT_SEQ && self.seqs.get(slot.index) == Some(&slot.seq)
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = std::mem::take(&mut self.items[self.begin]);
        self.seqs[self.begin] = VACANT_SEQ;
        self.begin = (self.begin + 1) % self.capacity;
        self.count -= 1;
        Some(item)
    }

    /// Drops every queued record.
    pub fn clear(&mut self) {
        self.items.clear();
        self.seqs.clear();
        self.begin = 0;
        self.end = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_with_wraparound() {
        let mut queue: RingQueue<u32> = RingQueue::new(3);
        for v in 1..=3 {
            *queue.create().unwrap().1 = v;
        }
        assert_eq!(queue.pop(), Some(1));
        *queue.create().unwrap().1 = 4;
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(4));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_full_queue_refuses() {
        let mut queue: RingQueue<u8> = RingQueue::new(2);
        assert!(queue.create().is_some());
        assert!(queue.create().is_some());
        assert!(queue.create().is_none());
    }

    #[test]
    fn test_undo_frees_exactly_one() {
        let mut queue: RingQueue<u8> = RingQueue::new(2);
        let (first, _) = queue.create().unwrap();
        let (second, _) = queue.create().unwrap();

        assert!(matches!(queue.undo_create(first), Err(Error::UndoOrder)));
        queue.undo_create(second).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.create().is_some());
        assert!(queue.create().is_none());
    }

    #[test]
    fn test_undo_at_wrap_point() {
        let mut queue: RingQueue<u8> = RingQueue::new(2);
        queue.create().unwrap();
        queue.create().unwrap();
        queue.pop().unwrap();
        let (slot, value) = queue.create().unwrap();
        *value = 9;
        assert_eq!(slot.index(), 0);
        queue.undo_create(slot).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_stale_slot_is_rejected() {
        let mut queue: RingQueue<u32> = RingQueue::new(2);
        let (first, value) = queue.create().unwrap();
        *value = 1;
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.get_mut(first).is_none());

        queue.create().unwrap();
        let (reused, value) = queue.create().unwrap();
        *value = 7;
        assert_eq!(reused.index(), first.index());
        assert!(queue.get_mut(first).is_none());
        assert!(matches!(queue.undo_create(first), Err(Error::UndoOrder)));
        assert_eq!(queue.get_mut(reused).copied(), Some(7));
    }

    #[test]
    fn test_undone_and_cleared_slots_go_stale() {
        let mut queue: RingQueue<u32> = RingQueue::new(2);
        let (undone, _) = queue.create().unwrap();
        queue.undo_create(undone).unwrap();
        let (current, _) = queue.create().unwrap();
        assert_eq!(current.index(), undone.index());
        assert!(queue.get_mut(undone).is_none());
        assert!(queue.get_mut(current).is_some());

        queue.clear();
        assert!(queue.get_mut(current).is_none());
    }

    #[test]
    fn test_zero_capacity() {
        let mut queue: RingQueue<u8> = RingQueue::new(0);
        assert!(queue.create().is_none());
        assert!(queue.pop().is_none());
    }
}
