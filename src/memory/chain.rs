use crate::error::{Error, Result};
use crate::memory::arena::{QueryArena, Span};

/// Link record of a [`ByteChain`]. Lives in the arena's node slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNode {
    pub(crate) prev: u32,
    pub(crate) next: u32,
    pub(crate) data: Option<Span>,
}

/// Circular doubly-linked list of arena byte runs.
///
/// The chain is identified by its sentinel node; an empty chain has the
/// sentinel linked to itself. Nodes are appended before the sentinel, so
/// walking from `sentinel.next` yields them in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteChain {
    sentinel: u32,
}

impl ByteChain {
    pub fn new(arena: &mut QueryArena) -> Result<Self> {
        let sentinel = arena.push_chain_node(ChainNode {
            prev: 0,
            next: 0,
            data: None,
        })?;
        let node = arena.chain_node_mut(sentinel).ok_or(Error::DanglingSpan)?;
        node.prev = sentinel;
        node.next = sentinel;
        Ok(Self { sentinel })
    }

    pub fn append(&self, arena: &mut QueryArena, data: &[u8]) -> Result<()> {
        let span = arena.alloc_copy(data)?;
        let last = arena
            .chain_node(self.sentinel)
            .ok_or(Error::DanglingSpan)?
            .prev;

        let node = arena.push_chain_node(ChainNode {
            prev: last,
            next: self.sentinel,
            data: Some(span),
        })?;
        arena.chain_node_mut(last).ok_or(Error::DanglingSpan)?.next = node;
        arena
            .chain_node_mut(self.sentinel)
            .ok_or(Error::DanglingSpan)?
            .prev = node;
        Ok(())
    }

    pub fn is_empty(&self, arena: &QueryArena) -> bool {
        arena
            .chain_node(self.sentinel)
            .map_or(true, |node| node.next == self.sentinel)
    }

    pub fn iter<'a>(&self, arena: &'a QueryArena) -> ChainIter<'a> {
        let cursor = arena
            .chain_node(self.sentinel)
            .map_or(self.sentinel, |node| node.next);
        ChainIter {
            arena,
            sentinel: self.sentinel,
            cursor,
        }
    }

    pub fn len(&self, arena: &QueryArena) -> usize {
        self.iter(arena).count()
    }
}

pub struct ChainIter<'a> {
    arena: &'a QueryArena,
    sentinel: u32,
    cursor: u32,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.sentinel {
            return None;
        }
        let Some(node) = self.arena.chain_node(self.cursor) else {
            self.cursor = self.sentinel;
            return Some(Err(Error::DanglingSpan));
        };
        self.cursor = node.next;
        match node.data {
            Some(span) => Some(self.arena.bytes(span)),
            None => Some(Err(Error::DanglingSpan)),
        }
    }
}
