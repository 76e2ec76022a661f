//! Per-request query memory arena.
//!
//! The arena hands out byte spans carved from a small set of pages. Two
//! static pages are allocated once when the arena is built and survive every
//! teardown; further pages are allocated on demand and released by
//! [`QueryArena::clear`]. Nothing is ever freed individually: leftover tails
//! are kept in a best-fit free list and the whole region is recycled at once.
//!
//! Every teardown or reset bumps the arena generation. Long-lived holders of
//! spans (answer generators) remember the generation they were created in and
//! must not write once it has moved on.

use crate::ansgen::NetAnswer;
use crate::error::{Error, Result};
use crate::memory::chain::ChainNode;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use tracing::{debug, error, trace};

/// Longest text [`QueryArena::alloc_fmt`] will keep.
pub const MAX_FORMATTED_LEN: usize = 4999;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArenaConfig {
    pub page_size: usize,
    pub static_pages: usize,
    pub max_mem: usize,
    pub max_pages: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            page_size: 1 << 22,
            static_pages: 2,
            max_mem: 1 << 27,
            max_pages: 1000,
        }
    }
}

impl ArenaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("arena page_size must be non-zero".into()));
        }
        if self.static_pages > self.max_pages {
            return Err(Error::Config(format!(
                "arena static_pages ({}) exceeds max_pages ({})",
                self.static_pages, self.max_pages
            )));
        }
        if self.static_pages.saturating_mul(self.page_size) > self.max_mem {
            return Err(Error::Config(format!(
                "arena static pages need {} bytes but max_mem is {}",
                self.static_pages.saturating_mul(self.page_size),
                self.max_mem
            )));
        }
        Ok(())
    }
}

/// A run of arena bytes. Only meaningful within the generation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    page: u32,
    offset: usize,
    len: usize,
}

impl Span {
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Sub-span starting `start` bytes in. Saturates at the end of `self`.
    pub fn slice(&self, start: usize, len: usize) -> Span {
        let start = start.min(self.len);
        Span {
            page: self.page,
            offset: self.offset + start,
            len: len.min(self.len - start),
        }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.page == other.page
            && !self.is_empty()
            && !other.is_empty()
            && self.offset < other.end()
            && other.offset < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArenaState {
    Empty,
    Inited,
}

impl ArenaState {
    fn name(self) -> &'static str {
        match self {
            ArenaState::Empty => "empty",
            ArenaState::Inited => "inited",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FreeStart {
    page: u32,
    offset: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArenaStats {
    pub reserved_bytes: usize,
    pub used_bytes: usize,
    pub pages: usize,
    pub dynamic_pages: usize,
    pub free_spans: usize,
    pub answers: usize,
    pub chain_nodes: usize,
    pub generation: u64,
}

/// Index of an answer record held by the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnswerRef(u32);

impl AnswerRef {
    pub fn index(&self) -> u32 {
        self.0
    }
}

pub struct QueryArena {
    config: ArenaConfig,
    pages: Vec<Box<[u8]>>,
    free: BTreeMap<usize, SmallVec<[FreeStart; 4]>>,
    free_spans: usize,
    reserved: usize,
    used: usize,
    state: ArenaState,
    generation: u64,
    answers: Vec<NetAnswer>,
    chain_nodes: Vec<ChainNode>,
}

impl fmt::Debug for QueryArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryArena")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("pages", &self.pages.len())
            .field("reserved", &self.reserved)
            .field("used", &self.used)
            .field("generation", &self.generation)
            .finish()
    }
}

impl QueryArena {
    /// Builds the arena and allocates its static pages. The arena starts empty.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        let pages = (0..config.static_pages)
            .map(|_| vec![0u8; config.page_size].into_boxed_slice())
            .collect();
        Ok(Self {
            config,
            pages,
            free: BTreeMap::new(),
            free_spans: 0,
            reserved: 0,
            used: 0,
            state: ArenaState::Empty,
            generation: 0,
            answers: Vec::new(),
            chain_nodes: Vec::new(),
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_inited(&self) -> bool {
        self.state == ArenaState::Inited
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn init(&mut self) -> Result<()> {
        self.expect_state(ArenaState::Empty)?;
        debug_assert!(self.free.is_empty());

        self.free.clear();
        self.free_spans = 0;
        self.reserved = 0;
        for page in 0..self.config.static_pages {
            self.reserved += self.config.page_size;
            self.register(page as u32, 0, self.config.page_size);
        }
        self.state = ArenaState::Inited;
        trace!(generation = self.generation, "query arena inited");
        Ok(())
    }

    /// Reserves `n` bytes from the smallest free span that fits.
    pub fn alloc(&mut self, n: usize) -> Result<Span> {
        self.expect_state(ArenaState::Inited)?;

        let Some((start, size)) = self.take_best_fit(n) else {
            let span = self.alloc_page(n, n)?;
            self.used += n;
            return Ok(span);
        };

        self.used += n;
        if size > n {
            self.register(start.page, start.offset + n, size - n);
        }
        Ok(Span {
            page: start.page,
            offset: start.offset,
            len: n,
        })
    }

    pub fn alloc_zeroed(&mut self, n: usize) -> Result<Span> {
        let span = self.alloc(n)?;
        self.bytes_mut(span)?.fill(0);
        Ok(span)
    }

    /// Returns the span [`alloc`](Self::alloc) would hand out without consuming it.
    ///
    /// The span stays on the free list, so it may be given to the next
    /// allocation. Treat it as scratch space for a headroom check only.
    pub fn peek(&mut self, n: usize) -> Result<Span> {
        self.expect_state(ArenaState::Inited)?;

        if let Some((_, starts)) = self.free.range(n..).next() {
            if let Some(start) = starts.last() {
                return Ok(Span {
                    page: start.page,
                    offset: start.offset,
                    len: n,
                });
            }
        }
        self.alloc_page(n, 0)
    }

    /// Copies `data` into fresh arena bytes.
    pub fn alloc_copy(&mut self, data: &[u8]) -> Result<Span> {
        let span = self.alloc(data.len())?;
        self.bytes_mut(span)?.copy_from_slice(data);
        Ok(span)
    }

    /// Formats into a NUL-terminated arena string, truncated to
    /// [`MAX_FORMATTED_LEN`] bytes. The returned span excludes the NUL.
    pub fn alloc_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<Span> {
        let mut scratch = [0u8; MAX_FORMATTED_LEN];
        let mut cursor = std::io::Cursor::new(&mut scratch[..]);
        // A full cursor means the text is truncated, which is intended.
        let _ = cursor.write_fmt(args);
        let len = cursor.position() as usize;

        let span = self.alloc(len + 1)?;
        let bytes = self.bytes_mut(span)?;
        bytes[..len].copy_from_slice(&scratch[..len]);
        bytes[len] = 0;
        Ok(span.slice(0, len))
    }

    /// Reclaims the free list when more than half of the reserved bytes are in
    /// use. Pages are kept. Always starts a new generation.
    pub fn reset_if_mostly_used(&mut self) {
        if self.used + self.used > self.reserved {
            self.free.clear();
            self.free_spans = 0;
            self.used = 0;
            self.answers.clear();
            self.chain_nodes.clear();
            for page in 0..self.pages.len() {
                let size = self.pages[page].len();
                self.register(page as u32, 0, size);
            }
            debug!(
                pages = self.pages.len(),
                reserved = self.reserved,
                "query arena free list rebuilt"
            );
        }
        self.generation += 1;
    }

    /// Releases every dynamic page and returns the arena to the empty state.
    pub fn clear(&mut self) -> Result<()> {
        self.expect_state(ArenaState::Inited)?;

        let dynamic = self.pages.len() - self.config.static_pages;
        self.free.clear();
        self.free_spans = 0;
        self.used = 0;
        self.answers.clear();
        self.chain_nodes.clear();
        self.pages.truncate(self.config.static_pages);
        self.reserved = 0;
        self.state = ArenaState::Empty;
        self.generation += 1;

        debug!(
            released_pages = dynamic,
            generation = self.generation,
            "query arena cleared"
        );
        Ok(())
    }

    pub fn bytes(&self, span: Span) -> Result<&[u8]> {
        self.pages
            .get(span.page as usize)
            .and_then(|page| page.get(span.offset..span.end()))
            .ok_or(Error::DanglingSpan)
    }

    pub fn bytes_mut(&mut self, span: Span) -> Result<&mut [u8]> {
        self.pages
            .get_mut(span.page as usize)
            .and_then(|page| page.get_mut(span.offset..span.end()))
            .ok_or(Error::DanglingSpan)
    }

    pub fn write(&mut self, span: Span, data: &[u8]) -> Result<()> {
        let dst = self.bytes_mut(span.slice(0, data.len()))?;
        if dst.len() != data.len() {
            return Err(Error::DanglingSpan);
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Copies the bytes of `src` to the start of `dst`.
    pub fn copy(&mut self, src: Span, dst: Span) -> Result<()> {
        if dst.len < src.len {
            return Err(Error::DanglingSpan);
        }
        self.bytes(src)?;
        self.bytes(dst)?;

        if src.page == dst.page {
            let page = &mut self.pages[src.page as usize];
            page.copy_within(src.offset..src.end(), dst.offset);
            return Ok(());
        }

        let (lo, hi) = if src.page < dst.page {
            (src.page as usize, dst.page as usize)
        } else {
            (dst.page as usize, src.page as usize)
        };
        let (head, tail) = self.pages.split_at_mut(hi);
        let (src_page, dst_page) = if src.page < dst.page {
            (&head[lo], &mut tail[0])
        } else {
            (&tail[0], &mut head[lo])
        };
        dst_page[dst.offset..dst.offset + src.len].copy_from_slice(&src_page[src.offset..src.end()]);
        Ok(())
    }

    /// Adds an empty answer record. Its footprint is carved from page
    /// memory, so records are bound by the same ceiling as byte spans.
    pub fn alloc_answer(&mut self) -> Result<AnswerRef> {
        self.charge_record(std::mem::size_of::<NetAnswer>())?;
        let index = self.answers.len();
        self.answers.push(NetAnswer::default());
        Ok(AnswerRef(index as u32))
    }

    pub fn answer(&self, answer: AnswerRef) -> Option<&NetAnswer> {
        self.answers.get(answer.0 as usize)
    }

    pub fn answer_mut(&mut self, answer: AnswerRef) -> Option<&mut NetAnswer> {
        self.answers.get_mut(answer.0 as usize)
    }

    pub(crate) fn push_chain_node(&mut self, node: ChainNode) -> Result<u32> {
        self.charge_record(std::mem::size_of::<ChainNode>())?;
        let index = self.chain_nodes.len();
        self.chain_nodes.push(node);
        Ok(index as u32)
    }

    pub(crate) fn chain_node(&self, index: u32) -> Option<&ChainNode> {
        self.chain_nodes.get(index as usize)
    }

    pub(crate) fn chain_node_mut(&mut self, index: u32) -> Option<&mut ChainNode> {
        self.chain_nodes.get_mut(index as usize)
    }

    /// Sizes of the spans currently on the free list, ascending.
    pub fn free_span_sizes(&self) -> Vec<usize> {
        self.free
            .iter()
            .flat_map(|(size, starts)| std::iter::repeat(*size).take(starts.len()))
            .collect()
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            reserved_bytes: self.reserved,
            used_bytes: self.used,
            pages: self.pages.len(),
            dynamic_pages: self.pages.len() - self.config.static_pages,
            free_spans: self.free_spans,
            answers: self.answers.len(),
            chain_nodes: self.chain_nodes.len(),
            generation: self.generation,
        }
    }

    fn expect_state(&self, expected: ArenaState) -> Result<()> {
        if self.state != expected {
            return Err(Error::ArenaState {
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        Ok(())
    }

    /// Reserves page bytes standing in for a slab record.
    fn charge_record(&mut self, size: usize) -> Result<()> {
        self.alloc(size).map(|_| ())
    }

    fn register(&mut self, page: u32, offset: usize, size: usize) {
        self.free
            .entry(size)
            .or_default()
            .push(FreeStart { page, offset });
        self.free_spans += 1;
    }

    fn take_best_fit(&mut self, n: usize) -> Option<(FreeStart, usize)> {
        let size = *self.free.range(n..).next()?.0;
        let starts = self.free.get_mut(&size)?;
        let start = starts.pop()?;
        if starts.is_empty() {
            self.free.remove(&size);
        }
        self.free_spans -= 1;
        Some((start, size))
    }

    /// Adds a page of at least `n` bytes, keeping `used` bytes from its start
    /// and registering the rest as free.
    fn alloc_page(&mut self, n: usize, used: usize) -> Result<Span> {
        let size = n.max(self.config.page_size);

        if self.pages.len() >= self.config.max_pages {
            error!(pages = self.pages.len(), "query arena page limit reached");
            return Err(Error::PageLimit {
                pages: self.pages.len(),
            });
        }
        if size > self.config.max_mem || size + self.reserved > self.config.max_mem {
            error!(
                requested = n,
                reserved = self.reserved,
                limit = self.config.max_mem,
                "query arena exhausted"
            );
            return Err(Error::ArenaExhausted {
                requested: n,
                reserved: self.reserved,
                limit: self.config.max_mem,
            });
        }

        let page = self.pages.len() as u32;
        self.pages.push(vec![0u8; size].into_boxed_slice());
        self.reserved += size;
        if used < size {
            self.register(page, used, size - used);
        }
        debug!(page, size, reserved = self.reserved, "query arena page allocated");

        Ok(Span {
            page,
            offset: 0,
            len: n,
        })
    }
}
