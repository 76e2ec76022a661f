use crate::ansgen::{AnswerGen, NetAnsGen};
use crate::error::Result;
use crate::memory::{QueryArena, StrBuf};
use tracing::debug;

pub const END_REPLY: &[u8] = b"END\r\n";
pub const STORED_REPLY: &[u8] = b"STORED\r\n";
pub const NOT_STORED_REPLY: &[u8] = b"NOT_STORED\r\n";

/// Query type hint announcing a `version` request.
pub const MC_QUERY_TYPE_VERSION: i32 = 1;

/// Which memcached command the reply belongs to. Decided by the first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McPhase {
    Any,
    Get,
    Store,
    Version,
    Other,
}

/// Decoded memcached reply event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McEvent<'a> {
    Value(&'a [u8]),
    End,
    Stored(bool),
    Version(&'a [u8]),
    Other(&'a [u8]),
    QueryType(i32),
}

#[derive(Debug)]
pub struct McAnswerGen {
    base: NetAnsGen,
    phase: McPhase,
    buf: StrBuf,
}

impl AnswerGen for McAnswerGen {
    fn base(&self) -> &NetAnsGen {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NetAnsGen {
        &mut self.base
    }
}

impl McAnswerGen {
    pub fn new(arena: &mut QueryArena) -> Result<Self> {
        Ok(Self {
            base: NetAnsGen::new(arena)?,
            phase: McPhase::Any,
            buf: StrBuf::new(),
        })
    }

    pub fn phase(&self) -> McPhase {
        self.phase
    }

    pub fn feed(&mut self, arena: &mut QueryArena, event: McEvent<'_>) -> Result<()> {
        match event {
            McEvent::Value(data) => self.value(arena, data),
            McEvent::End => self.end(arena),
            McEvent::Stored(stored) => self.stored(arena, stored),
            McEvent::Version(data) => self.version(arena, data),
            McEvent::Other(data) => self.other(arena, data),
            McEvent::QueryType(query_type) => {
                self.set_query_type(arena, query_type);
                Ok(())
            }
        }
    }

    /// One `VALUE` block of a get reply.
    pub fn value(&mut self, arena: &mut QueryArena, data: &[u8]) -> Result<()> {
        if !self.base.accepts_event("value") {
            return Ok(());
        }
        if !self.commit(arena, McPhase::Get, "Unexpected VALUE") {
            return Ok(());
        }
        if self.base.is_alive(arena) {
            self.buf.append(arena, data)?;
        }
        Ok(())
    }

    pub fn end(&mut self, arena: &mut QueryArena) -> Result<()> {
        if !self.base.accepts_event("end") {
            return Ok(());
        }
        if !self.commit(arena, McPhase::Get, "Unexpected END") {
            return Ok(());
        }
        self.finish_with(arena, END_REPLY)
    }

    pub fn stored(&mut self, arena: &mut QueryArena, stored: bool) -> Result<()> {
        if !self.base.accepts_event("stored") {
            return Ok(());
        }
        if !self.commit(arena, McPhase::Store, "Unexpected STORED") {
            return Ok(());
        }
        let reply = if stored { STORED_REPLY } else { NOT_STORED_REPLY };
        self.finish_with(arena, reply)
    }

    pub fn version(&mut self, arena: &mut QueryArena, data: &[u8]) -> Result<()> {
        if !self.base.accepts_event("version") {
            return Ok(());
        }
        if !self.commit(arena, McPhase::Version, "Unexpected VERSION") {
            return Ok(());
        }
        self.finish_with(arena, data)
    }

    pub fn other(&mut self, arena: &mut QueryArena, data: &[u8]) -> Result<()> {
        if !self.base.accepts_event("other") {
            return Ok(());
        }
        if !self.commit(arena, McPhase::Other, "Unexpected \"other\" command") {
            return Ok(());
        }
        self.finish_with(arena, data)
    }

    /// Announces the query kind ahead of the reply. Only `version` is
    /// recognised; other hints leave the phase undecided.
    pub fn set_query_type(&mut self, arena: &mut QueryArena, query_type: i32) {
        if !self.base.accepts_event("query_type") {
            return;
        }
        if query_type != MC_QUERY_TYPE_VERSION {
            return;
        }
        self.commit(arena, McPhase::Version, "Can't determine query type");
    }

    /// Fixes the phase on the first event and fails the query on a mismatch.
    fn commit(&mut self, arena: &mut QueryArena, phase: McPhase, mismatch: &'static str) -> bool {
        if self.phase == McPhase::Any {
            self.phase = phase;
        }
        if self.phase != phase {
            debug!(expected = ?self.phase, got = ?phase, "memcached reply out of sequence");
            self.base.error(arena, mismatch);
            return false;
        }
        true
    }

    fn finish_with(&mut self, arena: &mut QueryArena, tail: &[u8]) -> Result<()> {
        if self.base.is_alive(arena) {
            self.buf.append(arena, tail)?;
            let text = self.buf.to_cstring(arena)?;
            self.base.finish_ok(arena, text);
        } else {
            self.base.mark_done();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansgen::{AnsGenState, AnswerStatus};
    use crate::memory::ArenaConfig;

    fn arena() -> QueryArena {
        let mut arena = QueryArena::new(ArenaConfig {
            page_size: 1024,
            static_pages: 2,
            max_mem: 1 << 16,
            max_pages: 8,
        })
        .unwrap();
        arena.init().unwrap();
        arena
    }

    fn result_text(arena: &QueryArena, gen: &McAnswerGen) -> Vec<u8> {
        let answer = arena.answer(gen.answer()).unwrap();
        arena.bytes(answer.result.unwrap()).unwrap().to_vec()
    }

    #[test]
    fn test_get_sequence() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.value(&mut arena, b"a").unwrap();
        gen.value(&mut arena, b"b").unwrap();
        gen.end(&mut arena).unwrap();

        assert_eq!(gen.state(), AnsGenState::Done);
        assert_eq!(arena.answer(gen.answer()).unwrap().status, AnswerStatus::Ok);
        assert_eq!(result_text(&arena, &gen), b"abEND\r\n");
    }

    #[test]
    fn test_end_without_values() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.end(&mut arena).unwrap();
        assert_eq!(gen.phase(), McPhase::Get);
        assert_eq!(result_text(&arena, &gen), b"END\r\n");
    }

    #[test]
    fn test_store_replies() {
        let mut arena = arena();
        let mut stored = McAnswerGen::new(&mut arena).unwrap();
        stored.stored(&mut arena, true).unwrap();
        assert_eq!(result_text(&arena, &stored), b"STORED\r\n");

        let mut not_stored = McAnswerGen::new(&mut arena).unwrap();
        not_stored.stored(&mut arena, false).unwrap();
        assert_eq!(result_text(&arena, &not_stored), b"NOT_STORED\r\n");
    }

    #[test]
    fn test_stored_after_value_is_an_error() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.value(&mut arena, b"x").unwrap();
        gen.stored(&mut arena, true).unwrap();

        assert_eq!(gen.state(), AnsGenState::Error);
        let answer = arena.answer(gen.answer()).unwrap();
        assert_eq!(answer.status, AnswerStatus::Error);
        assert_eq!(answer.error_text(&arena).as_deref(), Some("Unexpected STORED"));
    }

    #[test]
    fn test_version_then_value_is_ignored() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.version(&mut arena, b"1.2.3").unwrap();
        assert_eq!(gen.state(), AnsGenState::Done);

        let before = arena.answer(gen.answer()).unwrap().clone();
        gen.value(&mut arena, b"late").unwrap();
        assert_eq!(arena.answer(gen.answer()).unwrap(), &before);
        assert_eq!(result_text(&arena, &gen), b"1.2.3");
    }

    #[test]
    fn test_query_type_conflict() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.value(&mut arena, b"x").unwrap();
        gen.set_query_type(&mut arena, MC_QUERY_TYPE_VERSION);

        let answer = arena.answer(gen.answer()).unwrap();
        assert_eq!(answer.error_text(&arena).as_deref(), Some("Can't determine query type"));
    }

    #[test]
    fn test_unknown_query_type_keeps_phase_open() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.feed(&mut arena, McEvent::QueryType(7)).unwrap();
        assert_eq!(gen.phase(), McPhase::Any);
        gen.feed(&mut arena, McEvent::Other(b"OK\r\n")).unwrap();
        assert_eq!(result_text(&arena, &gen), b"OK\r\n");
    }

    #[test]
    fn test_end_after_other_is_unexpected() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.feed(&mut arena, McEvent::QueryType(MC_QUERY_TYPE_VERSION)).unwrap();
        gen.feed(&mut arena, McEvent::End).unwrap();
        let answer = arena.answer(gen.answer()).unwrap();
        assert_eq!(answer.error_text(&arena).as_deref(), Some("Unexpected END"));
    }

    #[test]
    fn test_stale_generator_does_not_write() {
        let mut arena = arena();
        let mut gen = McAnswerGen::new(&mut arena).unwrap();
        gen.value(&mut arena, b"abc").unwrap();
        arena.clear().unwrap();
        arena.init().unwrap();

        let fresh = arena.alloc_copy(&[7u8; 64]).unwrap();
        let reused = arena.alloc_answer().unwrap();
        assert_eq!(reused, gen.answer());

        gen.value(&mut arena, b"def").unwrap();
        gen.end(&mut arena).unwrap();

        assert_eq!(gen.state(), AnsGenState::Done);
        assert_eq!(arena.answer(reused).unwrap().status, AnswerStatus::Pending);
        assert_eq!(arena.bytes(fresh).unwrap(), &[7u8; 64]);
    }
}
