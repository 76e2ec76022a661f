use crate::ansgen::{AnswerGen, NetAnsGen};
use crate::error::{Error, Result};
use crate::memory::{ByteChain, QueryArena};
use std::fmt;
use tracing::trace;

/// Connection setup work run once the SQL connection is ready, before the
/// query itself is written. Dropped together with its generator.
pub trait ConnectionCommand {
    fn run(&mut self, data: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlPhase {
    Init,
    WaitConnection,
    WaitAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlEvent<'a> {
    Ready(&'a [u8]),
    Row(&'a [u8]),
    Done,
}

pub struct SqlAnswerGen {
    base: NetAnsGen,
    phase: SqlPhase,
    writer: Option<Box<dyn ConnectionCommand>>,
    chain: ByteChain,
}

impl fmt::Debug for SqlAnswerGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlAnswerGen")
            .field("base", &self.base)
            .field("phase", &self.phase)
            .field("writer", &self.writer.is_some())
            .field("chain", &self.chain)
            .finish()
    }
}

impl AnswerGen for SqlAnswerGen {
    fn base(&self) -> &NetAnsGen {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NetAnsGen {
        &mut self.base
    }
}

impl SqlAnswerGen {
    pub fn new(arena: &mut QueryArena) -> Result<Self> {
        let base = NetAnsGen::new(arena)?;
        let chain = ByteChain::new(arena)?;
        Ok(Self {
            base,
            phase: SqlPhase::Init,
            writer: None,
            chain,
        })
    }

    pub fn phase(&self) -> SqlPhase {
        self.phase
    }

    pub fn set_writer(&mut self, writer: Option<Box<dyn ConnectionCommand>>) -> Result<()> {
        self.expect(SqlPhase::Init, "set_writer outside init phase")?;
        self.writer = writer;
        self.phase = SqlPhase::WaitConnection;
        Ok(())
    }

    /// The connection is set up; runs the pending setup command, if any.
    pub fn ready(&mut self, data: &[u8]) -> Result<()> {
        self.expect(SqlPhase::WaitConnection, "ready before set_writer")?;
        if let Some(writer) = self.writer.as_mut() {
            writer.run(data);
        }
        self.phase = SqlPhase::WaitAnswer;
        Ok(())
    }

    pub fn add_row(&mut self, arena: &mut QueryArena, row: &[u8]) -> Result<()> {
        self.expect(SqlPhase::WaitAnswer, "row before the connection is ready")?;
        if self.base.is_alive(arena) {
            self.chain.append(arena, row)?;
        } else {
            trace!(len = row.len(), "dropping sql row for stale request");
        }
        Ok(())
    }

    pub fn done(&mut self, arena: &mut QueryArena) -> Result<()> {
        self.expect(SqlPhase::WaitAnswer, "done before the connection is ready")?;
        self.base.finish_chain(arena, self.chain);
        Ok(())
    }

    pub fn feed(&mut self, arena: &mut QueryArena, event: SqlEvent<'_>) -> Result<()> {
        match event {
            SqlEvent::Ready(data) => self.ready(data),
            SqlEvent::Row(row) => self.add_row(arena, row),
            SqlEvent::Done => self.done(arena),
        }
    }

    fn expect(&self, phase: SqlPhase, violation: &'static str) -> Result<()> {
        if !self.base.is_waiting() || self.phase != phase {
            return Err(Error::InvalidTransition(violation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansgen::{AnsGenState, AnswerStatus};
    use crate::memory::ArenaConfig;
    use std::cell::Cell;
    use std::rc::Rc;

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

    struct CountingCommand {
        runs: Rc<Cell<usize>>,
        drops: Rc<Cell<usize>>,
    }

    impl ConnectionCommand for CountingCommand {
        fn run(&mut self, data: &[u8]) {
            assert_eq!(data, b"handshake");
            self.runs.set(self.runs.get() + 1);
        }
    }

    impl Drop for CountingCommand {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn test_rows_are_chained_in_order() {
        let mut arena = arena();
        let mut gen = SqlAnswerGen::new(&mut arena).unwrap();
        gen.set_writer(None).unwrap();
        gen.ready(b"").unwrap();
        gen.add_row(&mut arena, b"r1").unwrap();
        gen.add_row(&mut arena, b"r2").unwrap();
        gen.done(&mut arena).unwrap();

        assert_eq!(gen.state(), AnsGenState::Done);
        let answer = arena.answer(gen.answer()).unwrap();
        assert_eq!(answer.status, AnswerStatus::Ok);
        let rows: Vec<&[u8]> = answer
            .chain
            .unwrap()
            .iter(&arena)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows, vec![&b"r1"[..], &b"r2"[..]]);
    }

    #[test]
    fn test_writer_runs_on_ready_and_drops_with_generator() {
        let runs = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let mut arena = arena();
        {
            let mut gen = SqlAnswerGen::new(&mut arena).unwrap();
            gen.set_writer(Some(Box::new(CountingCommand {
                runs: runs.clone(),
                drops: drops.clone(),
            })))
            .unwrap();
            gen.ready(b"handshake").unwrap();
            assert_eq!(runs.get(), 1);
            assert_eq!(drops.get(), 0);
        }
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_out_of_order_events_are_rejected() {
        let mut arena = arena();
        let mut gen = SqlAnswerGen::new(&mut arena).unwrap();
        assert!(matches!(
            gen.add_row(&mut arena, b"early"),
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(gen.ready(b""), Err(Error::InvalidTransition(_))));
        gen.set_writer(None).unwrap();
        assert!(matches!(gen.set_writer(None), Err(Error::InvalidTransition(_))));
    }

    #[test]
    fn test_stale_rows_are_dropped() {
        let mut arena = arena();
        let mut gen = SqlAnswerGen::new(&mut arena).unwrap();
        gen.set_writer(None).unwrap();
        gen.ready(b"").unwrap();
        arena.reset_if_mostly_used();

        gen.add_row(&mut arena, b"late").unwrap();
        gen.done(&mut arena).unwrap();
        assert_eq!(gen.state(), AnsGenState::Done);
        let answer = arena.answer(gen.answer()).unwrap();
        assert_eq!(answer.status, AnswerStatus::Pending);
        assert!(answer.chain.is_none());
    }
}
