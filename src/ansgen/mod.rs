//! Answer generators: state machines that assemble a net query answer from
//! decoded protocol events.
//!
//! A generator writes into an answer record and byte buffers owned by the
//! [`QueryArena`]. It remembers the arena generation it was created in and
//! treats itself as detached once that generation has passed, so events that
//! arrive after the request has been torn down still drive the protocol state
//! but never touch arena memory.

pub mod memcached;
pub mod sql;

use crate::error::Result;
use crate::memory::{AnswerRef, ByteChain, QueryArena, Span};
use std::borrow::Cow;
use std::fmt;
use tracing::{trace, warn};

pub use memcached::{McAnswerGen, McEvent, McPhase, MC_QUERY_TYPE_VERSION};
pub use sql::{ConnectionCommand, SqlAnswerGen, SqlEvent, SqlPhase};

pub const TIMEOUT_MESSAGE: &str = "Timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsGenState {
    Waiting,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnswerStatus {
    #[default]
    Pending,
    Ok,
    Error,
}

/// Error or description text of an answer: a literal, or bytes formatted
/// into the arena for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerText {
    Static(&'static str),
    Arena(Span),
}

impl AnswerText {
    /// Resolves the text. Arena text is only readable until the arena is cleared.
    pub fn resolve<'a>(&self, arena: &'a QueryArena) -> Result<Cow<'a, str>> {
        match *self {
            AnswerText::Static(text) => Ok(Cow::Borrowed(text)),
            AnswerText::Arena(span) => Ok(String::from_utf8_lossy(arena.bytes(span)?)),
        }
    }
}

impl From<&'static str> for AnswerText {
    fn from(text: &'static str) -> Self {
        AnswerText::Static(text)
    }
}

/// Answer record of one net query, stored in the arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetAnswer {
    pub status: AnswerStatus,
    /// Payload text. The arena byte after it is a NUL.
    pub result: Option<Span>,
    pub error: Option<AnswerText>,
    pub description: Option<AnswerText>,
    pub chain: Option<ByteChain>,
}

impl NetAnswer {
    pub fn is_ok(&self) -> bool {
        self.status == AnswerStatus::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == AnswerStatus::Error
    }

    pub fn error_text<'a>(&self, arena: &'a QueryArena) -> Option<Cow<'a, str>> {
        self.error.and_then(|text| text.resolve(arena).ok())
    }

    pub fn description_text<'a>(&self, arena: &'a QueryArena) -> Option<Cow<'a, str>> {
        self.description.and_then(|text| text.resolve(arena).ok())
    }
}

/// State shared by every generator variant.
#[derive(Debug)]
pub struct NetAnsGen {
    generation: Option<u64>,
    state: AnsGenState,
    answer: AnswerRef,
}

impl NetAnsGen {
    pub fn new(arena: &mut QueryArena) -> Result<Self> {
        let answer = arena.alloc_answer()?;
        Ok(Self {
            generation: Some(arena.generation()),
            state: AnsGenState::Waiting,
            answer,
        })
    }

    pub fn is_alive(&self, arena: &QueryArena) -> bool {
        self.generation == Some(arena.generation())
    }

    pub fn state(&self) -> AnsGenState {
        self.state
    }

    pub fn is_waiting(&self) -> bool {
        self.state == AnsGenState::Waiting
    }

    pub fn answer(&self) -> AnswerRef {
        self.answer
    }

    /// Fails the query. The generator enters the error state even when detached.
    pub fn error(&mut self, arena: &mut QueryArena, message: impl Into<AnswerText>) {
        if !self.accepts_event("error") {
            return;
        }
        let message = message.into();
        warn!(answer = self.answer.index(), ?message, "net answer failed");
        if let Some(answer) = self.live_answer(arena) {
            answer.status = AnswerStatus::Error;
            answer.error = Some(message);
        }
        self.state = AnsGenState::Error;
    }

    /// Like [`error`](Self::error) with text formatted into the arena.
    /// Nothing is allocated once the generator is detached.
    pub fn error_fmt(&mut self, arena: &mut QueryArena, args: fmt::Arguments<'_>) -> Result<()> {
        if !self.accepts_event("error") {
            return Ok(());
        }
        warn!(answer = self.answer.index(), message = %args, "net answer failed");
        self.state = AnsGenState::Error;
        if !self.is_alive(arena) {
            return Ok(());
        }
        let text = AnswerText::Arena(arena.alloc_fmt(args)?);
        if let Some(answer) = arena.answer_mut(self.answer) {
            answer.status = AnswerStatus::Error;
            answer.error = Some(text);
        }
        Ok(())
    }

    /// Fails the query with a timeout and detaches, so later events are dropped.
    pub fn timeout(&mut self, arena: &mut QueryArena) {
        if !self.accepts_event("timeout") {
            return;
        }
        if let Some(answer) = self.live_answer(arena) {
            answer.status = AnswerStatus::Error;
            answer.error = Some(AnswerText::Static(TIMEOUT_MESSAGE));
            self.generation = None;
        }
    }

    pub fn set_description(&mut self, arena: &mut QueryArena, text: impl Into<AnswerText>) {
        if let Some(answer) = self.live_answer(arena) {
            answer.description = Some(text.into());
        }
    }

    pub fn set_description_fmt(&mut self, arena: &mut QueryArena, args: fmt::Arguments<'_>) -> Result<()> {
        if !self.is_alive(arena) {
            return Ok(());
        }
        let text = AnswerText::Arena(arena.alloc_fmt(args)?);
        self.set_description(arena, text);
        Ok(())
    }

    pub(crate) fn live_answer<'a>(&self, arena: &'a mut QueryArena) -> Option<&'a mut NetAnswer> {
        if !self.is_alive(arena) {
            trace!(answer = self.answer.index(), "dropping write from stale answer generator");
            return None;
        }
        arena.answer_mut(self.answer)
    }

    pub(crate) fn finish_ok(&mut self, arena: &mut QueryArena, result: Span) {
        if let Some(answer) = self.live_answer(arena) {
            answer.status = AnswerStatus::Ok;
            answer.result = Some(result);
        }
        self.state = AnsGenState::Done;
    }

    pub(crate) fn finish_chain(&mut self, arena: &mut QueryArena, chain: ByteChain) {
        if let Some(answer) = self.live_answer(arena) {
            answer.status = AnswerStatus::Ok;
            answer.chain = Some(chain);
        }
        self.state = AnsGenState::Done;
    }

    pub(crate) fn mark_done(&mut self) {
        self.state = AnsGenState::Done;
    }

    pub(crate) fn accepts_event(&self, event: &'static str) -> bool {
        if self.state != AnsGenState::Waiting {
            trace!(event, state = ?self.state, "event after terminal state ignored");
            return false;
        }
        true
    }
}

/// Capabilities every answer generator exposes to the network layer.
pub trait AnswerGen {
    fn base(&self) -> &NetAnsGen;
    fn base_mut(&mut self) -> &mut NetAnsGen;

    fn state(&self) -> AnsGenState {
        self.base().state()
    }

    fn answer(&self) -> AnswerRef {
        self.base().answer()
    }

    fn is_alive(&self, arena: &QueryArena) -> bool {
        self.base().is_alive(arena)
    }

    fn error(&mut self, arena: &mut QueryArena, message: AnswerText) {
        self.base_mut().error(arena, message)
    }

    fn error_fmt(&mut self, arena: &mut QueryArena, args: fmt::Arguments<'_>) -> Result<()> {
        self.base_mut().error_fmt(arena, args)
    }

    fn timeout(&mut self, arena: &mut QueryArena) {
        self.base_mut().timeout(arena)
    }

    fn set_description(&mut self, arena: &mut QueryArena, text: AnswerText) {
        self.base_mut().set_description(arena, text)
    }

    fn set_description_fmt(&mut self, arena: &mut QueryArena, args: fmt::Arguments<'_>) -> Result<()> {
        self.base_mut().set_description_fmt(arena, args)
    }
}

impl AnswerGen for NetAnsGen {
    fn base(&self) -> &NetAnsGen {
        self
    }

    fn base_mut(&mut self) -> &mut NetAnsGen {
        self
    }
}

/// A generator of any protocol.
#[derive(Debug)]
pub enum AnswerGenerator {
    Net(NetAnsGen),
    Memcached(McAnswerGen),
    Sql(SqlAnswerGen),
}

impl AnswerGen for AnswerGenerator {
    fn base(&self) -> &NetAnsGen {
        match self {
            AnswerGenerator::Net(base) => base,
            AnswerGenerator::Memcached(mc) => mc.base(),
            AnswerGenerator::Sql(sql) => sql.base(),
        }
    }

    fn base_mut(&mut self) -> &mut NetAnsGen {
        match self {
            AnswerGenerator::Net(base) => base,
            AnswerGenerator::Memcached(mc) => mc.base_mut(),
            AnswerGenerator::Sql(sql) => sql.base_mut(),
        }
    }
}

impl From<McAnswerGen> for AnswerGenerator {
    fn from(value: McAnswerGen) -> Self {
        AnswerGenerator::Memcached(value)
    }
}

impl From<SqlAnswerGen> for AnswerGenerator {
    fn from(value: SqlAnswerGen) -> Self {
        AnswerGenerator::Sql(value)
    }
}
