//! Per-request query execution core.
//!
//! A request handler talks to the outside world only through typed queries
//! ([`QueryEngine`]) that a [`ScriptRunner`] executes. Everything a request
//! allocates lives in a [`QueryArena`] that is recycled wholesale at request
//! end; protocol replies are assembled by answer generators ([`ansgen`]) that
//! stop writing once their arena generation has passed.

pub mod ansgen;
pub mod config_presets;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod memory;
pub mod net;
pub mod queries;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use ansgen::{
    AnsGenState, AnswerGen, AnswerGenerator, AnswerStatus, AnswerText, McAnswerGen, McEvent,
    McPhase, NetAnsGen, NetAnswer, SqlAnswerGen, SqlEvent, SqlPhase,
};
pub use config_presets::ConfigPreset;
pub use context::QueryContext;
pub use engine::QueryEngine;
pub use error::{Error, Result};
pub use memory::{AnswerRef, ArenaConfig, ArenaStats, ByteChain, QueryArena, Span, StrBuf};
pub use net::{NetEvent, NetEventKind, NetExchange, NetQuery, NetQueryKind, SlotId, SlotSpace};
pub use queries::{Protocol, Query, QueryAnswer, QueryRequest, ScriptResult, ScriptRunner};

/// Longest text kept by [`QueryEngine::last_net_error`].
pub const MAX_NET_ERROR_LEN: usize = 127;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryRuntimeConfig {
    pub arena: ArenaConfig,
    pub slot_ceiling: SlotId,
    pub event_queue_capacity: usize,
    pub query_queue_capacity: usize,
    pub max_rpc_answer_len: usize,
    pub max_net_error_len: usize,
}

impl Default for QueryRuntimeConfig {
    fn default() -> Self {
        Self {
            arena: ArenaConfig::default(),
            slot_ceiling: net::DEFAULT_SLOT_CEILING,
            event_queue_capacity: 2_000_000,
            query_queue_capacity: 2_000_000,
            max_rpc_answer_len: net::DEFAULT_MAX_RPC_ANSWER_LEN,
            max_net_error_len: MAX_NET_ERROR_LEN,
        }
    }
}

impl QueryRuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        self.arena.validate()?;
        if self.slot_ceiling < 4 {
            return Err(Error::Config(format!(
                "slot_ceiling must be at least 4, got {}",
                self.slot_ceiling
            )));
        }
        if self.event_queue_capacity == 0 || self.query_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be non-zero".into()));
        }
        if self.max_rpc_answer_len > net::DEFAULT_MAX_RPC_ANSWER_LEN {
            return Err(Error::Config(format!(
                "max_rpc_answer_len {} exceeds {}",
                self.max_rpc_answer_len,
                net::DEFAULT_MAX_RPC_ANSWER_LEN
            )));
        }
        Ok(())
    }

    /// Reads a JSON config. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}
