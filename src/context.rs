use crate::error::Result;
use crate::memory::QueryArena;
use crate::net::{NetExchange, SlotSpace};
use crate::QueryRuntimeConfig;
use tracing::{debug, info};

/// Everything one request executes against: the arena and the net exchange.
///
/// Only one request owns the arena between [`on_request_start`] and
/// [`on_request_end`]. Answer generators and spans handed out in between are
/// tied to that epoch.
///
/// [`on_request_start`]: QueryContext::on_request_start
/// [`on_request_end`]: QueryContext::on_request_end
#[derive(Debug)]
pub struct QueryContext {
    pub arena: QueryArena,
    pub exchange: NetExchange,
    config: QueryRuntimeConfig,
    requests: u64,
}

impl QueryContext {
    pub fn new(config: QueryRuntimeConfig) -> Result<Self> {
        let slots = SlotSpace::new(config.slot_ceiling);
        Self::build(config, slots)
    }

    /// Same as [`new`](Self::new) with a deterministic slot id sequence.
    pub fn with_slot_seed(config: QueryRuntimeConfig, seed: u64) -> Result<Self> {
        let slots = SlotSpace::with_seed(config.slot_ceiling, seed);
        Self::build(config, slots)
    }

    fn build(config: QueryRuntimeConfig, slots: SlotSpace) -> Result<Self> {
        config.validate()?;
        let arena = QueryArena::new(config.arena.clone())?;
        let exchange = NetExchange::new(
            slots,
            config.event_queue_capacity,
            config.query_queue_capacity,
            config.max_rpc_answer_len,
        );
        Ok(Self {
            arena,
            exchange,
            config,
            requests: 0,
        })
    }

    pub fn config(&self) -> &QueryRuntimeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.arena.is_inited()
    }

    pub fn requests_started(&self) -> u64 {
        self.requests
    }

    pub fn on_request_start(&mut self) -> Result<()> {
        self.arena.init()?;
        self.requests += 1;
        debug!(
            request = self.requests,
            generation = self.arena.generation(),
            "request started"
        );
        Ok(())
    }

    /// Tears the request down: releases dynamic arena pages, invalidates
    /// issued slot ids and drops queued events and queries.
    pub fn on_request_end(&mut self) -> Result<()> {
        let stats = self.arena.stats();
        self.arena.clear()?;
        self.exchange.clear();
        info!(
            request = self.requests,
            used_bytes = stats.used_bytes,
            reserved_bytes = stats.reserved_bytes,
            pages = stats.pages,
            "request finished"
        );
        Ok(())
    }

    /// Lighter reclamation for back-to-back requests in a long-lived process.
    pub fn between_requests(&mut self) {
        self.arena.reset_if_mostly_used();
    }
}
