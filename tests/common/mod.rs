#![allow(dead_code)]

use lightning_query::testing::LoopbackRunner;
use lightning_query::{ArenaConfig, QueryArena, QueryContext, QueryEngine, QueryRuntimeConfig};

/// Small arena so page growth and exhaustion are easy to reach.
pub fn small_arena_config() -> ArenaConfig {
    ArenaConfig {
        page_size: 1024,
        static_pages: 2,
        max_mem: 64 * 1024,
        max_pages: 32,
    }
}

pub fn test_config() -> QueryRuntimeConfig {
    QueryRuntimeConfig {
        arena: small_arena_config(),
        slot_ceiling: 100_000,
        event_queue_capacity: 64,
        query_queue_capacity: 64,
        max_rpc_answer_len: 1 << 20,
        ..QueryRuntimeConfig::default()
    }
}

pub fn inited_arena() -> QueryArena {
    let mut arena = QueryArena::new(small_arena_config()).expect("arena");
    arena.init().expect("init");
    arena
}

pub fn test_context() -> QueryContext {
    QueryContext::with_slot_seed(test_config(), 0x5eed).expect("context")
}

/// Engine with a running request.
pub fn running_engine(runner: LoopbackRunner) -> QueryEngine<LoopbackRunner> {
    let mut engine = QueryEngine::with_context(test_context(), runner);
    engine.start_request().expect("start request");
    engine
}
