mod common;

use common::{inited_arena, small_arena_config};
use lightning_query::{ArenaConfig, ByteChain, Error, QueryArena, StrBuf};

#[test]
fn test_clear_then_init_restores_static_pages() {
    let mut arena = inited_arena();
    for n in [10, 500, 3000, 1, 700] {
        arena.alloc(n).unwrap();
    }
    assert!(arena.page_count() > 2);

    arena.clear().unwrap();
    arena.init().unwrap();
    assert_eq!(arena.free_span_sizes(), vec![1024, 1024]);
    assert_eq!(arena.page_count(), 2);
    assert_eq!(arena.used_bytes(), 0);
}

#[test]
fn test_generation_increases_on_every_clear_and_reset() {
    let mut arena = inited_arena();
    let mut last = arena.generation();
    for round in 0..5 {
        arena.alloc(100 * (round + 1)).unwrap();
        arena.reset_if_mostly_used();
        assert!(arena.generation() > last);
        last = arena.generation();

        arena.clear().unwrap();
        assert!(arena.generation() > last);
        last = arena.generation();
        arena.init().unwrap();
    }
}

#[test]
fn test_exhaustion_keeps_arena_usable() {
    let mut arena = inited_arena();
    let err = arena.alloc(128 * 1024).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.error_code(), -3);

    // Nothing was reserved by the failed call.
    assert_eq!(arena.reserved_bytes(), 2048);
    assert!(arena.alloc(16).is_ok());
}

#[test]
fn test_alloc_before_init_is_rejected() {
    let mut arena = QueryArena::new(small_arena_config()).unwrap();
    assert!(matches!(arena.alloc(8), Err(Error::ArenaState { .. })));
    assert!(matches!(arena.clear(), Err(Error::ArenaState { .. })));
}

#[test]
fn test_buffer_growth_across_pages() {
    let mut arena = inited_arena();
    let mut buf = StrBuf::new();
    let chunk = [b'z'; 300];
    for _ in 0..10 {
        buf.append(&mut arena, &chunk).unwrap();
    }
    assert_eq!(buf.len(), 3000);
    assert!(buf.capacity() > 3000);

    let text = buf.to_cstring(&mut arena).unwrap();
    assert_eq!(arena.bytes(text).unwrap(), &[b'z'; 3000][..]);
}

#[test]
fn test_chain_survives_interleaved_allocations() {
    let mut arena = inited_arena();
    let chain = ByteChain::new(&mut arena).unwrap();
    for i in 0..20u8 {
        chain.append(&mut arena, &[i; 3]).unwrap();
        arena.alloc(17).unwrap();
    }
    assert_eq!(chain.len(&arena), 20);

    let rows: Vec<Vec<u8>> = chain
        .iter(&arena)
        .map(|row| row.map(<[u8]>::to_vec))
        .collect::<Result<_, _>>()
        .unwrap();
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row, &vec![i as u8; 3]);
    }
}

#[test]
fn test_stats_track_usage() {
    let mut arena = inited_arena();
    arena.alloc(5000).unwrap();
    let stats = arena.stats();
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.dynamic_pages, 1);
    assert_eq!(stats.reserved_bytes, 2048 + 5000);
    assert!(stats.used_bytes >= 5000);

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"reserved_bytes\":7048"));
}

fn tiny_arena() -> QueryArena {
    let mut arena = QueryArena::new(ArenaConfig {
        page_size: 256,
        static_pages: 2,
        max_mem: 512,
        max_pages: 2,
    })
    .unwrap();
    arena.init().unwrap();
    arena
}

#[test]
fn test_empty_rows_exhaust_tiny_arena() {
    let mut arena = tiny_arena();
    let chain = ByteChain::new(&mut arena).unwrap();

    let mut appended = 0;
    let err = loop {
        match chain.append(&mut arena, b"") {
            Ok(()) => appended += 1,
            Err(e) => break e,
        }
        assert!(appended < 100_000, "chain nodes escaped the memory ceiling");
    };
    assert!(err.is_fatal());

    let stats = arena.stats();
    assert!(stats.reserved_bytes <= 512);
    assert!(stats.used_bytes <= stats.reserved_bytes);
    assert_eq!(stats.chain_nodes, appended + 1);
}

#[test]
fn test_answer_records_exhaust_tiny_arena() {
    let mut arena = tiny_arena();

    let mut records = 0;
    let err = loop {
        match arena.alloc_answer() {
            Ok(_) => records += 1,
            Err(e) => break e,
        }
        assert!(records < 100_000, "answer records escaped the memory ceiling");
    };
    assert!(err.is_fatal());
    assert!(records > 0);

    let stats = arena.stats();
    assert!(stats.reserved_bytes <= 512);
    assert!(stats.used_bytes <= stats.reserved_bytes);
    assert_eq!(stats.answers, records);

    // A failed record reserves nothing; teardown gets the arena back.
    arena.clear().unwrap();
    arena.init().unwrap();
    assert!(arena.alloc_answer().is_ok());
}
