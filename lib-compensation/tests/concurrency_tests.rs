//! Concurrent purchase behavior through the shared engine handle.

use std::thread;

use lib_compensation::{
    CompensationEngine, EngineConfig, InMemoryDirectory, InMemoryWallet, Program, SharedEngine,
    StaticPriceCatalog,
};

fn shared(members: u64) -> SharedEngine<InMemoryDirectory, StaticPriceCatalog, InMemoryWallet> {
    let mut dir = InMemoryDirectory::new();
    dir.add_member(1, None);
    for id in 2..=members {
        dir.add_member(id, Some(1));
    }
    let catalog = StaticPriceCatalog::geometric(Program::Matrix, 100, 16)
        .merge(StaticPriceCatalog::geometric(Program::Binary, 100, 16));
    SharedEngine::new(CompensationEngine::new(
        dir,
        catalog,
        InMemoryWallet::new(),
        EngineConfig::new(1),
    ))
}

#[test]
fn test_parallel_joins_across_members() {
    let engine = shared(33);
    let handles: Vec<_> = (2..=33u64)
        .map(|m| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine
                    .join(m, Program::Matrix, 100, &format!("tx-{}", m))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let (joins, occupancy_total) = engine
        .read(|e| {
            let total: u32 = (2..=33u64)
                .map(|m| u32::from(e.is_slot_active(m, Program::Matrix, 1)))
                .sum();
            (e.stats().joins, total)
        })
        .unwrap();
    assert_eq!(joins, 32);
    assert_eq!(occupancy_total, 32);
}

#[test]
fn test_double_payment_activates_one_slot() {
    // Two racing upgrade attempts for the same member and slot with
    // distinct payment keys: exactly one may win
    let engine = shared(3);
    engine.join(2, Program::Matrix, 100, "join-2").unwrap();

    let attempts: Vec<_> = ["pay-a", "pay-b"]
        .into_iter()
        .map(|key| {
            let engine = engine.clone();
            thread::spawn(move || engine.upgrade(2, Program::Matrix, 2, 200, key).is_ok())
        })
        .collect();
    let successes = attempts
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(successes, 1);
    let highest = engine
        .read(|e| e.highest_active_slot(2, Program::Matrix))
        .unwrap();
    assert_eq!(highest, 2);
}

#[test]
fn test_replayed_key_cannot_double_distribute() {
    let engine = shared(4);
    engine.join(2, Program::Binary, 100, "join-2").unwrap();

    let replays: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.join(3, Program::Binary, 100, "join-2").is_ok())
        })
        .collect();
    for handle in replays {
        assert!(!handle.join().unwrap());
    }

    let rows = engine
        .read(|e| e.income().events_for_key("join-2").count())
        .unwrap();
    // Only member 2's original join produced rows under this key
    assert!(rows > 0);
    let active = engine
        .read(|e| e.is_slot_active(3, Program::Binary, 1))
        .unwrap();
    assert!(!active);
}
