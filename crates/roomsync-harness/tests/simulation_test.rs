//! Seeded multi-client simulations.
//!
//! Lockstep runs must converge through pushes alone. Chaotic and faulty runs
//! must converge once every client has resynced.

use proptest::prelude::*;
use roomsync_core::Room;
use roomsync_harness::{SimConfig, SimError, SimStats, Simulation};

fn run(config: SimConfig) -> Result<(SimStats, Vec<Room>), SimError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    runtime.block_on(async move {
        let mut simulation = Simulation::new(config);
        let stats = simulation.run().await?;
        Ok((stats, simulation.hub().with_hub(|h| h.rooms())))
    })
}

fn check(config: SimConfig) -> SimStats {
    match run(config) {
        Ok((stats, _)) => stats,
        Err(err) => panic!("seed {} failed: {err}", config.seed),
    }
}

#[test]
fn lockstep_runs_converge_through_pushes() {
    for seed in 0..16 {
        let stats = check(SimConfig { lockstep: true, ..SimConfig::with_seed(seed) });
        assert!(stats.commands > 0);
        assert!(stats.pushes_delivered > 0);
        assert_eq!(stats.faults, 0);
    }
}

#[test]
fn chaotic_delivery_converges_after_resync() {
    for seed in 0..16 {
        check(SimConfig { clients: 4, ..SimConfig::with_seed(seed) });
    }
}

#[test]
fn faulty_runs_converge_after_settling() {
    for seed in 0..16 {
        let stats = check(SimConfig { faults: true, steps: 300, ..SimConfig::with_seed(seed) });
        assert!(stats.faults > 0);
    }
}

#[test]
fn lockstep_with_faults_converges() {
    for seed in 100..108 {
        check(SimConfig { lockstep: true, faults: true, ..SimConfig::with_seed(seed) });
    }
}

#[test]
fn parked_replies_converge_through_pushes() {
    for seed in 200..208 {
        let stats = check(SimConfig { lockstep: true, steps: 300, ..SimConfig::with_seed(seed) });
        assert!(stats.overlapped > 0);
    }
}

#[test]
fn runs_without_overlap_park_nothing() {
    let stats = check(SimConfig { overlap: false, faults: true, ..SimConfig::with_seed(3) });
    assert_eq!(stats.overlapped, 0);
}

#[test]
fn single_client_converges() {
    check(SimConfig { clients: 1, faults: true, ..SimConfig::with_seed(7) });
}

#[test]
fn same_seed_replays_identically() {
    let config = SimConfig { faults: true, ..SimConfig::with_seed(42) };
    let first = run(config).expect("first run");
    let second = run(config).expect("second run");
    assert_eq!(first, second);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_any_seed_converges(seed in any::<u64>(), lockstep in any::<bool>()) {
        let config =
            SimConfig { lockstep, faults: true, steps: 150, ..SimConfig::with_seed(seed) };
        let result = run(config);
        prop_assert!(result.is_ok(), "seed {}: {:?}", seed, result.err());
    }
}
