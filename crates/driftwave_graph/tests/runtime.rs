//! Threaded scenarios: live mutation against a running compute loop,
//! present liveness under compute pressure, and teardown as a total fence.

mod common;

use common::{add, init_logs, record, scheduler, Probe, TestModule};
use driftwave_core::{Device, Locale, Record};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Registers a CPU chain `names[0] -> names[1] -> ...`; every module also
/// produces an output the next dynamic add can consume.
fn chain(scheduler: &driftwave_graph::Scheduler, probe: &Probe, names: &[&str]) {
    let mut previous: Option<Record> = None;
    for (index, name) in names.iter().enumerate() {
        let output = record(index as u64 + 1, Locale::block(*name).pin("out"));
        let inputs = match previous.replace(output.clone()) {
            Some(upstream) => vec![("in", upstream)],
            None => vec![],
        };
        add(
            scheduler,
            name,
            TestModule::new(name, Device::Cpu, probe),
            inputs,
            vec![("out", output)],
        )
        .unwrap();
    }
}

/// Dynamic add while the compute loop is live: the mutation quiesces the
/// loop and every observed pass is either the old chain or the new one,
/// never a blend.
#[test]
fn dynamic_add_is_atomic_under_a_live_compute_loop() {
    init_logs();
    let probe = Probe::default();
    let scheduler = Arc::new(scheduler());
    chain(&scheduler, &probe, &["a", "b", "c"]);

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || {
            while scheduler.is_running() {
                scheduler.compute().unwrap();
            }
        })
    };

    // Let a few passes land before mutating.
    while probe.computed().len() < 9 {
        thread::yield_now();
    }

    let c_out = record(3, Locale::block("c").pin("out"));
    add(
        &scheduler,
        "d",
        TestModule::new("d", Device::Cpu, &probe),
        vec![("in", c_out)],
        vec![],
    )
    .unwrap();

    assert_eq!(
        scheduler.snapshot().graphs,
        vec![(
            Device::Cpu,
            vec!["a".into(), "b".into(), "c".into(), "d".into()]
        )]
    );

    // Let the new pipeline run a few passes too.
    let after = probe.computed().len();
    while probe.computed().len() < after + 8 {
        thread::yield_now();
    }

    scheduler.destroy().unwrap();
    worker.join().unwrap();

    // Every pass is a whole chain: [a b c] before the mutation, [a b c d]
    // after, with one clean switchover.
    let log = probe.computed();
    let mut position = 0;
    let mut switched = false;
    while position < log.len() {
        let remaining = log.len() - position;
        if !switched
            && remaining >= 3
            && log[position..position + 3] == ["a", "b", "c"]
            && (remaining == 3 || log[position + 3] != "d")
        {
            position += 3;
        } else if remaining >= 4 && log[position..position + 4] == ["a", "b", "c", "d"] {
            switched = true;
            position += 4;
        } else if remaining < 4 && log[position..] == ["a", "b", "c"][..remaining.min(3)] {
            // A final pass may have been cut short by destroy; the worker
            // never interleaves it with another pass though.
            break;
        } else {
            panic!("interleaved pass at {position}: {:?}", &log[position..]);
        }
    }
}

/// The present loop must not starve while the compute loop saturates the
/// shared mutex with slow passes.
#[test]
fn present_stays_live_under_compute_pressure() {
    init_logs();
    let probe = Probe::default();
    let scheduler = Arc::new(scheduler());

    let a_out = record(1, Locale::block("a").pin("out"));
    add(
        &scheduler,
        "a",
        TestModule::new("a", Device::Cpu, &probe)
            .with_present()
            .with_delay(Duration::from_millis(10)),
        vec![],
        vec![("out", a_out.clone())],
    )
    .unwrap();
    add(
        &scheduler,
        "b",
        TestModule::new("b", Device::Cpu, &probe),
        vec![("in", a_out)],
        vec![],
    )
    .unwrap();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || {
            while scheduler.is_running() {
                scheduler.compute().unwrap();
            }
        })
    };

    let start = Instant::now();
    for _ in 0..20 {
        scheduler.present().unwrap();
    }
    let elapsed = start.elapsed();
    assert_eq!(probe.presented(), 20);
    // 20 presents against ~10ms compute passes: generous bound, but it
    // catches a starved present loop outright.
    assert!(elapsed < Duration::from_secs(5), "present starved: {elapsed:?}");

    scheduler.destroy().unwrap();
    worker.join().unwrap();
}

/// destroy() quiesces the workers, clears everything and turns the API into
/// a no-op surface.
#[test]
fn destroy_is_a_total_fence() {
    init_logs();
    let probe = Probe::default();
    let scheduler = Arc::new(scheduler());
    chain(&scheduler, &probe, &["a", "b"]);

    let workers: Vec<_> = (0..2)
        .map(|index| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                while scheduler.is_running() {
                    if index == 0 {
                        scheduler.compute().unwrap();
                    } else {
                        scheduler.present().unwrap();
                    }
                }
            })
        })
        .collect();

    while probe.computed().len() < 4 {
        thread::yield_now();
    }

    scheduler.destroy().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.pipeline, 0);
    assert!(snapshot.graphs.is_empty());

    // Destroyed schedulers refuse new work but stay callable.
    assert_eq!(scheduler.compute().unwrap(), driftwave_core::Flow::Success);
    assert!(matches!(
        add(
            &scheduler,
            "late",
            TestModule::new("late", Device::Cpu, &probe),
            vec![],
            vec![],
        ),
        Err(driftwave_core::FlowError::Destroyed)
    ));
    // Second destroy is a no-op.
    scheduler.destroy().unwrap();
}

/// A queued-device executor participates in the same discipline: the chain
/// keeps its order across the device boundary under a live loop.
#[test]
fn mixed_device_chain_runs_in_order_under_a_live_loop() {
    init_logs();
    let probe = Probe::default();
    let scheduler = Arc::new(scheduler());

    let a_out = record(1, Locale::block("a").pin("out"));
    let b_out = record(2, Locale::block("b").pin("out"));

    add(
        &scheduler,
        "a",
        TestModule::new("a", Device::Cpu, &probe),
        vec![],
        vec![("out", a_out.clone())],
    )
    .unwrap();
    add(
        &scheduler,
        "b",
        TestModule::new("b", Device::Cuda, &probe),
        vec![("in", a_out)],
        vec![("out", b_out.clone())],
    )
    .unwrap();
    add(
        &scheduler,
        "c",
        TestModule::new("c", Device::Cpu, &probe),
        vec![("in", b_out)],
        vec![],
    )
    .unwrap();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || {
            while scheduler.is_running() {
                scheduler.compute().unwrap();
            }
        })
    };

    while probe.computed().len() < 12 {
        thread::yield_now();
    }
    scheduler.destroy().unwrap();
    worker.join().unwrap();

    let log = probe.computed();
    for pass in log.chunks(3) {
        if pass.len() == 3 {
            assert_eq!(pass, ["a", "b", "c"]);
        }
    }
}
