//! Concurrency tests for shellbridge.
//!
//! These tests verify that concurrent runs on disjoint scripts behave
//! exactly like sequential runs, and that calls sharing one handle are
//! serialized.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use common::{counting_bridge, ScriptDir};
use shellbridge::Status;

/// Number of concurrent scripts.
const NUM_SCRIPTS: usize = 8;

/// Write a script that sums `0..limit` and records the result in `out`.
fn summing_script(dir: &ScriptDir, index: usize) -> (PathBuf, PathBuf) {
    let out = dir.path().join(format!("out-{index}.txt"));
    let limit = 50 + index * 10;
    let body = format!(
        "i=0\ntotal=0\nwhile [ $i -lt {limit} ]; do\n  total=$((total + i))\n  i=$((i + 1))\ndone\nexport RESULT=\"script {index}: $total\"\necho \"$RESULT\" > {}\n",
        out.display()
    );
    (dir.script(&format!("sum-{index}.sh"), &body), out)
}

fn expected(index: usize) -> String {
    let limit = 50 + index * 10;
    format!("script {index}: {}\n", (0..limit).sum::<usize>())
}

#[test]
fn test_concurrent_runs_match_sequential() {
    let dir = ScriptDir::new();
    let scripts: Vec<_> = (0..NUM_SCRIPTS).map(|i| summing_script(&dir, i)).collect();

    // Sequential baseline
    let bridge = counting_bridge();
    let mut sequential = Vec::new();
    for (script, out) in &scripts {
        assert_eq!(bridge.run_script(script), Status::Success);
        sequential.push(std::fs::read_to_string(out).unwrap());
        std::fs::remove_file(out).unwrap();
    }

    // Concurrent run
    let bridge = Arc::new(counting_bridge());
    let handles: Vec<_> = scripts
        .iter()
        .map(|(script, _)| {
            let bridge = Arc::clone(&bridge);
            let script = script.clone();
            thread::spawn(move || bridge.run_script(&script))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Status::Success);
    }

    for (index, (_, out)) in scripts.iter().enumerate() {
        let concurrent = std::fs::read_to_string(out).unwrap();
        assert_eq!(concurrent, sequential[index]);
        assert_eq!(concurrent, expected(index));
    }
    assert_eq!(bridge.engine().contexts(), NUM_SCRIPTS);
}

#[test]
fn test_shared_handle_is_serialized() {
    let dir = ScriptDir::new();
    let bridge = Arc::new(counting_bridge());
    let handle = bridge.create_context().unwrap();

    // Each run reads, then writes the counter; lost updates would show up
    // as a final value below the number of runs.
    let path = dir.script(
        "increment.sh",
        "current=${COUNTER:-0}\nnext=$((current + 1))\nCOUNTER=$next\n",
    );

    let handles: Vec<_> = (0..NUM_SCRIPTS)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            let path = path.clone();
            thread::spawn(move || bridge.run_script_in(&path, Some(handle)))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Status::Success);
    }

    let counter = bridge
        .with_context(handle, |runner| runner.var("COUNTER").map(str::to_string))
        .unwrap();
    assert_eq!(counter.as_deref(), Some(NUM_SCRIPTS.to_string().as_str()));
}

#[test]
fn test_concurrent_create_and_release() {
    let bridge = Arc::new(counting_bridge());

    let handles: Vec<_> = (0..NUM_SCRIPTS)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let handle = bridge.create_context().unwrap();
                bridge.release_context(handle).unwrap();
                handle
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(bridge.contexts().is_empty());
}
