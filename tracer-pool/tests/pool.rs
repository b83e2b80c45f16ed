use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use tracer_pool::{Scene, SliceError, SliceFault, WorkerPool};

/// Records every slice call as `(render, index, phase)`.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(bool, usize, u8)>>,
}

impl Recorder {
    fn phase(&self, phase: u8) -> Vec<(bool, usize, u8)> {
        self.calls.lock().iter().copied().filter(|c| c.2 == phase).collect()
    }
}

impl Scene for Recorder {
    fn update_slice(&self, index: usize, phase: u8) -> Result<(), SliceError> {
        self.calls.lock().push((false, index, phase));
        Ok(())
    }

    fn render_slice(&self, index: usize, phase: u8) -> Result<(), SliceError> {
        self.calls.lock().push((true, index, phase));
        Ok(())
    }
}

/// Worker `bad` fails in phase `fault_phase`, after every worker has
/// started that phase's slice.
struct Faulty {
    inner: Recorder,
    bad: usize,
    fault_phase: u8,
    rendezvous: Barrier,
}

impl Faulty {
    fn new(threads: usize, bad: usize, fault_phase: u8) -> Self {
        Self {
            inner: Recorder::default(),
            bad,
            fault_phase,
            rendezvous: Barrier::new(threads),
        }
    }
}

impl Scene for Faulty {
    fn update_slice(&self, index: usize, phase: u8) -> Result<(), SliceError> {
        self.inner.update_slice(index, phase)
    }

    fn render_slice(&self, index: usize, phase: u8) -> Result<(), SliceError> {
        self.inner.render_slice(index, phase)?;
        if phase == self.fault_phase {
            self.rendezvous.wait();
            if index == self.bad {
                return Err(format!("slice {index} hit a degenerate triangle").into());
            }
        }
        Ok(())
    }
}

#[test]
fn every_worker_runs_once_per_round() {
    let scene = Arc::new(Recorder::default());
    let pool = WorkerPool::new(4, scene.clone()).unwrap();
    pool.render_scene(10);
    pool.render_scene(20);
    assert!(pool.terminate().is_empty());

    let calls = scene.calls.lock();
    assert_eq!(calls.len(), 8);
    for phase in [10, 20] {
        let indices: BTreeSet<usize> = calls
            .iter()
            .filter(|c| c.2 == phase)
            .map(|c| {
                assert!(c.0, "render round called update_slice");
                c.1
            })
            .collect();
        assert_eq!(indices, (0..4).collect());
    }
}

#[test]
fn update_and_render_share_the_pool() {
    let scene = Arc::new(Recorder::default());
    let pool = WorkerPool::new(2, scene.clone()).unwrap();
    pool.update_scene(0);
    pool.render_scene(1);
    pool.update_scene(255);
    drop(pool);

    assert_eq!(scene.phase(0).iter().filter(|c| !c.0).count(), 2);
    assert_eq!(scene.phase(1).iter().filter(|c| c.0).count(), 2);
    assert_eq!(scene.phase(255).len(), 2);
}

#[test]
fn fault_is_contained_to_its_round() {
    let scene = Arc::new(Faulty::new(4, 2, 5));
    let pool = WorkerPool::new(4, scene.clone()).unwrap();
    pool.render_scene(4);
    assert!(!pool.failed());
    pool.render_scene(5);
    assert!(pool.failed());
    pool.render_scene(6);
    pool.update_scene(7);

    let faults = pool.terminate();
    assert_eq!(
        faults,
        [SliceFault {
            index: 2,
            cause: "slice 2 hit a degenerate triangle".to_owned(),
        }]
    );
    assert_eq!(scene.inner.phase(4).len(), 4);
    assert_eq!(scene.inner.phase(5).len(), 4);
    assert!(scene.inner.phase(6).is_empty());
    assert!(scene.inner.phase(7).is_empty());
}

#[test]
fn failed_pool_still_meets_barriers() {
    let scene = Arc::new(Faulty::new(3, 0, 0));
    let pool = WorkerPool::new(3, scene.clone()).unwrap();
    pool.render_scene(0);
    for phase in 1..50 {
        pool.render_scene(phase);
    }
    assert_eq!(scene.inner.calls.lock().len(), 3);
    let faults = pool.terminate();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].index, 0);
}

#[test]
fn single_worker_pool() {
    let scene = Arc::new(Recorder::default());
    let pool = WorkerPool::new(1, scene.clone()).unwrap();
    pool.render_scene(3);
    assert!(pool.terminate().is_empty());
    assert_eq!(*scene.calls.lock(), [(true, 0, 3)]);
}

#[test]
fn rounds_from_several_threads_do_not_interleave() {
    let scene = Arc::new(Recorder::default());
    let pool = WorkerPool::new(2, scene.clone()).unwrap();
    std::thread::scope(|s| {
        for phase in [1u8, 2] {
            let pool = &pool;
            s.spawn(move || {
                for _ in 0..200 {
                    pool.render_scene(phase);
                }
            });
        }
    });
    assert!(pool.terminate().is_empty());

    let calls = scene.calls.lock();
    assert_eq!(calls.len(), 800);
    for phase in [1u8, 2] {
        for index in 0..2 {
            let n = calls.iter().filter(|c| c.2 == phase && c.1 == index).count();
            assert_eq!(n, 200, "phase {phase} worker {index}");
        }
    }
}
