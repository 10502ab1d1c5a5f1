//! Compute/present/mutation coordination.
//!
//! One shared mutex is held for the duration of a compute pass, a present
//! pass or a mutation, so at most one of the three runs at a time. The
//! atomic flags implement the rest of the discipline: `present_sync` is the
//! present thread's priority claim, raised before it contends for the
//! mutex; `compute_wait` marks the readiness barrier, which polls executors
//! without the mutex and must drain before a mutation may touch them; the
//! halt flags keep both loops from re-entering while a mutation is pending.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct Coordinator {
    shared: Mutex<()>,
    compute_cv: Condvar,
    present_cv: Condvar,
    quiesce: Mutex<()>,
    quiesce_cv: Condvar,
    compute_sync: AtomicBool,
    present_sync: AtomicBool,
    compute_halt: AtomicBool,
    present_halt: AtomicBool,
    compute_wait: AtomicBool,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator {
            shared: Mutex::new(()),
            compute_cv: Condvar::new(),
            present_cv: Condvar::new(),
            quiesce: Mutex::new(()),
            quiesce_cv: Condvar::new(),
            compute_sync: AtomicBool::new(false),
            present_sync: AtomicBool::new(false),
            compute_halt: AtomicBool::new(false),
            present_halt: AtomicBool::new(false),
            compute_wait: AtomicBool::new(false),
        }
    }

    pub fn compute_halted(&self) -> bool {
        self.compute_halt.load(Ordering::SeqCst)
    }

    pub fn present_halted(&self) -> bool {
        self.present_halt.load(Ordering::SeqCst)
    }

    /// Marks the compute thread as inside its readiness barrier. Must be
    /// set before the halt check so a concurrent fence either sees the
    /// barrier and waits, or the barrier sees the halt and backs out.
    pub fn enter_barrier(&self) {
        self.compute_wait.store(true, Ordering::SeqCst);
    }

    pub fn leave_barrier(&self) {
        let _quiesce = self.quiesce.lock();
        self.compute_wait.store(false, Ordering::SeqCst);
        self.quiesce_cv.notify_all();
    }

    /// Parks the compute thread until a pending mutation clears its halt.
    pub fn wait_compute_resume(&self) {
        let mut quiesce = self.quiesce.lock();
        while self.compute_halt.load(Ordering::SeqCst) {
            self.quiesce_cv.wait(&mut quiesce);
        }
    }

    /// Begins a compute pass: waits out the present thread's priority
    /// claim, then takes the pass token. The returned guard is held for the
    /// whole pass.
    pub fn begin_compute(&self) -> MutexGuard<'_, ()> {
        let mut shared = self.shared.lock();
        while self.present_sync.load(Ordering::SeqCst) {
            self.compute_cv.wait(&mut shared);
        }
        self.compute_sync.store(true, Ordering::SeqCst);
        shared
    }

    pub fn end_compute(&self, shared: MutexGuard<'_, ()>) {
        self.compute_sync.store(false, Ordering::SeqCst);
        self.present_cv.notify_all();
        drop(shared);
    }

    /// Begins a present pass. The priority claim is raised before
    /// contending for the mutex, so a compute loop waiting to start its
    /// next pass yields first.
    pub fn begin_present(&self) -> MutexGuard<'_, ()> {
        self.present_sync.store(true, Ordering::SeqCst);
        let mut shared = self.shared.lock();
        while self.compute_sync.load(Ordering::SeqCst) {
            self.present_cv.wait(&mut shared);
        }
        shared
    }

    pub fn end_present(&self, shared: MutexGuard<'_, ()>) {
        self.present_sync.store(false, Ordering::SeqCst);
        self.compute_cv.notify_all();
        drop(shared);
    }

    /// Runs `f` with both worker loops quiesced: halts raised, the
    /// readiness barrier drained, the shared mutex held and both sync flags
    /// set so neither loop can advance until the fence lifts.
    pub fn fence<R>(&self, f: impl FnOnce() -> R) -> R {
        self.compute_halt.store(true, Ordering::SeqCst);
        self.present_halt.store(true, Ordering::SeqCst);

        {
            let mut quiesce = self.quiesce.lock();
            while self.compute_wait.load(Ordering::SeqCst) {
                self.quiesce_cv.wait(&mut quiesce);
            }
        }

        let shared = self.shared.lock();
        self.compute_sync.store(true, Ordering::SeqCst);
        self.present_sync.store(true, Ordering::SeqCst);

        let result = f();

        self.compute_sync.store(false, Ordering::SeqCst);
        self.present_sync.store(false, Ordering::SeqCst);
        self.compute_cv.notify_all();
        self.present_cv.notify_all();
        drop(shared);

        let _quiesce = self.quiesce.lock();
        self.compute_halt.store(false, Ordering::SeqCst);
        self.present_halt.store(false, Ordering::SeqCst);
        self.quiesce_cv.notify_all();

        result
    }
}
