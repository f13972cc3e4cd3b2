//! Per-output paint threads.
//!
//! All compositor state lives behind one [`GlobalLock`]. A paint thread holds
//! the lock for a whole paint cycle and releases it between cycles. Mode
//! changes on an output with a paint thread are handed to that thread: the
//! requester queues the mode, wakes the thread and waits on the condition
//! variable until the thread acknowledges. A paint thread must never wait for
//! itself, so mode changes requested from one are rejected.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::compositor::Compositor;
use crate::error::{CompositorError, Result};

use super::{Mode, OutputId, OutputState};

thread_local! {
    static PAINT_THREAD_OUTPUT: Cell<Option<OutputId>> = const { Cell::new(None) };
}

/// The output whose paint thread is the current thread, if any.
pub fn current_paint_output() -> Option<OutputId> {
    PAINT_THREAD_OUTPUT.with(Cell::get)
}

/// The compositor behind a mutex, with a condition variable paint threads and
/// mode change requesters wait on.
pub struct GlobalLock {
    state: Mutex<Compositor>,
    cond: Condvar,
}

/// Exclusive access to the compositor. Dropping it wakes every paint thread so
/// they notice new work.
pub struct CompositorGuard<'a> {
    guard: MutexGuard<'a, Compositor>,
    cond: &'a Condvar,
}

impl Deref for CompositorGuard<'_> {
    type Target = Compositor;

    fn deref(&self) -> &Compositor {
        &self.guard
    }
}

impl DerefMut for CompositorGuard<'_> {
    fn deref_mut(&mut self) -> &mut Compositor {
        &mut self.guard
    }
}

impl Drop for CompositorGuard<'_> {
    fn drop(&mut self) {
        self.cond.notify_all();
    }
}

impl GlobalLock {
    pub fn new(compositor: Compositor) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(compositor), cond: Condvar::new() })
    }

    pub fn lock(&self) -> CompositorGuard<'_> {
        CompositorGuard { guard: self.state.lock(), cond: &self.cond }
    }

    /// Runs `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut Compositor) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Changes the mode of an output and waits until it took effect.
    ///
    /// Without a paint thread the mode is applied directly. With one, the
    /// request is queued for that thread and the caller blocks until it is
    /// acknowledged. Calling this from a paint thread fails with
    /// [`CompositorError::ModeChangeFromPaintThread`] instead of deadlocking.
    pub fn change_mode(&self, output: OutputId, mode: Mode) -> Result<()> {
        if current_paint_output().is_some() {
            tracing::error!(%output, "Mode change requested from a paint thread");
            return Err(CompositorError::ModeChangeFromPaintThread { output });
        }
        let mut guard = self.state.lock();
        let target = {
            let out = guard.outputs.get_mut(&output).ok_or(CompositorError::UnknownOutput(output))?;
            if out.state != OutputState::Initialized {
                return Err(CompositorError::InvalidOutputState { output, state: out.state, operation: "change_mode" });
            }
            if out.paint_thread.is_none() {
                return guard.change_mode(output, mode);
            }
            out.pending_mode = Some(mode);
            out.mode_generation += 1;
            out.mode_generation
        };
        tracing::debug!(%output, %mode, generation = target, "Handing mode change to paint thread");
        self.cond.notify_all();

        loop {
            let out = guard.outputs.get_mut(&output).ok_or(CompositorError::UnknownOutput(output))?;
            if out.mode_ack >= target {
                let result = out.mode_result.take().unwrap_or(Ok(()));
                return result.map_err(CompositorError::from);
            }
            if out.paint_thread.is_none() {
                // The paint thread stopped before picking the request up.
                out.pending_mode = None;
                out.mode_ack = target;
                return guard.change_mode(output, mode);
            }
            self.cond.wait(&mut guard);
        }
    }
}

impl Compositor {
    /// Whether the paint thread of `id` has anything to do.
    fn has_paint_work(&self, id: OutputId) -> bool {
        self.outputs.get(&id).is_some_and(|output| {
            output.repaint_pending
                || output.pending_mode.is_some()
                || matches!(output.state, OutputState::PendingInitialize | OutputState::PendingUninitialize)
        })
    }

    /// One cycle of a paint thread: finish a pending transition, apply a
    /// queued mode, then repaint.
    fn run_paint_cycle(&mut self, id: OutputId) {
        if let Err(err) = self.complete_output_transition(id) {
            tracing::error!(output = %id, %err, "Output transition failed");
        }
        if let Some(output) = self.outputs.get_mut(&id) {
            if let Some(mode) = output.pending_mode.take() {
                let result = if output.state == OutputState::Initialized {
                    output.apply_mode(mode)
                } else {
                    Err(crate::error::BackendError::Device(format!("{} is not initialized", output.name())))
                };
                output.mode_result = Some(result);
                output.mode_ack = output.mode_generation;
            }
        }
        let repaint_pending = self.outputs.get(&id).is_some_and(|o| o.repaint_pending);
        if repaint_pending {
            if let Err(err) = self.repaint_output(id) {
                tracing::error!(output = %id, %err, "Repaint failed");
            }
        }
    }
}

/// A paint thread bound to one output.
pub struct OutputWorker {
    output: OutputId,
    shutdown: Arc<AtomicBool>,
    lock: Arc<GlobalLock>,
    handle: Option<JoinHandle<()>>,
}

impl OutputWorker {
    pub fn spawn(lock: Arc<GlobalLock>, output: OutputId) -> Result<Self> {
        {
            let guard = lock.state.lock();
            let out = guard.outputs.get(&output).ok_or(CompositorError::UnknownOutput(output))?;
            if out.paint_thread.is_some() {
                return Err(CompositorError::InvalidOutputState {
                    output,
                    state: out.state,
                    operation: "bind a second paint thread",
                });
            }
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name(format!("paint-{output}"))
            .spawn({
                let lock = Arc::clone(&lock);
                let shutdown = Arc::clone(&shutdown);
                move || paint_loop(&lock, output, &shutdown)
            })
            .map_err(CompositorError::ThreadSpawn)?;

        // Wait until the thread registered itself so callers see it bound.
        let mut guard = lock.state.lock();
        while guard.outputs.get(&output).is_some_and(|o| o.paint_thread.is_none()) && !handle.is_finished() {
            lock.cond.wait(&mut guard);
        }
        drop(guard);
        tracing::info!(%output, "Paint thread started");
        Ok(Self { output, shutdown, lock, handle: Some(handle) })
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    /// Stops the thread after its current cycle and waits for it.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let _guard = self.lock.state.lock();
            self.shutdown.store(true, Ordering::Release);
            self.lock.cond.notify_all();
        }
        if handle.join().is_err() {
            tracing::error!(output = %self.output, "Paint thread panicked");
            let mut guard = self.lock.state.lock();
            if let Some(out) = guard.outputs.get_mut(&self.output) {
                out.paint_thread = None;
            }
            self.lock.cond.notify_all();
        }
        tracing::info!(output = %self.output, "Paint thread stopped");
    }
}

impl std::fmt::Debug for OutputWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWorker")
            .field("output", &self.output)
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for OutputWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn paint_loop(lock: &GlobalLock, output: OutputId, shutdown: &AtomicBool) {
    PAINT_THREAD_OUTPUT.with(|current| current.set(Some(output)));
    let mut guard = lock.state.lock();
    match guard.outputs.get_mut(&output) {
        Some(out) => out.paint_thread = Some(thread::current().id()),
        None => return,
    }
    lock.cond.notify_all();

    loop {
        if shutdown.load(Ordering::Acquire) || !guard.outputs.contains_key(&output) {
            break;
        }
        if !guard.has_paint_work(output) {
            lock.cond.wait(&mut guard);
            continue;
        }
        guard.run_paint_cycle(output);
        lock.cond.notify_all();
        MutexGuard::unlocked(&mut guard, thread::yield_now);
    }

    if let Some(out) = guard.outputs.get_mut(&output) {
        out.paint_thread = None;
    }
    lock.cond.notify_all();
    PAINT_THREAD_OUTPUT.with(|current| current.set(None));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::output::{
        BackendCapabilities, GammaTable, OutputBackend, OutputConfig, PaintFrame, RenderTarget,
    };
    use crate::region::Region;
    use parking_lot::Mutex as PlMutex;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use stratum_core::CompositorConfig;

    /// Tries to change the mode from inside `set_mode`, which runs on the paint thread.
    struct ReentrantBackend {
        lock: Arc<PlMutex<Option<Arc<GlobalLock>>>>,
        output: Arc<PlMutex<Option<OutputId>>>,
        reentry: mpsc::Sender<Result<()>>,
    }

    impl OutputBackend for ReentrantBackend {
        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities { damage_tracking: true, ..Default::default() }
        }

        fn modes(&self) -> Vec<Mode> {
            vec![Mode { preferred: true, ..Mode::new(640, 480, 60_000) }, Mode::new(1280, 720, 60_000)]
        }

        fn set_mode(&mut self, mode: &Mode) -> Result<(), BackendError> {
            if mode.size.width == 1280 {
                let lock = self.lock.lock().clone();
                let output = *self.output.lock();
                if let (Some(lock), Some(output)) = (lock, output) {
                    let _ = self.reentry.send(lock.change_mode(output, Mode::new(640, 480, 60_000)));
                }
            }
            Ok(())
        }

        fn begin_frame(&mut self, _target: RenderTarget) -> Result<(), BackendError> {
            Ok(())
        }

        fn render_elements(&mut self, _frame: &PaintFrame<'_>) -> Result<(), BackendError> {
            Ok(())
        }

        fn downsample(&mut self, _damage: Option<&Region>) -> Result<(), BackendError> {
            Ok(())
        }

        fn present(&mut self, _damage: Option<&Region>) -> Result<(), BackendError> {
            Ok(())
        }

        fn set_gamma(&mut self, _table: &GammaTable) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn setup() -> (Arc<GlobalLock>, OutputId, mpsc::Receiver<Result<()>>) {
        let lock_slot = Arc::new(PlMutex::new(None));
        let output_slot = Arc::new(PlMutex::new(None));
        let (tx, rx) = mpsc::channel();
        let backend = ReentrantBackend { lock: Arc::clone(&lock_slot), output: Arc::clone(&output_slot), reentry: tx };
        let mut compositor = Compositor::new(CompositorConfig::default());
        let output = compositor.add_output(OutputConfig::new("HDMI-A-1"), Box::new(backend));
        compositor.initialize_output(output).unwrap();
        let lock = GlobalLock::new(compositor);
        *lock_slot.lock() = Some(Arc::clone(&lock));
        *output_slot.lock() = Some(output);
        (lock, output, rx)
    }

    #[test]
    fn test_mode_change_without_paint_thread_is_direct() {
        let (lock, output, _rx) = setup();
        lock.change_mode(output, Mode::new(640, 480, 60_000)).unwrap();
        assert_eq!(lock.lock().output(output).unwrap().logical_size().width, 640);
    }

    #[test]
    fn test_mode_change_is_handed_to_paint_thread() {
        let (lock, output, rx) = setup();
        let worker = OutputWorker::spawn(Arc::clone(&lock), output).unwrap();
        assert!(lock.lock().output(output).unwrap().paint_thread().is_some());

        lock.change_mode(output, Mode::new(1280, 720, 60_000)).unwrap();
        assert_eq!(lock.lock().output(output).unwrap().mode().map(|m| m.size.width), Some(1280));

        let reentry = rx.recv().unwrap();
        assert!(matches!(reentry, Err(CompositorError::ModeChangeFromPaintThread { .. })));

        worker.stop();
        assert!(lock.lock().output(output).unwrap().paint_thread().is_none());
    }

    #[test]
    fn test_unsupported_mode_is_reported_to_requester() {
        let (lock, output, _rx) = setup();
        let worker = OutputWorker::spawn(Arc::clone(&lock), output).unwrap();
        let err = lock.change_mode(output, Mode::new(3840, 2160, 60_000)).unwrap_err();
        assert!(matches!(err, CompositorError::Backend(BackendError::UnsupportedMode(_))));
        worker.stop();
    }

    #[test]
    fn test_direct_mode_change_rejected_while_thread_bound() {
        let (lock, output, _rx) = setup();
        let worker = OutputWorker::spawn(Arc::clone(&lock), output).unwrap();
        let err = lock.with(|c| c.change_mode(output, Mode::new(640, 480, 60_000))).unwrap_err();
        assert!(matches!(err, CompositorError::InvalidOutputState { .. }));
        worker.stop();
    }

    #[test]
    fn test_second_worker_is_rejected() {
        let (lock, output, _rx) = setup();
        let worker = OutputWorker::spawn(Arc::clone(&lock), output).unwrap();
        assert!(OutputWorker::spawn(Arc::clone(&lock), output).is_err());
        worker.stop();
    }

    #[test]
    fn test_paint_thread_repaints_damage() {
        let (lock, output, _rx) = setup();
        let worker = OutputWorker::spawn(Arc::clone(&lock), output).unwrap();
        lock.with(|c| c.damage_output(output)).unwrap();
        let mut guard = lock.lock();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while guard.output(output).unwrap().frames_presented() == 0 && std::time::Instant::now() < deadline {
            MutexGuard::unlocked(&mut guard.guard, || thread::sleep(std::time::Duration::from_millis(1)));
        }
        assert!(guard.output(output).unwrap().frames_presented() > 0);
        drop(guard);
        worker.stop();
    }
}
