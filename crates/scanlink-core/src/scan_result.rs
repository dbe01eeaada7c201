//! Background acquisitions.
//!
//! [`ScanResult`] is the handle of a scan running on a worker thread. It
//! can be polled, waited on or stopped. Exactly one of the two callbacks
//! given at spawn time runs, once, on the chosen [`Dispatcher`]:
//! `on_complete` with the image or `on_failure` with the error. A panic
//! in the scan itself reaches `on_failure` as [`Error::Internal`]. Errors
//! are only delivered through `on_failure`; [`ScanResult::wait`] yields
//! `None` for a failed scan.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::image::Image;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A callback waiting to be run
pub type Job = Box<dyn FnOnce() + Send>;

/// Decides which thread runs scan callbacks.
pub trait Dispatcher: Send + Sync {
    /// Runs or schedules the job
    fn dispatch(&self, job: Job);
}

/// Runs callbacks directly on the scan worker
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Queues callbacks until the owning thread drains them.
///
/// Useful when callbacks must run on a specific thread, such as a UI
/// event loop.
pub struct QueueDispatcher {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
}

impl QueueDispatcher {
    /// Creates an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Runs every queued callback and returns how many ran
    pub fn run_pending(&self) -> usize {
        let receiver = self.receiver.lock();
        let mut ran = 0;
        while let Ok(job) = receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for one callback and runs it
    pub fn run_next(&self, timeout: Duration) -> bool {
        let job = self.receiver.lock().recv_timeout(timeout);
        match job {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for QueueDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!("scan callback dropped, dispatcher queue is gone");
        }
    }
}

enum Slot {
    Running,
    Finished(Option<Image>),
}

struct Shared {
    slot: Mutex<Slot>,
    done: Condvar,
}

impl Shared {
    fn finish(&self, image: Option<Image>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Running) {
            *slot = Slot::Finished(image);
            self.done.notify_all();
        }
    }
}

/// Marks the scan finished even if a callback unwinds
struct Completion(Arc<Shared>);

impl Drop for Completion {
    fn drop(&mut self) {
        self.0.finish(None);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    format!("scan worker panicked: {}", detail)
}

/// Handle of a scan running in the background
pub struct ScanResult {
    shared: Arc<Shared>,
    token: CancelToken,
}

impl ScanResult {
    /// Runs `job` on a new worker thread.
    ///
    /// The job receives the token that [`stop_scanning`](Self::stop_scanning)
    /// signals.
    pub fn spawn<F, C, E>(
        token: CancelToken,
        dispatcher: Arc<dyn Dispatcher>,
        job: F,
        on_complete: C,
        on_failure: E,
    ) -> Result<Self>
    where
        F: FnOnce(&CancelToken) -> Result<Image> + Send + 'static,
        C: FnOnce(Image) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Running),
            done: Condvar::new(),
        });
        let completion = Completion(Arc::clone(&shared));
        let worker_token = token.clone();

        std::thread::Builder::new()
            .name("scanlink-scan".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&worker_token)))
                    .unwrap_or_else(|payload| Err(Error::internal(panic_message(&*payload))));
                match outcome {
                    Ok(image) => {
                        debug!("background scan finished");
                        let stored = image.clone();
                        dispatcher.dispatch(Box::new(move || on_complete(image)));
                        completion.0.finish(Some(stored));
                    }
                    Err(e) => {
                        debug!("background scan failed: {}", e);
                        dispatcher.dispatch(Box::new(move || on_failure(e)));
                        completion.0.finish(None);
                    }
                }
            })?;

        Ok(Self { shared, token })
    }

    /// Returns true once the scan has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Finished(_))
    }

    /// Blocks until the scan finishes and returns the image, if any
    pub fn wait(&self) -> Option<Image> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Slot::Finished(image) = &*slot {
                return image.clone();
            }
            self.shared.done.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `None` on timeout, `Some(None)` for a failed scan.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Option<Image>> {
        let mut slot = self.shared.slot.lock();
        if matches!(*slot, Slot::Running) {
            self.shared.done.wait_for(&mut slot, timeout);
        }
        match &*slot {
            Slot::Finished(image) => Some(image.clone()),
            Slot::Running => None,
        }
    }

    /// Asks the scan to stop; the failure callback receives
    /// [`Error::Cancelled`]
    pub fn stop_scanning(&self) {
        debug!("stopping background scan");
        self.token.cancel();
    }

    /// Token observed by the worker
    pub fn cancel_token(&self) -> &CancelToken {
        &self.token
    }
}

impl std::fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanResult")
            .field("finished", &self.is_finished())
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ByteOrder, ImageConfig, ImageLayout};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tiny_image() -> Image {
        let layout = ImageLayout {
            width: 2,
            lines: 1,
            depth: 8,
            color: false,
            byte_order: ByteOrder::BigEndian,
        };
        Image::assemble(Bytes::from_static(&[1, 2]), layout, &ImageConfig::new()).unwrap()
    }

    #[test]
    fn test_success_runs_complete_callback_once() {
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let (c, f) = (Arc::clone(&completed), Arc::clone(&failed));

        let result = ScanResult::spawn(
            CancelToken::new(),
            Arc::new(InlineDispatcher),
            |_| Ok(tiny_image()),
            move |image| {
                assert_eq!(image.width(), 2);
                c.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        let image = result.wait().unwrap();
        assert_eq!(image.data().as_ref(), &[1, 2]);
        assert!(result.is_finished());
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_only_reaches_callback() {
        let failure = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);

        let result = ScanResult::spawn(
            CancelToken::new(),
            Arc::new(InlineDispatcher),
            |_| Err(Error::status(7)),
            |_| panic!("scan must not complete"),
            move |e| *slot.lock() = Some(e.to_string()),
        )
        .unwrap();

        assert!(result.wait().is_none());
        assert!(failure.lock().as_deref().unwrap().contains("out of documents"));
    }

    #[test]
    fn test_stop_scanning_cancels_worker() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cancelled);

        let result = ScanResult::spawn(
            CancelToken::new(),
            Arc::new(InlineDispatcher),
            |token| {
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(Error::Cancelled)
            },
            |_| {},
            move |e| {
                if matches!(e, Error::Cancelled) {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

        assert_eq!(result.wait_timeout(Duration::from_millis(20)), None);
        assert!(!result.is_finished());
        result.stop_scanning();
        assert!(result.wait().is_none());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_dispatcher_runs_on_caller_thread() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let ran_on = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_on);

        let result = ScanResult::spawn(
            CancelToken::new(),
            dispatcher.clone(),
            |_| Ok(tiny_image()),
            move |_| *slot.lock() = Some(std::thread::current().id()),
            |_| {},
        )
        .unwrap();

        assert!(result.wait().is_some());
        assert!(ran_on.lock().is_none());
        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(*ran_on.lock(), Some(std::thread::current().id()));
        assert_eq!(dispatcher.run_pending(), 0);
    }

    #[test]
    fn test_panicking_job_reports_failure() {
        let failure = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);

        let result = ScanResult::spawn(
            CancelToken::new(),
            Arc::new(InlineDispatcher),
            |_| panic!("worker blew up"),
            |_| panic!("scan must not complete"),
            move |e| *slot.lock() = Some(e),
        )
        .unwrap();

        assert!(result.wait().is_none());
        let failure = failure.lock();
        let err = failure.as_ref().unwrap();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("worker blew up"));
    }

    #[test]
    fn test_panicking_callback_still_finishes() {
        let result = ScanResult::spawn(
            CancelToken::new(),
            Arc::new(InlineDispatcher),
            |_| Err(Error::Cancelled),
            |_| {},
            |_| panic!("callback blew up"),
        )
        .unwrap();
        assert!(result.wait().is_none());
    }
}
