//! # Worker - a named thread draining one mailbox
//!
//! A [`Worker`] owns exactly one OS thread. The thread fetches one message at
//! a time from its [`Mailbox`] and hands it to a [`Handler`] synchronously,
//! so a handler never runs concurrently with itself and may treat its own
//! state as exclusively owned.
//!
//! ## Termination
//!
//! The loop exits when
//!
//! * the mailbox reports it is closed or failed,
//! * the handler recognises a poison message,
//! * [`Worker::stop`] was requested.
//!
//! [`Handler::notify_termination`] runs exactly once on the worker thread
//! after the loop exits. A purposeful stop only notifies when
//! [`StopOptions::notify_on_purposeful_stop`] was set.
//!
//! ## Stopping
//!
//! `stop` is idempotent and may be called from any thread, including the
//! worker's own thread while it is handling a message. It returns once the
//! thread has exited, except when called from the worker thread itself.
//! A message that was already fetched is always handled to completion.

use crate::error::{FetchError, WorkerError};
use crate::mailbox::Mailbox;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Per-message behaviour of a worker.
pub trait Handler: Send + 'static {
    type Message;

    fn handle_message(&mut self, message: Self::Message);

    /// Returns `true` if `message` should end the loop instead of being
    /// handled.
    fn is_poison(&self, _message: &Self::Message) -> bool {
        false
    }

    /// Called once on the worker thread after the loop has exited.
    fn notify_termination(&mut self, _termination: &Termination) {}
}

/// Why a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Stopped,
    MailboxClosed,
    Poisoned,
    Failed(String),
}

/// Options for [`Worker::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    /// Interrupt a fetch that is currently blocked. Without it the worker
    /// exits only after its next message arrives or its mailbox closes.
    pub interrupt_if_blocked: bool,
    /// Run `notify_termination` even though the stop was requested.
    pub notify_on_purposeful_stop: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            interrupt_if_blocked: true,
            notify_on_purposeful_stop: false,
        }
    }
}

struct Shared {
    name: String,
    stop_requested: AtomicBool,
    notify_on_stop: AtomicBool,
    running: AtomicBool,
    thread_id: OnceLock<ThreadId>,
    interrupt: Mutex<Option<Sender<()>>>,
    interrupt_rx: Receiver<()>,
    exit_signal: Mutex<Option<Sender<()>>>,
    exited: Receiver<()>,
}

/// Handle to a single-threaded message loop. Clones share the same thread.
#[derive(Clone)]
pub struct Worker {
    shared: Arc<Shared>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        let (interrupt, interrupt_rx) = bounded(0);
        let (exit_signal, exited) = bounded(0);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                stop_requested: AtomicBool::new(false),
                notify_on_stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                thread_id: OnceLock::new(),
                interrupt: Mutex::new(Some(interrupt)),
                interrupt_rx,
                exit_signal: Mutex::new(Some(exit_signal)),
                exited,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Fails if the worker was started before, was stopped before starting,
    /// or the thread could not be spawned.
    pub fn start<M, H>(&self, mailbox: M, handler: H) -> Result<(), WorkerError>
    where
        M: Mailbox,
        H: Handler<Message = M::Message>,
    {
        let mut exit_slot = self.shared.exit_signal.lock();
        if self.shared.stop_requested.load(Ordering::Acquire) {
            return Err(WorkerError::Stopped(self.shared.name.clone()));
        }
        let Some(exit_signal) = exit_slot.take() else {
            return Err(WorkerError::AlreadyStarted(self.shared.name.clone()));
        };

        let shared = Arc::clone(&self.shared);
        self.shared.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || run_loop(shared, mailbox, handler, exit_signal));

        match spawned {
            Ok(_) => {
                debug!(worker = %self.shared.name, "worker started");
                Ok(())
            }
            Err(source) => {
                self.shared.running.store(false, Ordering::Release);
                Err(WorkerError::Spawn {
                    name: self.shared.name.clone(),
                    source,
                })
            }
        }
    }

    /// Stops the worker. See the module docs for the exact guarantees.
    pub fn stop(&self, options: StopOptions) {
        if options.notify_on_purposeful_stop {
            self.shared.notify_on_stop.store(true, Ordering::Release);
        }
        let first = !self.shared.stop_requested.swap(true, Ordering::AcqRel);
        if options.interrupt_if_blocked {
            self.shared.interrupt.lock().take();
        }
        // never started: release waiters and refuse a later start
        self.shared.exit_signal.lock().take();

        if first {
            debug!(worker = %self.shared.name, "stop requested");
        }
        if self.is_current_thread() {
            return;
        }
        let _ = self.shared.exited.recv();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Whether the caller runs on this worker's thread.
    pub fn is_current_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }
}

fn run_loop<M, H>(shared: Arc<Shared>, mut mailbox: M, mut handler: H, exit_signal: Sender<()>)
where
    M: Mailbox,
    H: Handler<Message = M::Message>,
{
    let _ = shared.thread_id.set(thread::current().id());

    let termination = loop {
        if shared.stop_requested.load(Ordering::Acquire) {
            break Termination::Stopped;
        }
        match mailbox.fetch(&shared.interrupt_rx) {
            Ok(message) => {
                if handler.is_poison(&message) {
                    break Termination::Poisoned;
                }
                handler.handle_message(message);
            }
            Err(FetchError::Interrupted) => break Termination::Stopped,
            Err(FetchError::Closed) => break Termination::MailboxClosed,
            Err(FetchError::Failed(detail)) => break Termination::Failed(detail),
        }
    };

    let purposeful = shared.stop_requested.load(Ordering::Acquire);
    match &termination {
        Termination::Failed(detail) => warn!(worker = %shared.name, "worker failed: {detail}"),
        other => debug!(worker = %shared.name, reason = ?other, "worker loop exited"),
    }
    if !purposeful || shared.notify_on_stop.load(Ordering::Acquire) {
        handler.notify_termination(&termination);
    }

    drop(handler);
    drop(mailbox);
    shared.running.store(false, Ordering::Release);
    info!("🛑 Worker {} exited", shared.name);
    drop(exit_signal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        seen: Sender<u32>,
        terminations: Arc<AtomicUsize>,
        last: Arc<Mutex<Option<Termination>>>,
        stop_self_on: Option<(u32, Worker)>,
    }

    impl Recorder {
        fn new(seen: Sender<u32>) -> Self {
            Self {
                seen,
                terminations: Arc::new(AtomicUsize::new(0)),
                last: Arc::new(Mutex::new(None)),
                stop_self_on: None,
            }
        }
    }

    fn wait_until_exited(worker: &Worker) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while worker.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    impl Handler for Recorder {
        type Message = u32;

        fn handle_message(&mut self, message: u32) {
            let _ = self.seen.send(message);
            if let Some((trigger, worker)) = &self.stop_self_on {
                if *trigger == message {
                    worker.stop(StopOptions::default());
                    worker.stop(StopOptions::default());
                }
            }
        }

        fn is_poison(&self, message: &u32) -> bool {
            *message == 0
        }

        fn notify_termination(&mut self, termination: &Termination) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(termination.clone());
        }
    }

    #[test]
    fn handles_in_order_and_notifies_once_on_close() {
        let (tx, rx) = bounded::<u32>(4);
        let (seen_tx, seen_rx) = unbounded();
        let recorder = Recorder::new(seen_tx);
        let terminations = Arc::clone(&recorder.terminations);
        let last = Arc::clone(&recorder.last);

        let worker = Worker::new("test-close");
        worker.start(rx, recorder).unwrap();
        for n in 1..=3 {
            tx.send(n).unwrap();
        }
        drop(tx);

        let collected: Vec<u32> = seen_rx.iter().take(3).collect();
        assert_eq!(collected, vec![1, 2, 3]);

        wait_until_exited(&worker);
        assert!(!worker.is_running());
        worker.stop(StopOptions::default());
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock(), Some(Termination::MailboxClosed));
    }

    #[test]
    fn poison_message_ends_the_loop() {
        let (tx, rx) = bounded::<u32>(4);
        let (seen_tx, seen_rx) = unbounded();
        let recorder = Recorder::new(seen_tx);
        let last = Arc::clone(&recorder.last);

        let worker = Worker::new("test-poison");
        worker.start(rx, recorder).unwrap();
        tx.send(5).unwrap();
        tx.send(0).unwrap();
        tx.send(6).unwrap();

        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(1)), Ok(5));
        wait_until_exited(&worker);
        assert!(seen_rx.try_recv().is_err());
        assert_eq!(*last.lock(), Some(Termination::Poisoned));
    }

    #[test]
    fn stop_is_idempotent_across_threads() {
        let (_tx, rx) = bounded::<u32>(4);
        let (seen_tx, _seen_rx) = unbounded();
        let recorder = Recorder::new(seen_tx);
        let terminations = Arc::clone(&recorder.terminations);

        let worker = Worker::new("test-idempotent");
        worker.start(rx, recorder).unwrap();

        let stoppers: Vec<_> = (0..4)
            .map(|_| {
                let worker = worker.clone();
                thread::spawn(move || {
                    worker.stop(StopOptions {
                        interrupt_if_blocked: true,
                        notify_on_purposeful_stop: true,
                    })
                })
            })
            .collect();
        for stopper in stoppers {
            stopper.join().unwrap();
        }

        assert!(!worker.is_running());
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_from_own_thread_does_not_deadlock() {
        let (tx, rx) = bounded::<u32>(4);
        let (seen_tx, seen_rx) = unbounded();
        let worker = Worker::new("test-self-stop");
        let mut recorder = Recorder::new(seen_tx);
        recorder.stop_self_on = Some((2, worker.clone()));
        let terminations = Arc::clone(&recorder.terminations);

        worker.start(rx, recorder).unwrap();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();

        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(1)), Ok(1));
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(1)), Ok(2));
        wait_until_exited(&worker);
        worker.stop(StopOptions::default());
        assert!(seen_rx.try_recv().is_err());
        assert_eq!(terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_after_stop_is_refused() {
        let worker = Worker::new("test-never");
        worker.stop(StopOptions::default());

        let (_tx, rx) = bounded::<u32>(1);
        let (seen_tx, _seen_rx) = unbounded();
        assert!(matches!(
            worker.start(rx, Recorder::new(seen_tx)),
            Err(WorkerError::Stopped(_))
        ));
    }

    #[test]
    fn second_start_is_refused() {
        let worker = Worker::new("test-twice");
        let (_tx, rx) = bounded::<u32>(1);
        let (_tx2, rx2) = bounded::<u32>(1);
        let (seen_tx, _seen_rx) = unbounded();

        worker.start(rx, Recorder::new(seen_tx.clone())).unwrap();
        assert!(matches!(
            worker.start(rx2, Recorder::new(seen_tx)),
            Err(WorkerError::AlreadyStarted(_))
        ));
        worker.stop(StopOptions::default());
    }
}
