//! Deadline scheduling shared by every moving entity of one actor.
//!
//! [`DeadlineQueue`] is the plain data structure: a min-heap of deadlines
//! with at most one live entry per key. [`Scheduler`] runs one timer thread
//! over such a queue and delivers fired keys into a channel, so the owning
//! actor can merge its timer events with its regular mailbox.

use crate::error::WorkerError;
use crossbeam::channel::{after, bounded, never, select, Receiver, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

/// Min-heap of `(deadline, key)` where scheduling a key again replaces its
/// previous deadline.
#[derive(Debug)]
pub struct DeadlineQueue<K> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    keys: HashMap<u64, K>,
    live: HashMap<K, u64>,
    next_seq: u64,
}

impl<K> Default for DeadlineQueue<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            keys: HashMap::new(),
            live: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Clone + Eq + Hash> DeadlineQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: K, deadline: Instant) {
        self.cancel(&key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq)));
        self.keys.insert(seq, key.clone());
        self.live.insert(key, seq);
    }

    /// Returns `true` if the key had a pending deadline.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.live.remove(key) {
            Some(seq) => {
                self.keys.remove(&seq);
                true
            }
            None => false,
        }
    }

    /// Earliest pending deadline, discarding cancelled heap entries.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, seq))) = self.heap.peek().copied() {
            if self.keys.contains_key(&seq) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(deadline) = self.next_deadline() {
            if deadline > now {
                break;
            }
            if let Some(Reverse((_, seq))) = self.heap.pop() {
                if let Some(key) = self.keys.remove(&seq) {
                    self.live.remove(&key);
                    due.push(key);
                }
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

enum Control<K> {
    Schedule(K, Instant),
    Cancel(K),
}

/// Cloneable handle used to schedule and cancel keys.
pub struct SchedulerHandle<K> {
    control: Sender<Control<K>>,
}

impl<K> Clone for SchedulerHandle<K> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
        }
    }
}

impl<K: Send + 'static> SchedulerHandle<K> {
    /// Schedules `key` to fire at `deadline`, replacing an earlier schedule
    /// of the same key. Returns `false` once the scheduler has stopped.
    pub fn schedule(&self, key: K, deadline: Instant) -> bool {
        self.control.send(Control::Schedule(key, deadline)).is_ok()
    }

    /// Cancels a pending key. Cancelling an unknown key is a no-op.
    pub fn cancel(&self, key: K) -> bool {
        self.control.send(Control::Cancel(key)).is_ok()
    }
}

/// One timer thread firing keys into `output`.
pub struct Scheduler<K> {
    handle: SchedulerHandle<K>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl<K> Scheduler<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Starts the timer thread. Fired keys are sent to `output`; a full
    /// output channel delays later firings but never drops one.
    pub fn start(name: &str, output: Sender<K>) -> Result<Self, WorkerError> {
        let (control_tx, control_rx) = bounded(256);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_timer(control_rx, stop_rx, output))
            .map_err(|source| WorkerError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            handle: SchedulerHandle {
                control: control_tx,
            },
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> SchedulerHandle<K> {
        self.handle.clone()
    }

    /// Stops the timer thread and waits for it. Pending keys are dropped.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

enum Wake<K> {
    Control(Control<K>),
    Due,
    Exit,
}

fn run_timer<K>(control: Receiver<Control<K>>, stop: Receiver<()>, output: Sender<K>)
where
    K: Clone + Eq + Hash + Send + 'static,
{
    let mut queue = DeadlineQueue::new();

    loop {
        let timeout = match queue.next_deadline() {
            Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
            None => never(),
        };

        let wake = select! {
            recv(stop) -> _ => Wake::Exit,
            recv(control) -> message => match message {
                Ok(message) => Wake::Control(message),
                Err(_) => Wake::Exit,
            },
            recv(timeout) -> _ => Wake::Due,
        };

        match wake {
            Wake::Exit => break,
            Wake::Control(Control::Schedule(key, deadline)) => queue.push(key, deadline),
            Wake::Control(Control::Cancel(key)) => {
                queue.cancel(&key);
            }
            Wake::Due => {
                for key in queue.pop_due(Instant::now()) {
                    let delivered = select! {
                        send(output, key) -> sent => sent.is_ok(),
                        recv(stop) -> _ => false,
                    };
                    if !delivered {
                        debug!("timer output closed");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn deadline_queue_orders_and_replaces() {
        let base = Instant::now();
        let mut queue = DeadlineQueue::new();
        queue.push("b", base + Duration::from_millis(20));
        queue.push("a", base + Duration::from_millis(10));
        queue.push("c", base + Duration::from_millis(30));
        queue.push("b", base + Duration::from_millis(40));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_deadline(), Some(base + Duration::from_millis(10)));
        assert_eq!(queue.pop_due(base + Duration::from_millis(35)), vec!["a", "c"]);
        assert!(queue.cancel(&"b"));
        assert!(!queue.cancel(&"b"));
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn scheduler_fires_in_deadline_order_and_honours_cancel() {
        let (tx, rx) = bounded(16);
        let mut scheduler = Scheduler::start("test-timer", tx).unwrap();
        let handle = scheduler.handle();
        let now = Instant::now();

        handle.schedule(3u32, now + Duration::from_millis(60));
        handle.schedule(1u32, now + Duration::from_millis(20));
        handle.schedule(2u32, now + Duration::from_millis(40));
        handle.cancel(2u32);

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(3));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        scheduler.stop();
        assert!(!handle.schedule(4, Instant::now()));
    }
}
