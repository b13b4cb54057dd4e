//! Ordered sources that can be merged by a [`Mux`](super::Mux).

use crate::error::SourceError;
use crossbeam::channel::{select, Receiver};

/// An ordered, blocking producer of items.
///
/// Each source added to a mux is driven by its own pump thread which calls
/// [`Source::pull`] in a loop. A pull returns `Ok(None)` once the source is
/// exhausted (end of stream, sender side dropped).
///
/// Sources backed by in-process channels should select on the `stop`
/// receiver so a close request interrupts a blocked pull. Sources backed by
/// blocking I/O cannot do that and instead expose an [`Unblock`] hook which
/// the mux invokes from the closing thread (for sockets: shut the socket
/// down so the blocked read returns).
pub trait Source: Send + 'static {
    /// The raw item type produced by this source.
    type Item: Send + 'static;

    /// Blocks until the next item is available.
    fn pull(&mut self, stop: &Receiver<()>) -> Result<Option<Self::Item>, SourceError>;

    /// Returns a hook that unblocks a pull in progress on another thread.
    fn unblocker(&self) -> Option<Box<dyn Unblock>> {
        None
    }
}

/// Unblocks a source whose pull cannot observe the stop signal.
pub trait Unblock: Send + Sync {
    fn unblock(&self);
}

impl<T: Send + 'static> Source for Box<dyn Source<Item = T>> {
    type Item = T;

    fn pull(&mut self, stop: &Receiver<()>) -> Result<Option<T>, SourceError> {
        (**self).pull(stop)
    }

    fn unblocker(&self) -> Option<Box<dyn Unblock>> {
        (**self).unblocker()
    }
}

/// A [`Source`] reading from a crossbeam channel.
///
/// The source ends when every sender has been dropped.
pub struct ChannelSource<T> {
    receiver: Receiver<T>,
}

impl<T> ChannelSource<T> {
    pub fn new(receiver: Receiver<T>) -> Self {
        Self { receiver }
    }
}

impl<T: Send + 'static> Source for ChannelSource<T> {
    type Item = T;

    fn pull(&mut self, stop: &Receiver<()>) -> Result<Option<T>, SourceError> {
        select! {
            recv(self.receiver) -> item => Ok(item.ok()),
            recv(stop) -> _ => Err(SourceError::Interrupted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    #[test]
    fn channel_source_yields_in_order_then_ends() {
        let (tx, rx) = bounded(4);
        let (_stop_tx, stop_rx) = bounded::<()>(0);
        let mut source = ChannelSource::new(rx);

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        drop(tx);

        assert_eq!(source.pull(&stop_rx).unwrap(), Some(1));
        assert_eq!(source.pull(&stop_rx).unwrap(), Some(2));
        assert_eq!(source.pull(&stop_rx).unwrap(), None);
    }

    #[test]
    fn dropping_stop_interrupts_a_blocked_pull() {
        let (_tx, rx) = bounded::<u8>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut source = ChannelSource::new(rx);

        drop(stop_tx);
        assert!(matches!(
            source.pull(&stop_rx),
            Err(SourceError::Interrupted)
        ));
    }
}
