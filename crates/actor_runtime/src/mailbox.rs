//! Blocking message sources a [`Worker`](crate::Worker) can drain.

use crate::error::FetchError;
use crate::mux::Mux;
use crossbeam::channel::{select, Receiver};

/// Something a worker fetches messages from.
///
/// `interrupt` is disconnected when the worker is asked to stop with
/// `interrupt_if_blocked`; implementations must return
/// [`FetchError::Interrupted`] when that happens during a blocking fetch.
pub trait Mailbox: Send + 'static {
    type Message: Send + 'static;

    fn fetch(&mut self, interrupt: &Receiver<()>) -> Result<Self::Message, FetchError>;
}

/// A plain channel. Fetching fails with [`FetchError::Closed`] once every
/// sender is gone.
impl<T: Send + 'static> Mailbox for Receiver<T> {
    type Message = T;

    fn fetch(&mut self, interrupt: &Receiver<()>) -> Result<T, FetchError> {
        select! {
            recv(self) -> message => message.map_err(|_| FetchError::Closed),
            recv(interrupt) -> _ => Err(FetchError::Interrupted),
        }
    }
}

impl<T: Send + 'static> Mailbox for Mux<T> {
    type Message = T;

    fn fetch(&mut self, interrupt: &Receiver<()>) -> Result<T, FetchError> {
        if self.is_closed() {
            return Err(FetchError::Closed);
        }
        select! {
            recv(self.queue()) -> message => message.map_err(|_| FetchError::Closed),
            recv(self.closed_signal()) -> _ => Err(FetchError::Closed),
            recv(interrupt) -> _ => Err(FetchError::Interrupted),
        }
    }
}
