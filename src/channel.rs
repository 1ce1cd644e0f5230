//! Wrappers over the in-memory channels that connect workers.
//!
//! This module exists so the rest of the crate does not depend on the
//! channel library directly. Bounded channels are the only suspension
//! points in the system: `send` parks while the channel is full and
//! `recv` parks while it is empty.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

pub use crossbeam_channel::{RecvError, SendError, TryRecvError};

/// Sending half of a bounded channel.
#[derive(Debug, Clone)]
pub struct BoundedSender<T>(Sender<T>);

/// Receiving half of a bounded channel.
#[derive(Debug, Clone)]
pub struct BoundedReceiver<T>(Receiver<T>);

/// Create a bounded channel with the given capacity.
pub fn bounded_channel<T>(cap: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (sender, receiver) = bounded(cap);
    (BoundedSender(sender), BoundedReceiver(receiver))
}

impl<T> BoundedSender<T> {
    /// Send a message, blocking while the channel is full.
    ///
    /// Fails when every receiver has been dropped; the item is handed back
    /// inside the error.
    #[inline]
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.0.send(item)
    }
}

impl<T> BoundedReceiver<T> {
    /// Block until a message is available and return it.
    ///
    /// After all senders are gone the buffered messages are still
    /// delivered; only then does this return an error.
    #[inline]
    pub fn recv(&self) -> Result<T, RecvError> {
        self.0.recv()
    }

    /// Non-blocking variant of `recv`.
    #[inline]
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.0.try_recv()
    }

    /// Number of messages currently buffered in the channel.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Create a channel with no capacity bound behind the bounded-channel
/// interface. Only the cooperative pipeline mode uses this, where an edge
/// must buffer a completed stage's whole output.
pub fn elastic_channel<T>() -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (sender, receiver) = unbounded();
    (BoundedSender(sender), BoundedReceiver(receiver))
}

/// Sending half of an unbounded channel.
#[derive(Debug)]
pub struct UnboundedSender<T>(Sender<T>);

impl<T> Clone for UnboundedSender<T> {
    fn clone(&self) -> Self {
        UnboundedSender(self.0.clone())
    }
}

/// Receiving half of an unbounded channel.
#[derive(Debug, Clone)]
pub struct UnboundedReceiver<T>(Receiver<T>);

/// Create a channel with unlimited capacity.
///
/// Used only for control traffic (the merge driver's control queue, the
/// group-by result queue) where the producer must never park.
pub fn unbounded_channel<T>() -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    let (sender, receiver) = unbounded();
    (UnboundedSender(sender), UnboundedReceiver(receiver))
}

impl<T> UnboundedSender<T> {
    #[inline]
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.0.send(item)
    }
}

impl<T> UnboundedReceiver<T> {
    #[inline]
    pub fn recv(&self) -> Result<T, RecvError> {
        self.0.recv()
    }

    #[inline]
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.0.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL_CAPACITY: usize = 10;

    #[test]
    fn test_recv_after_close() {
        let (sender, receiver) = bounded_channel(CHANNEL_CAPACITY);

        sender.send(123).unwrap();
        sender.send(456).unwrap();

        drop(sender);

        assert_eq!(receiver.recv().unwrap(), 123);
        assert_eq!(receiver.recv().unwrap(), 456);
        // sender has dropped
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn test_try_recv() {
        let (sender, receiver) = bounded_channel(CHANNEL_CAPACITY);

        assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
        sender.send(1).unwrap();
        assert_eq!(receiver.try_recv(), Ok(1));
        drop(sender);
        assert_eq!(receiver.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_len() {
        let (sender, receiver) = bounded_channel(CHANNEL_CAPACITY);
        assert!(receiver.is_empty());
        for i in 0..4 {
            sender.send(i).unwrap();
        }
        assert_eq!(receiver.len(), 4);
    }

    #[test]
    fn test_send_fails_without_receiver() {
        let (sender, receiver) = bounded_channel(CHANNEL_CAPACITY);
        drop(receiver);
        assert!(sender.send(1).is_err());
    }
}
