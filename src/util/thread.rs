//! Module `thread` implement a gen-server pattern for background
//! workers.
//!
//! A [Thread] holds its own state and is reached only via its typed
//! request channel; the channel is bounded, so the queue of pending
//! work is capped at construction time. Dropping the [Thread] value
//! closes the channel, lets the worker finish whatever is queued,
//! and joins it.

use std::{sync::mpsc, thread};

use crate::Result;

/// Receiving side handed to the worker's main loop. Each message
/// carries an optional response channel; `None` means the caller is
/// not waiting.
pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;

/// Background worker with a bounded request queue.
///
/// `Q` is the request type, `R` the response type, `T` the value
/// returned by the worker's main loop on exit.
pub struct Thread<Q, R = (), T = ()> {
    name: String,
    inner: Option<Inner<Q, R, T>>,
}

struct Inner<Q, R, T> {
    handle: thread::JoinHandle<Result<T>>,
    tx: mpsc::SyncSender<(Q, Option<mpsc::Sender<R>>)>,
}

impl<Q, R, T> Inner<Q, R, T> {
    fn close_wait(self) -> Result<T> {
        std::mem::drop(self.tx);

        match self.handle.join() {
            Ok(exit) => exit,
            Err(err) => err_at!(ThreadFail, msg: "{:?}", err),
        }
    }
}

impl<Q, R, T> Drop for Thread<Q, R, T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.close_wait().ok();
        }
    }
}

impl<Q, R, T> Thread<Q, R, T> {
    /// Spawn a new worker. `main_loop` is called with the receiving
    /// side of a bounded channel of `chan_size` slots and shall
    /// return the closure to run on the spawned thread. The loop is
    /// expected to exit when the channel disconnects.
    pub fn new_sync<F, N>(name: &str, chan_size: usize, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> Result<T>,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::sync_channel(chan_size);
        let handle = thread::spawn(main_loop(rx));

        Thread {
            name: name.to_string(),
            inner: Some(Inner { handle, tx }),
        }
    }

    /// Return name of this worker.
    pub fn to_name(&self) -> String {
        self.name.to_string()
    }

    /// Return whether the worker's main loop has exited.
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.handle.is_finished(),
            None => true,
        }
    }

    /// Post a message and don't wait for a response.
    pub fn post(&self, msg: Q) -> Result<()> {
        match &self.inner {
            Some(inner) => err_at!(IPCFail, inner.tx.send((msg, None))),
            None => err_at!(IPCFail, msg: "{} not initialized", self.name),
        }
    }

    /// Send a request and wait for the worker's response.
    pub fn request(&self, request: Q) -> Result<R> {
        match &self.inner {
            Some(inner) => {
                let (tx, rx) = mpsc::channel();
                err_at!(IPCFail, inner.tx.send((request, Some(tx))))?;
                err_at!(IPCFail, rx.recv())
            }
            None => err_at!(IPCFail, msg: "{} not initialized", self.name),
        }
    }

    /// Recommended way to shut down the worker: close the channel,
    /// wait for it to exit and return its exit value. Dropping the
    /// [Thread] does the same, except errors are ignored.
    pub fn close_wait(mut self) -> Result<T> {
        match self.inner.take() {
            Some(inner) => inner.close_wait(),
            None => err_at!(IPCFail, msg: "{} not initialized", self.name),
        }
    }
}
