//! Lazy, single-consumer sequences produced on a background worker.
//!
//! A [`Sequence`] is fed by exactly one worker thread through a rendezvous
//! channel, so at most one item is in flight between producer and consumer.
//! The worker keeps an operation bracket open on each owning [`Handle`] for
//! its whole lifetime, which means closing any owner both stops the worker and
//! waits for it to let go.

use crate::cancel::CancelToken;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crossbeam_channel::{Receiver, Select, Sender};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Items that hold backend resources and must be released when dropped
/// undelivered.
pub trait Close {
    fn close(&self);
}

type ErrorSlot = Arc<Mutex<Option<BridgeError>>>;
type CancelHook = Box<dyn FnOnce() + Send>;

/// Producer side of a [`Sequence`].
pub struct Emitter<T> {
    items: Sender<T>,
    stop: CancelToken,
    owners: Vec<CancelToken>,
}

impl<T: Close> Emitter<T> {
    /// True once the consumer stopped the sequence or any owner was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled() || self.owners.iter().any(CancelToken::is_cancelled)
    }

    /// Hand `item` to the consumer, blocking until it is taken.
    ///
    /// Returns `false` (after closing `item`) if the sequence was stopped or
    /// an owner cancelled first; the producer should return.
    pub fn emit(&self, item: T) -> bool {
        if self.is_cancelled() {
            item.close();
            return false;
        }

        let mut select = Select::new();
        let send = select.send(&self.items);
        let stop = select.recv(self.stop.signal());
        let owners: Vec<usize> = self
            .owners
            .iter()
            .map(|owner| select.recv(owner.signal()))
            .collect();
        let operation = select.select();
        let index = operation.index();

        if index == send {
            return match operation.send(&self.items, item) {
                Ok(()) => true,
                Err(err) => {
                    err.into_inner().close();
                    false
                }
            };
        }

        let signal = owners
            .iter()
            .position(|&arm| arm == index)
            .map_or(self.stop.signal(), |position| self.owners[position].signal());
        debug_assert!(index == stop || owners.contains(&index));
        let _ = operation.recv(signal);
        item.close();
        false
    }
}

/// A lazily produced, finite, non-restartable sequence of `T`.
///
/// Iteration ends when the producer is exhausted, fails, or is cancelled;
/// [`Sequence::take_error`] tells a failed end from a clean one.
pub struct Sequence<T: Close + Send + 'static> {
    name: String,
    items: Receiver<T>,
    stop: CancelToken,
    error: ErrorSlot,
    worker: Option<JoinHandle<()>>,
    on_cancel: Option<CancelHook>,
}

impl<T: Close + Send + 'static> fmt::Debug for Sequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("running", &self.worker.is_some())
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: Close + Send + 'static> Sequence<T> {
    /// Run `produce` on a new worker thread rooted at `owner`.
    pub fn spawn<F>(name: impl Into<String>, owner: &Handle, produce: F) -> BridgeResult<Self>
    where
        F: FnOnce(&Emitter<T>) -> BridgeResult<()> + Send + 'static,
    {
        Self::spawn_owned(name, &[owner], produce)
    }

    /// Like [`Sequence::spawn`], with the worker holding a bracket on every
    /// handle in `owners`. Closing any of them stops the worker and waits for
    /// it, e.g. both the session and the entity being enumerated.
    pub fn spawn_owned<F>(
        name: impl Into<String>,
        owners: &[&Handle],
        produce: F,
    ) -> BridgeResult<Self>
    where
        F: FnOnce(&Emitter<T>) -> BridgeResult<()> + Send + 'static,
    {
        let name = name.into();
        let brackets = owners
            .iter()
            .map(|owner| owner.acquire())
            .collect::<BridgeResult<Vec<_>>>()?;
        let (tx, rx) = crossbeam_channel::bounded(0);
        let stop = CancelToken::new();
        let emitter = Emitter {
            items: tx,
            stop: stop.clone(),
            owners: owners.iter().map(|owner| owner.cancel_token()).collect(),
        };
        let error: ErrorSlot = Arc::new(Mutex::new(None));
        let slot = error.clone();
        let worker_name = name.clone();

        let worker = thread::Builder::new()
            .name(format!("tunebridge-{name}"))
            .spawn(move || {
                let _brackets = brackets;
                let emitter = emitter;
                if let Err(err) = produce(&emitter) {
                    tracing::debug!(sequence = %worker_name, error = %err, "producer stopped with error");
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
                }
                drop(emitter);
            })
            .map_err(|err| BridgeError::transport(format!("failed to start {name} worker: {err}")))?;

        Ok(Self {
            name,
            items: rx,
            stop,
            error,
            worker: Some(worker),
            on_cancel: None,
        })
    }

    /// A sequence that is already exhausted.
    pub fn empty(name: impl Into<String>) -> Self {
        let (_, rx) = crossbeam_channel::bounded(0);
        Self {
            name: name.into(),
            items: rx,
            stop: CancelToken::new(),
            error: Arc::new(Mutex::new(None)),
            worker: None,
            on_cancel: None,
        }
    }

    /// Run `hook` when the consumer cancels, before joining the worker. Used to
    /// unblock a producer stuck on I/O.
    pub fn on_cancel(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The error that ended the sequence, if any. Meaningful once iteration
    /// has returned `None`.
    pub fn take_error(&self) -> Option<BridgeError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stop the producer, wait for it to exit and close anything it fetched
    /// but never delivered.
    pub fn cancel(&mut self) {
        self.stop.cancel();
        if self.worker.is_some() {
            if let Some(hook) = self.on_cancel.take() {
                hook();
            }
        }
        self.join_worker();
        for item in self.items.try_iter() {
            item.close();
        }
    }

    /// Stop the sequence and report whether it had failed.
    pub fn finish(mut self) -> BridgeResult<()> {
        self.cancel();
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drain the sequence. On failure everything collected so far is closed.
    pub fn into_vec(mut self) -> BridgeResult<Vec<T>> {
        let items: Vec<T> = self.by_ref().collect();
        match self.take_error() {
            Some(err) => {
                for item in &items {
                    item.close();
                }
                Err(err)
            }
            None => Ok(items),
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(sequence = %self.name, "sequence worker panicked");
            }
        }
    }
}

impl<T: Close + Send + 'static> Iterator for Sequence<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.items.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                self.join_worker();
                None
            }
        }
    }
}

impl<T: Close + Send + 'static> Drop for Sequence<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct Item {
        value: usize,
        closed: Arc<AtomicUsize>,
    }

    impl Close for Item {
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn numbers(owner: &Handle, count: usize, closed: Arc<AtomicUsize>) -> Sequence<Item> {
        Sequence::spawn("numbers", owner, move |emitter| {
            for value in 0..count {
                if !emitter.emit(Item {
                    value,
                    closed: closed.clone(),
                }) {
                    return Ok(());
                }
            }
            Ok(())
        })
        .unwrap()
    }

    #[test]
    fn delivers_in_order_without_gaps() {
        let owner = Handle::detached("library");
        let closed = Arc::new(AtomicUsize::new(0));
        let values: Vec<usize> = numbers(&owner, 5, closed.clone())
            .map(|item| item.value)
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(owner.pending(), 0);
    }

    #[test]
    fn producer_error_is_recorded_after_end() {
        let owner = Handle::detached("library");
        let mut seq: Sequence<Item> = Sequence::spawn("failing", &owner, |emitter| {
            let closed = Arc::new(AtomicUsize::new(0));
            emitter.emit(Item { value: 7, closed });
            Err(BridgeError::host("boom"))
        })
        .unwrap();
        assert_eq!(seq.next().map(|item| item.value), Some(7));
        assert!(seq.next().is_none());
        assert_eq!(seq.take_error(), Some(BridgeError::host("boom")));
        assert_eq!(seq.take_error(), None);
    }

    #[test]
    fn cancel_without_consuming_closes_pending_item() {
        let owner = Handle::detached("library");
        let closed = Arc::new(AtomicUsize::new(0));
        let mut seq = numbers(&owner, 1000, closed.clone());
        let started = Instant::now();
        seq.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(closed.load(Ordering::SeqCst) <= 1);
        assert!(seq.next().is_none());
        assert_eq!(owner.pending(), 0);
        owner.close();
    }

    #[test]
    fn owner_close_stops_worker() {
        let owner = Handle::detached("library");
        let closed = Arc::new(AtomicUsize::new(0));
        let mut seq = numbers(&owner, 1000, closed.clone());
        assert_eq!(seq.next().map(|item| item.value), Some(0));
        owner.close();
        assert!(seq.next().is_none());
        assert!(seq.take_error().is_none());
    }

    #[test]
    fn closing_any_owner_stops_worker_and_returns_brackets() {
        let session = Handle::detached("session");
        let playlist = Handle::detached("playlist 0F");
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let mut seq: Sequence<Item> =
            Sequence::spawn_owned("playlist-tracks", &[&session, &playlist], move |emitter| {
                for value in 0..1000 {
                    if !emitter.emit(Item {
                        value,
                        closed: counter.clone(),
                    }) {
                        return Ok(());
                    }
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(seq.next().map(|item| item.value), Some(0));
        assert_eq!(session.pending(), 1);
        assert_eq!(playlist.pending(), 1);

        session.close();
        assert!(seq.next().is_none());
        assert_eq!(playlist.pending(), 0);
        assert!(closed.load(Ordering::SeqCst) <= 1);
        playlist.close();
    }

    #[test]
    fn spawn_owned_fails_if_any_owner_is_closed() {
        let session = Handle::detached("session");
        let track = Handle::detached("track 01");
        session.close();
        let result = Sequence::<Item>::spawn_owned("artworks", &[&session, &track], |_| Ok(()));
        assert!(matches!(result, Err(BridgeError::Closed { .. })));
        assert_eq!(track.pending(), 0);
    }

    #[test]
    fn spawn_on_closed_owner_fails() {
        let owner = Handle::detached("library");
        owner.close();
        let result = Sequence::<Item>::spawn("late", &owner, |_| Ok(()));
        assert!(matches!(result, Err(BridgeError::Closed { .. })));
    }

    #[test]
    fn into_vec_closes_collected_items_on_failure() {
        let owner = Handle::detached("library");
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let seq: Sequence<Item> = Sequence::spawn("partial", &owner, move |emitter| {
            for value in 0..3 {
                emitter.emit(Item {
                    value,
                    closed: counter.clone(),
                });
            }
            Err(BridgeError::decode("bad line"))
        })
        .unwrap();
        assert_eq!(seq.into_vec().unwrap_err(), BridgeError::decode("bad line"));
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancel_hook_runs_only_while_worker_alive() {
        let owner = Handle::detached("library");
        let fired = Arc::new(AtomicUsize::new(0));
        let hook = fired.clone();
        let mut seq = numbers(&owner, 0, Arc::new(AtomicUsize::new(0))).on_cancel(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        assert!(seq.next().is_none());
        seq.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_sequence_ends_immediately() {
        let mut seq: Sequence<Item> = Sequence::empty("nothing");
        assert!(seq.next().is_none());
        assert!(seq.finish().is_ok());
    }
}
