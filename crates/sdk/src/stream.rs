use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll},
};

use tokio::sync::{mpsc, watch};

use crate::{error::Error, events::TurnEvent, turn::RunResult};

/// Capacity of the event buffer between the turn engine and the consumer.
/// A full buffer applies backpressure to the engine, not to the reader loop.
pub(crate) const EVENT_BUFFER_CAPACITY: usize = 64;

/// Handle over one streaming turn: a single-use lazy event sequence plus an
/// awaitable terminal [`RunResult`].
pub struct RunStream {
    events: Mutex<Option<mpsc::Receiver<TurnEvent>>>,
    consumed: AtomicBool,
    done: watch::Receiver<bool>,
    result: Arc<Mutex<Option<RunResult>>>,
    /// Error that ended the turn, delivered as the last element of the
    /// event sequence. Kept out of the bounded channel so it survives a
    /// buffer that was full when the engine stopped.
    terminal: Arc<Mutex<Option<Error>>>,
}

impl RunStream {
    pub(crate) fn new(
        events: mpsc::Receiver<TurnEvent>,
        done: watch::Receiver<bool>,
        result: Arc<Mutex<Option<RunResult>>>,
        terminal: Arc<Mutex<Option<Error>>>,
    ) -> Self {
        Self {
            events: Mutex::new(Some(events)),
            consumed: AtomicBool::new(false),
            done,
            result,
            terminal,
        }
    }

    /// The event sequence for this turn.
    ///
    /// May be taken exactly once; a second call returns a sequence that
    /// yields a single [`Error::StreamConsumed`] and nothing else. Dropping
    /// the returned sequence early stops the producer; the turn still runs
    /// to completion and [`RunStream::result`] still resolves.
    pub fn events(&self) -> TurnEvents {
        let first_take = self
            .consumed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !first_take {
            return TurnEvents {
                inner: TurnEventsInner::Consumed { emitted: false },
            };
        }
        let receiver = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match receiver {
            Some(receiver) => TurnEvents {
                inner: TurnEventsInner::Active {
                    receiver,
                    terminal: Arc::clone(&self.terminal),
                },
            },
            None => TurnEvents {
                inner: TurnEventsInner::Consumed { emitted: false },
            },
        }
    }

    /// Waits for the engine to finish and returns the terminal result.
    ///
    /// Safe to call before, during, or after iterating events. Returns
    /// `None` when the turn errored or was canceled; the error itself is
    /// delivered as the last element of the event sequence.
    pub async fn result(&self) -> Option<RunResult> {
        let mut done = self.done.clone();
        if done.wait_for(|finished| *finished).await.is_err() {
            return None;
        }
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Single-use event sequence yielded by [`RunStream::events`].
pub struct TurnEvents {
    inner: TurnEventsInner,
}

enum TurnEventsInner {
    Active {
        receiver: mpsc::Receiver<TurnEvent>,
        terminal: Arc<Mutex<Option<Error>>>,
    },
    Consumed {
        emitted: bool,
    },
}

fn take_terminal(terminal: &Arc<Mutex<Option<Error>>>) -> Option<Error> {
    terminal.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl TurnEvents {
    /// The next event, or `None` once the turn is over. A turn that ended
    /// in an error yields that error as its final element.
    pub async fn next(&mut self) -> Option<Result<TurnEvent, Error>> {
        match &mut self.inner {
            TurnEventsInner::Active { receiver, terminal } => match receiver.recv().await {
                Some(event) => Some(Ok(event)),
                None => take_terminal(terminal).map(Err),
            },
            TurnEventsInner::Consumed { emitted } => {
                if *emitted {
                    None
                } else {
                    *emitted = true;
                    Some(Err(Error::StreamConsumed))
                }
            }
        }
    }
}

impl futures_core::Stream for TurnEvents {
    type Item = Result<TurnEvent, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.inner {
            TurnEventsInner::Active { receiver, terminal } => match receiver.poll_recv(cx) {
                Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
                Poll::Ready(None) => Poll::Ready(take_terminal(terminal).map(Err)),
                Poll::Pending => Poll::Pending,
            },
            TurnEventsInner::Consumed { emitted } => {
                if *emitted {
                    Poll::Ready(None)
                } else {
                    *emitted = true;
                    Poll::Ready(Some(Err(Error::StreamConsumed)))
                }
            }
        }
    }
}
