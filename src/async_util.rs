use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{self, Poll};

use async_broadcast::{Receiver, Sender};
use async_lock::Mutex;
use futures_core::stream::BoxStream;
use futures_core::Stream;

/// Fans values from "foreign" callbacks out to every live `NotifierReceiver`.
///
/// The first subscriber activates the notifier, dropping the last one deactivates it.
pub struct Notifier<T: Send + Clone> {
    capacity: usize,
    inner: Mutex<Weak<NotifierInner<T>>>,
}

struct NotifierInner<T: Send + Clone> {
    sender: Sender<Option<T>>,
    on_stop: Box<dyn Fn() + Send + Sync + 'static>,
}

pub struct NotifierReceiver<T: Send + Clone> {
    holder: Option<Arc<NotifierInner<T>>>,
    receiver: Receiver<Option<T>>,
}

impl<T: Send + Clone> Notifier<T> {
    /// Creates a new inactive `Notifier`.
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Weak::new()),
        }
    }

    /// Creates a new `NotifierReceiver` for the caller to receive values.
    /// - `on_start` runs under the notifier lock, only if the notifier is inactive.
    ///   An error leaves it inactive.
    /// - `on_stop` runs when the last receiver goes away; it is ignored if the
    ///   notifier is already active.
    pub async fn subscribe<E>(
        &self,
        on_start: impl FnOnce() -> Result<(), E>,
        on_stop: impl Fn() + Send + Sync + 'static,
    ) -> Result<NotifierReceiver<T>, E> {
        let mut guard_inner = self.inner.lock().await;
        if let Some(inner) = guard_inner.upgrade() {
            let receiver = inner.sender.new_receiver();
            return Ok(NotifierReceiver {
                holder: Some(inner),
                receiver,
            });
        }
        on_start()?;
        let (mut sender, receiver) = async_broadcast::broadcast(self.capacity.max(1));
        sender.set_overflow(true);
        let new_inner = Arc::new(NotifierInner {
            sender,
            on_stop: Box::new(on_stop),
        });
        *guard_inner = Arc::downgrade(&new_inner);
        Ok(NotifierReceiver {
            holder: Some(new_inner),
            receiver,
        })
    }

    /// Sends a value to current receivers. Returns `false` if the notifier is inactive.
    pub fn notify(&self, value: T) -> bool {
        let inner = self.inner.lock_blocking().upgrade();
        match inner {
            Some(inner) => inner.sender.try_broadcast(Some(value)).is_ok(),
            None => false,
        }
    }
}

impl<T: Send + Clone> Stream for NotifierReceiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<T>> {
        if self.holder.is_none() {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.receiver).poll_next(cx) {
            Poll::Ready(Some(Some(value))) => Poll::Ready(Some(value)),
            Poll::Ready(_) => {
                let _ = self.holder.take();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}

impl<T: Send + Clone> Drop for Notifier<T> {
    fn drop(&mut self) {
        // ends every receiver
        if let Some(inner) = self.inner.lock_blocking().upgrade() {
            let _ = inner.sender.try_broadcast(None);
        }
    }
}

impl<T: Send + Clone> Drop for NotifierInner<T> {
    fn drop(&mut self) {
        (self.on_stop)()
    }
}

type Arm = Box<dyn FnOnce() -> BoxStream<'static, ()> + Send>;

/// Wraps a stream and ends it when a cancel signal arrives.
///
/// Before the first item, the `before` signal is watched. The `after` signal is
/// only subscribed (through the arming closure) once the first item has passed, and
/// from then on replaces `before`. A signal stream that ends without firing is ignored.
/// Cancelling drops the wrapped stream immediately.
pub struct CancelOn<T> {
    stream: Option<BoxStream<'static, T>>,
    before: Option<BoxStream<'static, ()>>,
    arm_after: Option<Arm>,
    after: Option<BoxStream<'static, ()>>,
    emitted: bool,
}

impl<T> CancelOn<T> {
    pub fn new<B, A, S>(stream: BoxStream<'static, T>, before: B, arm_after: A) -> Self
    where
        B: Stream<Item = ()> + Send + 'static,
        A: FnOnce() -> S + Send + 'static,
        S: Stream<Item = ()> + Send + 'static,
    {
        Self {
            stream: Some(stream),
            before: Some(Box::pin(before)),
            arm_after: Some(Box::new(move || -> BoxStream<'static, ()> {
                Box::pin(arm_after())
            })),
            after: None,
            emitted: false,
        }
    }

    fn finish(&mut self) {
        self.stream = None;
        self.before = None;
        self.arm_after = None;
        self.after = None;
    }
}

impl<T> Stream for CancelOn<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let signal = if this.emitted {
            &mut this.after
        } else {
            &mut this.before
        };
        let fired = match signal.as_mut().map(|s| s.as_mut().poll_next(cx)) {
            Some(Poll::Ready(Some(()))) => true,
            Some(Poll::Ready(None)) => {
                *signal = None;
                false
            }
            _ => false,
        };
        if fired {
            this.finish();
            return Poll::Ready(None);
        }

        let polled = match this.stream.as_mut() {
            Some(stream) => stream.as_mut().poll_next(cx),
            None => return Poll::Ready(None),
        };
        match polled {
            Poll::Ready(Some(item)) => {
                if !this.emitted {
                    this.emitted = true;
                    this.before = None;
                    this.after = this.arm_after.take().map(|arm| arm());
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Resolves with the first item produced by any of the sources; the others are dropped.
///
/// Sources are polled in the given order, so the earlier one wins when several are
/// ready at the same time. A source that ends never wins; if all of them end, this
/// never resolves.
pub struct FirstOf<T> {
    sources: Vec<Option<BoxStream<'static, T>>>,
}

impl<T> FirstOf<T> {
    pub fn new(sources: impl IntoIterator<Item = BoxStream<'static, T>>) -> Self {
        Self {
            sources: sources.into_iter().map(Some).collect(),
        }
    }
}

impl<T> Future for FirstOf<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let mut winner = None;
        for slot in this.sources.iter_mut() {
            let Some(source) = slot.as_mut() else {
                continue;
            };
            match source.as_mut().poll_next(cx) {
                Poll::Ready(Some(value)) => {
                    winner = Some(value);
                    break;
                }
                Poll::Ready(None) => *slot = None,
                Poll::Pending => (),
            }
        }
        match winner {
            Some(value) => {
                this.sources.clear();
                Poll::Ready(value)
            }
            None => Poll::Pending,
        }
    }
}

/// Unwraps `Ok` items; on the first `Err`, emits the recovered value and ends.
pub struct OnErrorReturn<T, E> {
    stream: Option<BoxStream<'static, Result<T, E>>>,
    recover: Option<Box<dyn FnOnce(E) -> T + Send>>,
}

impl<T, E> OnErrorReturn<T, E> {
    pub fn new(
        stream: BoxStream<'static, Result<T, E>>,
        recover: impl FnOnce(E) -> T + Send + 'static,
    ) -> Self {
        Self {
            stream: Some(stream),
            recover: Some(Box::new(recover)),
        }
    }
}

impl<T, E> Stream for OnErrorReturn<T, E> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let polled = match this.stream.as_mut() {
            Some(stream) => stream.as_mut().poll_next(cx),
            None => return Poll::Ready(None),
        };
        match polled {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(item)),
            Poll::Ready(Some(Err(e))) => {
                this.stream = None;
                Poll::Ready(this.recover.take().map(|recover| recover(e)))
            }
            Poll::Ready(None) => {
                this.stream = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
