//! Publish/subscribe sources for user intents (button clicks and the like).

use std::pin::Pin;
use std::task::{Context, Poll};

use async_broadcast::{InactiveReceiver, Receiver, RecvError, Sender, TrySendError};
use futures_core::Stream;
use log::{trace, warn};

/// Creates a connected pair of intent sender and intent source.
///
/// Subscribers created by [Intent::subscribe] only observe events sent after subscribing;
/// events sent while nobody is subscribed are dropped. A subscriber that falls more than
/// `capacity` events behind loses the oldest ones.
pub fn intent_channel<T: Clone>(capacity: usize) -> (IntentSender<T>, Intent<T>) {
    let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
    sender.set_overflow(true);
    sender.set_await_active(false);
    (
        IntentSender { sender },
        Intent {
            inner: receiver.deactivate(),
        },
    )
}

/// Producer side of an intent source, owned by the caller.
#[derive(Clone)]
pub struct IntentSender<T> {
    sender: Sender<T>,
}

impl<T: Clone> IntentSender<T> {
    /// Publishes an intent. Returns `false` if nobody was subscribed to receive it.
    pub fn send(&self, value: T) -> bool {
        match self.sender.try_broadcast(value) {
            Ok(_) => true,
            Err(TrySendError::Inactive(_)) => {
                trace!("intent dropped, no active subscriber");
                false
            }
            Err(_) => false,
        }
    }

    /// Closes the source; current subscribers end after draining buffered intents.
    pub fn close(&self) -> bool {
        self.sender.close()
    }
}

/// Consumer side of an intent source. Cloning it does not consume any events.
#[derive(Clone)]
pub struct Intent<T> {
    inner: InactiveReceiver<T>,
}

impl<T: Clone> Intent<T> {
    /// Starts observing intents sent from now on.
    pub fn subscribe(&self) -> Receiver<T> {
        self.inner.activate_cloned()
    }

    /// Like [Intent::subscribe], but intents lost to overflow are logged under `name`.
    pub fn queue(&self, name: &'static str) -> IntentQueue<T> {
        IntentQueue {
            receiver: self.subscribe(),
            name,
        }
    }

    /// Whether every sender is gone, so no more intents can arrive.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// A subscription that warns when a burst of intents overflowed its buffer.
pub struct IntentQueue<T> {
    receiver: Receiver<T>,
    name: &'static str,
}

impl<T: Clone> Stream for IntentQueue<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            match Pin::new(&mut self.receiver).poll_recv(cx) {
                Poll::Ready(Some(Ok(value))) => return Poll::Ready(Some(value)),
                Poll::Ready(Some(Err(RecvError::Overflowed(lost)))) => {
                    warn!("{lost} {} intent(s) dropped, buffer is full", self.name)
                }
                Poll::Ready(Some(Err(RecvError::Closed))) | Poll::Ready(None) => {
                    return Poll::Ready(None)
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

macro_rules! intent_sets {
    ($($(#[$doc:meta])* $name:ident: $ty:ty),* $(,)?) => {
        /// All intent sources consumed by [crate::Presenter].
        #[derive(Clone)]
        pub struct Intents {
            $($(#[$doc])* pub $name: Intent<$ty>,)*
        }

        /// The producer sides matching [Intents].
        #[derive(Clone)]
        pub struct IntentSenders {
            $($(#[$doc])* pub $name: IntentSender<$ty>,)*
        }

        impl Intents {
            /// Creates every intent source with the given per-subscriber buffer capacity.
            ///
            /// Reads and writes run one at a time; a burst of more than `capacity`
            /// clicks during a slow operation loses the oldest ones (with a warning).
            pub fn channel(capacity: usize) -> (IntentSenders, Intents) {
                $(let $name = intent_channel(capacity);)*
                (
                    IntentSenders { $($name: $name.0,)* },
                    Intents { $($name: $name.1,)* },
                )
            }
        }
    };
}

intent_sets! {
    /// Starts a connect cycle.
    connect: (),
    /// Cancels a connection attempt that has not completed yet.
    connecting: (),
    /// Closes an established connection.
    disconnect: (),
    /// Requests a characteristic read.
    read: (),
    /// Requests a characteristic write of the given bytes.
    write: Vec<u8>,
    /// Requests notifications.
    enable_notify: (),
    /// Cancels notifications that are still being set up.
    enabling_notify: (),
    /// Disables active notifications.
    disable_notify: (),
    /// Requests indications.
    enable_indicate: (),
    /// Cancels indications that are still being set up.
    enabling_indicate: (),
    /// Disables active indications.
    disable_indicate: (),
}
