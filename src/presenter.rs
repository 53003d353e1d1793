use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use futures_core::Stream;
use futures_lite::{stream, FutureExt, StreamExt};
use futures_timer::Delay;
use log::{debug, info, warn};
use uuid::Uuid;

use super::async_util::{CancelOn, FirstOf, OnErrorReturn};
use super::characteristic::Characteristic;
use super::config::PresenterConfig;
use super::device::{Connection, NotificationStream, Peripheral};
use super::intent::{Intent, Intents};
use super::oplog::OperationTracker;
use super::{Error, ErrorKind, NotificationType, OperationKind, PresenterEvent, Result};

/// Coordinates connect, read, write, notify and indicate operations on one
/// characteristic of a device, driven by user [Intents].
///
/// Each `connect` intent starts a connect cycle: the device is connected, the
/// characteristic is discovered, [PresenterEvent::Info] is emitted and the read, write
/// and notification branches start running concurrently. A `connecting` intent before
/// the connection is ready, a `disconnect` intent afterwards, a connection failure or a
/// link loss ends the cycle; the presenter then waits for the next `connect` intent.
/// `connect` intents arriving while a cycle runs are ignored.
///
/// The stream only ends once every sender of the `connect` intent is gone and the
/// current cycle is over. Dropping it releases the connection.
pub struct Presenter {
    connect: BoxStream<'static, ()>,
    connecting_intent: Intent<()>,
    // handed to the next cycle, so no intent falls between two cycles
    connecting: BoxStream<'static, ()>,
    start_cycle: Box<dyn FnMut(BoxStream<'static, ()>) -> BoxStream<'static, PresenterEvent> + Send>,
    cycle: Option<BoxStream<'static, PresenterEvent>>,
}

struct Shared<P> {
    device: P,
    char_id: Uuid,
    intents: Intents,
    config: PresenterConfig,
    tracker: OperationTracker,
}

impl Presenter {
    pub fn new<P: Peripheral>(
        device: P,
        characteristic_uuid: Uuid,
        intents: Intents,
        config: PresenterConfig,
    ) -> Self {
        let tracker = OperationTracker::new(config.operation_logger.clone(), device.id());
        let connect = intents.connect.subscribe().boxed();
        let connecting_intent = intents.connecting.clone();
        let connecting = connecting_intent.subscribe().boxed();
        let shared = Arc::new(Shared {
            device,
            char_id: characteristic_uuid,
            intents,
            config,
            tracker,
        });
        Self {
            connect,
            connecting_intent,
            connecting,
            start_cycle: Box::new(move |connecting| connect_cycle(shared.clone(), connecting)),
            cycle: None,
        }
    }
}

impl Stream for Presenter {
    type Item = PresenterEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PresenterEvent>> {
        let this = self.get_mut();
        loop {
            if let Some(cycle) = this.cycle.as_mut() {
                match cycle.as_mut().poll_next(cx) {
                    Poll::Ready(Some(event)) => return Poll::Ready(Some(event)),
                    Poll::Ready(None) => {
                        debug!("connect cycle ended");
                        this.cycle = None;
                        discard_ready(&mut this.connecting, cx);
                    }
                    Poll::Pending => {
                        if discard_ready(&mut this.connect, cx) > 0 {
                            debug!("connect intent ignored, a connect cycle is running");
                        }
                        discard_ready(&mut this.connecting, cx);
                        return Poll::Pending;
                    }
                }
            }
            match this.connect.as_mut().poll_next(cx) {
                Poll::Ready(Some(())) => {
                    let next = this.connecting_intent.subscribe().boxed();
                    let connecting = std::mem::replace(&mut this.connecting, next);
                    this.cycle = Some((this.start_cycle)(connecting));
                }
                Poll::Ready(None) => {
                    info!("connect intents are closed, presenter finished");
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    // nothing to cancel while idle
                    discard_ready(&mut this.connecting, cx);
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Drops the intents that are already waiting and returns how many there were.
fn discard_ready(intents: &mut BoxStream<'static, ()>, cx: &mut Context<'_>) -> usize {
    let mut count = 0;
    while let Poll::Ready(Some(())) = intents.as_mut().poll_next(cx) {
        count += 1;
    }
    count
}

fn connect_cycle<P: Peripheral>(
    shared: Arc<Shared<P>>,
    connecting: BoxStream<'static, ()>,
) -> BoxStream<'static, PresenterEvent> {
    let disconnect = shared.intents.disconnect.clone();

    let operations = stream::once_future(establish(shared.clone())).flat_map(
        move |established| match established {
            Ok((conn, characteristic)) => operate(&shared, conn, characteristic),
            Err(e) => stream::once(Err(e)).boxed(),
        },
    );
    let recovered = OnErrorReturn::new(operations.boxed(), |e: Error| {
        warn!("connect cycle failed: {e}");
        PresenterEvent::Info(format!("Connection error: {e}"))
    });
    CancelOn::new(recovered.boxed(), connecting, move || disconnect.subscribe()).boxed()
}

async fn establish<P: Peripheral>(
    shared: Arc<Shared<P>>,
) -> Result<(Arc<P::Connection>, Characteristic)> {
    info!("connecting to {}", shared.device.id());
    let attempt = async {
        let conn = shared.device.connect(shared.config.auto_connect).await?;
        let characteristic = conn.discover_characteristic(shared.char_id).await?;
        Ok::<_, Error>((Arc::new(conn), characteristic))
    };
    match shared.config.connect_timeout {
        Some(timeout) => {
            attempt
                .or(async move {
                    Delay::new(timeout).await;
                    Err(Error::new(
                        ErrorKind::Timeout,
                        format!("no connection after {timeout:?}"),
                    ))
                })
                .await
        }
        None => attempt.await,
    }
}

fn operate<P: Peripheral>(
    shared: &Shared<P>,
    conn: Arc<P::Connection>,
    characteristic: Characteristic,
) -> BoxStream<'static, Result<PresenterEvent>> {
    let props = characteristic.properties();
    info!(
        "connected to {}, characteristic {} has properties {:#04x}",
        shared.device.id(),
        characteristic.uuid(),
        props.to_bits()
    );

    let reads = if props.read {
        let (conn, ch) = (conn.clone(), characteristic.clone());
        operation_branch(
            shared.intents.read.queue("read"),
            OperationKind::Read,
            &shared.tracker,
            characteristic.uuid(),
            move |()| (None, conn.read(&ch)),
        )
    } else {
        stream::pending().boxed()
    };

    let writes = if props.write {
        let (conn, ch) = (conn.clone(), characteristic.clone());
        operation_branch(
            shared.intents.write.queue("write"),
            OperationKind::Write,
            &shared.tracker,
            characteristic.uuid(),
            move |value: Vec<u8>| (Some(value.clone()), conn.write(&ch, value)),
        )
    } else {
        stream::pending().boxed()
    };

    let pushes: BoxStream<'static, Result<PresenterEvent>> = NotificationLoop::new(
        conn.clone(),
        characteristic,
        shared.intents.clone(),
        shared.config.tie_break,
        shared.tracker.clone(),
    )
    .map(Ok)
    .boxed();

    let link_loss: BoxStream<'static, Result<PresenterEvent>> =
        stream::once_future(conn.disconnected()).map(Err).boxed();

    // `race` never ends by itself; link loss ends the cycle through its error
    let branches = link_loss.race(reads).race(writes).race(pushes);
    stream::once(Ok(PresenterEvent::Info(shared.config.connected_text.clone())))
        .chain(branches)
        .boxed()
}

/// Runs one operation per intent, in arrival order.
fn operation_branch<I, F>(
    intents: impl Stream<Item = I> + Send + 'static,
    kind: OperationKind,
    tracker: &OperationTracker,
    char_id: Uuid,
    mut run: F,
) -> BoxStream<'static, Result<PresenterEvent>>
where
    I: Send + 'static,
    F: FnMut(I) -> (Option<Vec<u8>>, BoxFuture<'static, Result<Vec<u8>>>) + Send + 'static,
{
    let tracker = tracker.clone();
    intents
        .then(move |input| {
            let (payload, operation) = run(input);
            let mut op = tracker.begin(&kind.to_string(), char_id, payload);
            async move {
                let outcome = operation.await;
                op.end(&outcome);
                match &outcome {
                    Ok(value) => debug!("{kind} {char_id}: {}", hex::encode_upper(value)),
                    Err(e) => warn!("{kind} {char_id} failed: {e}"),
                }
                Ok::<_, Error>(PresenterEvent::from_outcome(outcome, kind))
            }
        })
        .boxed()
}

enum Push {
    Armed,
    Value(Vec<u8>),
    Failed(Error),
}

enum Subscription {
    Setup(BoxFuture<'static, Result<NotificationStream>>),
    Live(NotificationStream),
    Closed,
}

/// Yields `Armed` once the setup completes, then every pushed value.
fn push_stream(setup: BoxFuture<'static, Result<NotificationStream>>) -> BoxStream<'static, Push> {
    stream::unfold(Subscription::Setup(setup), |state| async move {
        match state {
            Subscription::Setup(setup) => Some(match setup.await {
                Ok(values) => (Push::Armed, Subscription::Live(values)),
                Err(e) => (Push::Failed(e), Subscription::Closed),
            }),
            Subscription::Live(mut values) => match values.next().await {
                Some(Ok(value)) => Some((Push::Value(value), Subscription::Live(values))),
                Some(Err(e)) => Some((Push::Failed(e), Subscription::Closed)),
                None => None,
            },
            Subscription::Closed => None,
        }
    })
    .boxed()
}

enum Phase {
    Selecting(FirstOf<NotificationType>),
    Active {
        kind: NotificationType,
        events: BoxStream<'static, PresenterEvent>,
        rival: Option<BoxStream<'static, ()>>,
    },
    /// Neither notifications nor indications are supported.
    Idle,
}

/// The notify/indicate sub-cycles of one connect cycle.
///
/// Each sub-cycle announces itself with `CompatibilityMode`. Its intents are
/// subscribed before that event is handed out.
struct NotificationLoop<C> {
    conn: Arc<C>,
    ch: Characteristic,
    intents: Intents,
    tie_break: NotificationType,
    tracker: OperationTracker,
    phase: Phase,
    announce: bool,
}

impl<C: Connection> NotificationLoop<C> {
    fn new(
        conn: Arc<C>,
        ch: Characteristic,
        intents: Intents,
        tie_break: NotificationType,
        tracker: OperationTracker,
    ) -> Self {
        let mut this = Self {
            conn,
            ch,
            intents,
            tie_break,
            tracker,
            phase: Phase::Idle,
            announce: false,
        };
        this.restart(None);
        this
    }

    /// Starts the next sub-cycle, directly with `handover` if given.
    fn restart(&mut self, handover: Option<NotificationType>) {
        // tear the previous subscription down before setting up the next one
        self.phase = Phase::Idle;
        self.phase = self.next_phase(handover);
        self.announce = true;
    }

    fn enable_intent(&self, kind: NotificationType) -> &Intent<()> {
        match kind {
            NotificationType::Notification => &self.intents.enable_notify,
            NotificationType::Indication => &self.intents.enable_indicate,
        }
    }

    /// Intents cancelling `kind` before and after its setup completed.
    fn cancel_intents(&self, kind: NotificationType) -> (&Intent<()>, &Intent<()>) {
        match kind {
            NotificationType::Notification => {
                (&self.intents.enabling_notify, &self.intents.disable_notify)
            }
            NotificationType::Indication => (
                &self.intents.enabling_indicate,
                &self.intents.disable_indicate,
            ),
        }
    }

    fn next_phase(&self, handover: Option<NotificationType>) -> Phase {
        if let Some(kind) = handover {
            return self.activate(kind);
        }
        let props = self.ch.properties();
        let candidates: Vec<BoxStream<'static, NotificationType>> =
            [self.tie_break, self.tie_break.rival()]
                .into_iter()
                .filter(|kind| props.supports(*kind))
                .map(|kind| {
                    self.enable_intent(kind)
                        .subscribe()
                        .map(move |()| kind)
                        .boxed()
                })
                .collect();
        if candidates.is_empty() {
            Phase::Idle
        } else {
            Phase::Selecting(FirstOf::new(candidates))
        }
    }

    fn activate(&self, kind: NotificationType) -> Phase {
        let op_kind = OperationKind::from(kind);
        let char_id = self.ch.uuid();
        let mode = self.ch.notification_setup_mode();
        debug!("setting up {op_kind} on {char_id} in {mode:?} mode");

        let setup = match kind {
            NotificationType::Notification => self.conn.setup_notification(&self.ch, mode),
            NotificationType::Indication => self.conn.setup_indication(&self.ch, mode),
        };
        let mut setup_op = self
            .tracker
            .begin(&format!("{op_kind} setup"), char_id, None);
        let tracker = self.tracker.clone();

        let (enabling, disable) = self.cancel_intents(kind);
        let disable = disable.clone();
        let events = CancelOn::new(push_stream(setup), enabling.subscribe(), move || {
            disable.subscribe()
        })
        .filter_map(move |push| match push {
            Push::Armed => {
                setup_op.end(&Ok(Vec::new()));
                info!("{op_kind} enabled on {char_id}");
                None
            }
            Push::Value(value) => {
                tracker.atomic(&op_kind.to_string(), char_id, &value);
                Some(PresenterEvent::Result(value, op_kind))
            }
            Push::Failed(e) => {
                warn!("{op_kind} on {char_id} failed: {e}");
                let outcome = Err(e);
                setup_op.end(&outcome);
                Some(PresenterEvent::from_outcome(outcome, op_kind))
            }
        })
        .boxed();

        let rival = self
            .ch
            .properties()
            .supports(kind.rival())
            .then(|| self.enable_intent(kind.rival()).subscribe().boxed());
        Phase::Active {
            kind,
            events,
            rival,
        }
    }
}

impl<C: Connection> Stream for NotificationLoop<C> {
    type Item = PresenterEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PresenterEvent>> {
        let this = self.get_mut();
        loop {
            if this.announce {
                this.announce = false;
                return Poll::Ready(Some(PresenterEvent::CompatibilityMode(
                    this.ch.is_compat(),
                )));
            }
            match &mut this.phase {
                Phase::Selecting(selection) => match Pin::new(selection).poll(cx) {
                    Poll::Ready(kind) => this.phase = this.activate(kind),
                    Poll::Pending => return Poll::Pending,
                },
                Phase::Active {
                    kind,
                    events,
                    rival,
                } => {
                    let kind = *kind;
                    if let Some(signal) = rival {
                        match signal.as_mut().poll_next(cx) {
                            Poll::Ready(Some(())) => {
                                info!("{:?} requested, tearing down {kind:?}", kind.rival());
                                this.restart(Some(kind.rival()));
                                continue;
                            }
                            Poll::Ready(None) => *rival = None,
                            Poll::Pending => (),
                        }
                    }
                    match events.as_mut().poll_next(cx) {
                        Poll::Ready(Some(event)) => return Poll::Ready(Some(event)),
                        Poll::Ready(None) => this.restart(None),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                Phase::Idle => return Poll::Pending,
            }
        }
    }
}
