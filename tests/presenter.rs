use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_lite::future::{block_on, poll_once};
use futures_lite::StreamExt;
use futures_timer::Delay;
use gatt_presenter::btuuid::descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION as CCCD;
use gatt_presenter::mock::{MockCharacteristic, MockDevice};
use gatt_presenter::{
    AttError, BluetoothUuidExt, CharacteristicProperties as Props, Error, ErrorKind,
    IntentSenders, Intents, NotificationType, OperationEvent, OperationEventLogger,
    OperationKind, Presenter, PresenterConfig, PresenterEvent, Uuid, DEFAULT_CONNECTED_TEXT,
};

fn char_id() -> Uuid {
    Uuid::from_u16(0xfff1)
}

fn device(characteristic: MockCharacteristic) -> MockDevice {
    MockDevice::builder()
        .name("TestDevice")
        .address("AA:BB:CC:DD:EE:FF")
        .add_service(Uuid::from_u16(0xfff0), vec![characteristic])
        .build()
}

fn start(device: &MockDevice, config: PresenterConfig) -> (IntentSenders, Presenter) {
    let (senders, intents) = Intents::channel(8);
    let presenter = Presenter::new(device.clone(), char_id(), intents, config);
    (senders, presenter)
}

fn connected() -> PresenterEvent {
    PresenterEvent::Info(DEFAULT_CONNECTED_TEXT.to_string())
}

async fn connect(senders: &IntentSenders, presenter: &mut Presenter, compat: bool) {
    assert!(senders.connect.send(()));
    assert_eq!(presenter.next().await, Some(connected()));
    assert_eq!(
        presenter.next().await,
        Some(PresenterEvent::CompatibilityMode(compat))
    );
}

/// Lets the presenter process everything that is ready, expecting no event.
async fn settle(presenter: &mut Presenter) {
    assert_eq!(poll_once(presenter.next()).await, None);
}

#[test]
fn read_only_characteristic() {
    let device = device(MockCharacteristic::new(char_id(), *b"TestRead", Props::READ));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.read.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(b"TestRead".to_vec(), OperationKind::Read))
        );
        // nobody listens to the intents of unsupported operations
        assert!(!senders.write.send(b"x".to_vec()));
        assert!(!senders.enable_notify.send(()));
        assert!(!senders.enable_indicate.send(()));
        settle(&mut presenter).await;
    });
}

#[test]
fn write_only_characteristic() {
    let device = device(MockCharacteristic::new(char_id(), [0u8], Props::WRITE));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(!senders.read.send(()));
        assert!(senders.write.send(b"TestWrite".to_vec()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(
                b"TestWrite".to_vec(),
                OperationKind::Write
            ))
        );
    });
    assert_eq!(
        device.characteristic_value(char_id()),
        Some(b"TestWrite".to_vec())
    );
}

#[test]
fn notify_only_characteristic() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY).descriptor(CCCD, [0u8, 0]),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![1, 0]));

        assert!(device.notify(char_id(), *b"TestNotification"));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(
                b"TestNotification".to_vec(),
                OperationKind::Notify
            ))
        );
    });
}

#[test]
fn indicate_only_characteristic() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::INDICATE).descriptor(CCCD, [0u8, 0]),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(!senders.enable_notify.send(()));
        assert!(senders.enable_indicate.send(()));
        settle(&mut presenter).await;
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![2, 0]));

        assert!(device.notify(char_id(), *b"TestIndication"));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(
                b"TestIndication".to_vec(),
                OperationKind::Indicate
            ))
        );
    });
}

#[test]
fn connection_failure_then_clean_restart() {
    let device = device(MockCharacteristic::new(char_id(), [0x2au8], Props::READ));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    let cause = Error::new(ErrorKind::ConnectionFailed, "status 133");
    device.fail_next_connection(cause.clone());
    block_on(async {
        assert!(senders.connect.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Info(format!("Connection error: {cause}")))
        );
        assert!(!device.is_connected());

        // accepted right away, without another poll in between
        connect(&senders, &mut presenter, false).await;
        assert!(device.is_connected());
        assert!(senders.read.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![0x2a], OperationKind::Read))
        );
    });
}

#[test]
fn enable_notify_right_after_connecting() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY).descriptor(CCCD, [0u8, 0]),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        assert!(senders.connect.send(()));
        assert_eq!(presenter.next().await, Some(connected()));
        assert!(senders.enable_notify.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );
        settle(&mut presenter).await;
        assert_eq!(
            device.is_notifying(char_id()),
            Some(NotificationType::Notification)
        );
        assert!(device.notify(char_id(), [5u8]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![5], OperationKind::Notify))
        );
    });
}

#[test]
fn connect_intents_during_a_cycle_are_ignored() {
    let device = device(MockCharacteristic::new(char_id(), [0u8], Props::READ));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.connect.send(()));
        settle(&mut presenter).await;

        assert!(device.drop_connection(Error::from(ErrorKind::NotConnected)));
        assert!(matches!(
            presenter.next().await,
            Some(PresenterEvent::Info(_))
        ));
        settle(&mut presenter).await;
        assert!(!device.is_connected());
    });
}

#[test]
fn disconnect_tears_down_and_reconnects() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::READ | Props::NOTIFY)
            .descriptor(CCCD, [0u8, 0]),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert!(device.is_connected());
        assert_eq!(
            device.is_notifying(char_id()),
            Some(NotificationType::Notification)
        );

        assert!(senders.disconnect.send(()));
        settle(&mut presenter).await;
        assert!(!device.is_connected());
        assert_eq!(device.is_notifying(char_id()), None);
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![0, 0]));
        // a stale read intent is not picked up by anyone
        assert!(!senders.read.send(()));

        connect(&senders, &mut presenter, false).await;
        assert!(device.is_connected());
    });
}

#[test]
fn connecting_intent_cancels_pending_connection() {
    let device = MockDevice::builder()
        .latency(Duration::from_millis(50))
        .add_service(
            Uuid::from_u16(0xfff0),
            vec![MockCharacteristic::new(char_id(), [0u8], Props::READ)],
        )
        .build();
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        assert!(senders.connect.send(()));
        settle(&mut presenter).await;
        assert!(senders.connecting.send(()));
        settle(&mut presenter).await;

        Delay::new(Duration::from_millis(120)).await;
        assert!(!device.is_connected());
        settle(&mut presenter).await;

        connect(&senders, &mut presenter, false).await;
        assert!(device.is_connected());
    });
}

#[test]
fn disable_notify_stops_delivery() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY).descriptor(CCCD, [0u8, 0]),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert!(device.notify(char_id(), [1u8]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![1], OperationKind::Notify))
        );

        assert!(senders.disable_notify.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![0, 0]));
        assert!(!device.notify(char_id(), [2u8]));

        // the next sub-cycle accepts a new enable intent
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![1, 0]));
    });
}

#[test]
fn enabling_intent_cancels_pending_setup() {
    let device = MockDevice::builder()
        .latency(Duration::from_millis(50))
        .add_service(
            Uuid::from_u16(0xfff0),
            vec![MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY)
                .descriptor(CCCD, [0u8, 0])],
        )
        .build();
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert!(senders.enabling_notify.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );

        Delay::new(Duration::from_millis(120)).await;
        assert_eq!(device.is_notifying(char_id()), None);
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![0, 0]));
    });
}

#[test]
fn enabling_indicate_hands_over_from_notify() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY | Props::INDICATE)
            .descriptor(CCCD, [0u8, 0]),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert!(device.notify(char_id(), [1u8]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![1], OperationKind::Notify))
        );

        assert!(senders.enable_indicate.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );
        // notifications are gone before indications are set up
        assert_eq!(device.is_notifying(char_id()), None);
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![0, 0]));

        settle(&mut presenter).await;
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![2, 0]));
        assert!(device.notify(char_id(), [2u8]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![2], OperationKind::Indicate))
        );

        // and back again
        assert!(senders.enable_notify.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );
        settle(&mut presenter).await;
        assert_eq!(
            device.is_notifying(char_id()),
            Some(NotificationType::Notification)
        );
    });
}

#[test]
fn compat_mode_without_cccd() {
    let device = device(MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, true).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert_eq!(device.descriptor_value(char_id(), CCCD), None);
        assert!(device.notify(char_id(), [9u8]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![9], OperationKind::Notify))
        );
    });
}

#[test]
fn read_failures_do_not_end_the_cycle() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::READ | Props::WRITE)
            .fail_reads(AttError::READ_NOT_PERMITTED),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    let failure = PresenterEvent::Error(
        Error::from(AttError::READ_NOT_PERMITTED),
        OperationKind::Read,
    );
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.read.send(()));
        assert_eq!(presenter.next().await, Some(failure.clone()));
        assert!(senders.read.send(()));
        assert_eq!(presenter.next().await, Some(failure));

        assert!(senders.write.send(vec![0x01]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![0x01], OperationKind::Write))
        );
    });
    assert!(device.is_connected());
}

#[test]
fn write_failures_are_reported() {
    let device = device(
        MockCharacteristic::new(char_id(), [0x07u8], Props::READ | Props::WRITE)
            .fail_writes(AttError::WRITE_NOT_PERMITTED),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.write.send(vec![0xaa]));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Error(
                Error::from(AttError::WRITE_NOT_PERMITTED),
                OperationKind::Write
            ))
        );
        assert!(senders.read.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![0x07], OperationKind::Read))
        );
    });
    assert_eq!(device.characteristic_value(char_id()), Some(vec![0x07]));
}

#[test]
fn failed_setup_starts_a_new_sub_cycle() {
    let device = device(
        MockCharacteristic::new(char_id(), [0u8], Props::NOTIFY | Props::INDICATE)
            .descriptor(CCCD, [0u8, 0])
            .fail_subscriptions(AttError::CCCD_IMPROPERLY_CONFIGURED),
    );
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_indicate.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Error(
                Error::from(AttError::CCCD_IMPROPERLY_CONFIGURED),
                OperationKind::Indicate
            ))
        );
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );
        assert_eq!(device.is_notifying(char_id()), None);
        assert_eq!(device.descriptor_value(char_id(), CCCD), Some(vec![0, 0]));

        // the next sub-cycle listens again
        assert!(senders.enable_notify.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Error(
                Error::from(AttError::CCCD_IMPROPERLY_CONFIGURED),
                OperationKind::Notify
            ))
        );
    });
    assert!(device.is_connected());
}

#[test]
fn unknown_characteristic_fails_the_connection() {
    let device = device(MockCharacteristic::new(
        Uuid::from_u16(0xfff2),
        [0u8],
        Props::READ,
    ));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    let cause = Error::new(
        ErrorKind::NotFound,
        format!("no characteristic {}", char_id()),
    );
    block_on(async {
        assert!(senders.connect.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Info(format!("Connection error: {cause}")))
        );
        assert!(!device.is_connected());
        assert!(!senders.read.send(()));
        assert!(senders.connect.send(()));
    });
}

#[test]
fn link_loss_ends_cycle_with_info() {
    let device = device(MockCharacteristic::new(char_id(), [0u8], Props::READ));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    let cause = Error::new(ErrorKind::ConnectionFailed, "link lost");
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(device.drop_connection(cause.clone()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Info(format!("Connection error: {cause}")))
        );
        assert!(!senders.read.send(()));

        connect(&senders, &mut presenter, false).await;
    });
}

#[test]
fn connect_timeout() {
    let device = MockDevice::builder()
        .latency(Duration::from_millis(500))
        .add_service(
            Uuid::from_u16(0xfff0),
            vec![MockCharacteristic::new(char_id(), [0u8], Props::READ)],
        )
        .build();
    let config = PresenterConfig::default().connect_timeout(Duration::from_millis(20));
    let (senders, mut presenter) = start(&device, config);
    block_on(async {
        assert!(senders.connect.send(()));
        match presenter.next().await {
            Some(PresenterEvent::Info(text)) => {
                assert!(text.starts_with("Connection error: timed out"), "{text}")
            }
            other => panic!("unexpected event {other:?}"),
        }
    });
    assert!(!device.is_connected());
}

#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl RecordingLogger {
    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl OperationEventLogger for RecordingLogger {
    fn on_operation_enqueued(&self, event: &OperationEvent) {
        self.push(format!("enqueued {}", event.operation_name));
    }

    fn on_operation_started(&self, event: &OperationEvent) {
        self.push(format!("started {}", event.operation_name));
    }

    fn on_operation_failed(&self, event: &OperationEvent, message: &str) {
        self.push(format!("failed {}: {message}", event.operation_name));
    }

    fn on_operation_finished(&self, event: &OperationEvent, result: Option<&str>) {
        self.push(format!(
            "finished {} {}",
            event.operation_name,
            result.unwrap_or("-")
        ));
    }
}

#[test]
fn operations_are_reported_to_the_logger() {
    let device = device(
        MockCharacteristic::new(char_id(), [0xcau8, 0xfe], Props::READ | Props::NOTIFY)
            .descriptor(CCCD, [0u8, 0]),
    );
    let logger = Arc::new(RecordingLogger::default());
    let config = PresenterConfig::default().operation_logger(logger.clone());
    let (senders, mut presenter) = start(&device, config);
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.read.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::Result(vec![0xca, 0xfe], OperationKind::Read))
        );
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert!(device.notify(char_id(), [0x01u8]));
        assert!(presenter.next().await.is_some());
    });
    assert_eq!(
        *logger.lines.lock().unwrap(),
        vec![
            "enqueued READ",
            "started READ",
            "finished READ CAFE",
            "enqueued NOTIFY setup",
            "started NOTIFY setup",
            "finished NOTIFY setup ",
            "finished NOTIFY 01",
        ]
    );
}

#[test]
fn cancelled_operations_are_reported_as_failed() {
    let device = MockDevice::builder()
        .latency(Duration::from_millis(50))
        .add_service(
            Uuid::from_u16(0xfff0),
            vec![
                MockCharacteristic::new(char_id(), [0u8], Props::READ | Props::NOTIFY)
                    .descriptor(CCCD, [0u8, 0]),
            ],
        )
        .build();
    let logger = Arc::new(RecordingLogger::default());
    let config = PresenterConfig::default().operation_logger(logger.clone());
    let (senders, mut presenter) = start(&device, config);
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        assert!(senders.enable_notify.send(()));
        settle(&mut presenter).await;
        assert!(senders.enabling_notify.send(()));
        assert_eq!(
            presenter.next().await,
            Some(PresenterEvent::CompatibilityMode(false))
        );

        assert!(senders.read.send(()));
        settle(&mut presenter).await;
        assert!(senders.disconnect.send(()));
        settle(&mut presenter).await;
    });
    assert!(!device.is_connected());
    assert_eq!(
        *logger.lines.lock().unwrap(),
        vec![
            "enqueued NOTIFY setup",
            "started NOTIFY setup",
            "failed NOTIFY setup: cancelled",
            "enqueued READ",
            "started READ",
            "failed READ: cancelled",
        ]
    );
}

#[test]
fn presenter_ends_with_connect_intents() {
    let device = device(MockCharacteristic::new(char_id(), [0u8], Props::READ));
    let (senders, mut presenter) = start(&device, PresenterConfig::default());
    block_on(async {
        connect(&senders, &mut presenter, false).await;
        drop(senders);
        // the established cycle keeps running until it ends on its own
        settle(&mut presenter).await;
        assert!(device.drop_connection(Error::from(ErrorKind::NotConnected)));
        assert!(matches!(
            presenter.next().await,
            Some(PresenterEvent::Info(_))
        ));
        assert_eq!(presenter.next().await, None);
    });
    assert!(!device.is_connected());
}
