//! Reporting of characteristic operations to an external inspector.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{log, Level};
use uuid::Uuid;

use super::{DeviceId, Result};

/// A single characteristic operation, as seen by an [OperationEventLogger].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationEvent {
    /// Unique within one [crate::Presenter]; shared by every callback about the same operation.
    pub operation_id: usize,
    pub title: String,
    pub operation_name: String,
    pub payload: Option<Vec<u8>>,
}

impl fmt::Display for OperationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({})",
            self.operation_id, self.operation_name, self.title
        )?;
        if let Some(payload) = &self.payload {
            write!(f, " payload={}", hex::encode_upper(payload))?;
        }
        Ok(())
    }
}

/// Receives the lifecycle of every operation issued by [crate::Presenter].
///
/// None of the callbacks are invoked while `is_attached` returns `false`.
pub trait OperationEventLogger: Send + Sync {
    fn is_attached(&self) -> bool {
        true
    }

    fn on_operation_enqueued(&self, event: &OperationEvent);

    fn on_operation_started(&self, event: &OperationEvent);

    fn on_operation_failed(&self, event: &OperationEvent, message: &str);

    fn on_operation_finished(&self, event: &OperationEvent, result: Option<&str>);

    /// An operation without a start or end of its own, such as a received notification.
    fn on_atomic_operation(&self, event: &OperationEvent, result: Option<&str>) {
        self.on_operation_finished(event, result)
    }
}

/// Writes operation events through the `log` facade.
#[derive(Debug, Clone, Copy)]
pub struct LogOperationLogger {
    level: Level,
}

impl Default for LogOperationLogger {
    fn default() -> Self {
        Self::new(Level::Debug)
    }
}

impl LogOperationLogger {
    pub const fn new(level: Level) -> Self {
        Self { level }
    }
}

impl OperationEventLogger for LogOperationLogger {
    fn is_attached(&self) -> bool {
        self.level <= log::max_level()
    }

    fn on_operation_enqueued(&self, event: &OperationEvent) {
        log!(self.level, "enqueued {event}");
    }

    fn on_operation_started(&self, event: &OperationEvent) {
        log!(self.level, "started {event}");
    }

    fn on_operation_failed(&self, event: &OperationEvent, message: &str) {
        log!(self.level, "failed {event}: {message}");
    }

    fn on_operation_finished(&self, event: &OperationEvent, result: Option<&str>) {
        match result {
            Some(result) => log!(self.level, "finished {event} -> {result}"),
            None => log!(self.level, "finished {event}"),
        }
    }

    fn on_atomic_operation(&self, event: &OperationEvent, result: Option<&str>) {
        log!(self.level, "{event} -> {}", result.unwrap_or("-"));
    }
}

/// Hands out operation ids and forwards to the configured logger, if any.
#[derive(Clone)]
pub(crate) struct OperationTracker {
    logger: Option<Arc<dyn OperationEventLogger>>,
    device: DeviceId,
    next_id: Arc<AtomicUsize>,
}

impl OperationTracker {
    pub fn new(logger: Option<Arc<dyn OperationEventLogger>>, device: DeviceId) -> Self {
        Self {
            logger,
            device,
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    fn attached(&self) -> Option<&dyn OperationEventLogger> {
        self.logger.as_deref().filter(|logger| logger.is_attached())
    }

    fn event(&self, name: &str, char_id: Uuid, payload: Option<Vec<u8>>) -> OperationEvent {
        OperationEvent {
            operation_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title: format!("{} {}", self.device, char_id),
            operation_name: name.to_string(),
            payload,
        }
    }

    /// Reports a new operation as enqueued and started.
    pub fn begin(&self, name: &str, char_id: Uuid, payload: Option<Vec<u8>>) -> PendingOperation {
        let Some(logger) = self.attached() else {
            return PendingOperation::detached();
        };
        let event = self.event(name, char_id, payload);
        logger.on_operation_enqueued(&event);
        logger.on_operation_started(&event);
        PendingOperation {
            logger: self.logger.clone(),
            event: Some(event),
        }
    }

    pub fn atomic(&self, name: &str, char_id: Uuid, value: &[u8]) {
        if let Some(logger) = self.attached() {
            let event = self.event(name, char_id, None);
            logger.on_atomic_operation(&event, Some(&hex::encode_upper(value)));
        }
    }
}

/// A started operation. Dropping it before [PendingOperation::end] reports it as cancelled.
pub(crate) struct PendingOperation {
    logger: Option<Arc<dyn OperationEventLogger>>,
    event: Option<OperationEvent>,
}

impl PendingOperation {
    fn detached() -> Self {
        Self {
            logger: None,
            event: None,
        }
    }

    /// Reports the outcome; later calls do nothing.
    pub fn end(&mut self, outcome: &Result<Vec<u8>>) {
        let (Some(logger), Some(event)) = (self.logger.as_deref(), self.event.take()) else {
            return;
        };
        match outcome {
            Ok(bytes) => logger.on_operation_finished(&event, Some(&hex::encode_upper(bytes))),
            Err(e) => logger.on_operation_failed(&event, &e.to_string()),
        }
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if let (Some(logger), Some(event)) = (self.logger.as_deref(), self.event.take()) {
            logger.on_operation_failed(&event, "cancelled");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{Error, ErrorKind};

    /// Collects callbacks as strings.
    #[derive(Default)]
    pub struct RecordingLogger {
        pub lines: Mutex<Vec<String>>,
        pub detached: bool,
    }

    impl OperationEventLogger for RecordingLogger {
        fn is_attached(&self) -> bool {
            !self.detached
        }

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
                result.unwrap_or("")
            ));
        }
    }

    impl RecordingLogger {
        fn push(&self, line: String) {
            self.lines.lock().unwrap().push(line);
        }
    }

    #[test]
    fn tracker_reports_lifecycle() {
        let logger = Arc::new(RecordingLogger::default());
        let tracker = OperationTracker::new(Some(logger.clone()), DeviceId::from("AA:BB"));
        let char_id = Uuid::nil();

        let mut read = tracker.begin("read", char_id, None);
        assert_eq!(read.event.as_ref().map(|e| e.operation_id), Some(1));
        read.end(&Ok(vec![0x01, 0xab]));
        read.end(&Ok(vec![0x02]));
        drop(read);

        let mut write = tracker.begin("write", char_id, Some(vec![0x02]));
        write.end(&Err(Error::new(ErrorKind::Other, "boom")));

        tracker.atomic("notification", char_id, &[0xff]);

        assert_eq!(
            *logger.lines.lock().unwrap(),
            vec![
                "enqueued read",
                "started read",
                "finished read 01AB",
                "enqueued write",
                "started write",
                "failed write: error: boom",
                "finished notification FF",
            ]
        );
    }

    #[test]
    fn dropped_operation_is_cancelled() {
        let logger = Arc::new(RecordingLogger::default());
        let tracker = OperationTracker::new(Some(logger.clone()), DeviceId::from("AA:BB"));
        drop(tracker.begin("NOTIFY setup", Uuid::nil(), None));
        assert_eq!(
            *logger.lines.lock().unwrap(),
            vec![
                "enqueued NOTIFY setup",
                "started NOTIFY setup",
                "failed NOTIFY setup: cancelled",
            ]
        );
    }

    #[test]
    fn detached_logger_is_skipped() {
        let logger = Arc::new(RecordingLogger {
            detached: true,
            ..Default::default()
        });
        let tracker = OperationTracker::new(Some(logger.clone()), DeviceId::from("AA:BB"));
        assert!(tracker.begin("read", Uuid::nil(), None).event.is_none());
        tracker.atomic("notification", Uuid::nil(), &[1]);
        assert!(logger.lines.lock().unwrap().is_empty());
    }

    #[test]
    fn event_display_includes_payload() {
        let event = OperationEvent {
            operation_id: 7,
            title: "dev".into(),
            operation_name: "write".into(),
            payload: Some(vec![0xde, 0xad]),
        };
        assert_eq!(event.to_string(), "#7 write (dev) payload=DEAD");
    }
}
