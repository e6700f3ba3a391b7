//! Server status flags and transaction-boundary notifications.

use std::fmt;

use crate::protocol::server_status::*;

/// Status bitmask reported in OK and EOF packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatus(u16);

impl ServerStatus {
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn in_transaction(self) -> bool {
        self.0 & SERVER_STATUS_IN_TRANS != 0
    }

    pub const fn autocommit(self) -> bool {
        self.0 & SERVER_STATUS_AUTOCOMMIT != 0
    }

    pub const fn more_results_exist(self) -> bool {
        self.0 & SERVER_MORE_RESULTS_EXISTS != 0
    }

    pub const fn no_good_index_used(self) -> bool {
        self.0 & SERVER_STATUS_NO_GOOD_INDEX_USED != 0
    }

    pub const fn no_index_used(self) -> bool {
        self.0 & SERVER_STATUS_NO_INDEX_USED != 0
    }

    pub const fn cursor_exists(self) -> bool {
        self.0 & SERVER_STATUS_CURSOR_EXISTS != 0
    }

    pub const fn last_row_sent(self) -> bool {
        self.0 & SERVER_STATUS_LAST_ROW_SENT != 0
    }

    pub const fn query_was_slow(self) -> bool {
        self.0 & SERVER_QUERY_WAS_SLOW != 0
    }

    pub const fn session_state_changed(self) -> bool {
        self.0 & SERVER_SESSION_STATE_CHANGED != 0
    }
}

impl From<u16> for ServerStatus {
    fn from(bits: u16) -> Self {
        Self(bits)
    }
}

/// Transaction boundary observed through the in-transaction status bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    Begun,
    Completed,
}

/// Receives one call per in-transaction flip.
pub trait TransactionListener: Send {
    fn on_transaction_event(&mut self, event: TransactionEvent);
}

impl<F> TransactionListener for F
where
    F: FnMut(TransactionEvent) + Send,
{
    fn on_transaction_event(&mut self, event: TransactionEvent) {
        self(event);
    }
}

/// Session status: the latest bitmask, the one before it, and the warning
/// count of the last command.
#[derive(Default)]
pub struct StatusTracker {
    current: ServerStatus,
    previous: ServerStatus,
    warnings: u16,
    listener: Option<Box<dyn TransactionListener>>,
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("warnings", &self.warnings)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl StatusTracker {
    pub fn new(initial: ServerStatus) -> Self {
        Self {
            current: initial,
            previous: initial,
            ..Self::default()
        }
    }

    pub fn current(&self) -> ServerStatus {
        self.current
    }

    pub fn previous(&self) -> ServerStatus {
        self.previous
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn set_listener(&mut self, listener: Option<Box<dyn TransactionListener>>) {
        self.listener = listener;
    }

    /// Start of a new command.
    ///
    /// Clears the warning count and every per-command flag (slow query,
    /// index usage, cursor, more results). The transaction and autocommit
    /// bits are session state and carry over, so no boundary event fires.
    pub fn begin_command(&mut self) {
        self.current = ServerStatus(
            self.current.0 & (SERVER_STATUS_IN_TRANS | SERVER_STATUS_AUTOCOMMIT),
        );
        self.warnings = 0;
    }

    pub(crate) fn set_warnings(&mut self, warnings: u16) {
        self.warnings = warnings;
    }

    /// Record the flags and warnings of an OK or EOF packet.
    ///
    /// Every packet is recorded, including those between chained results,
    /// so a flip is reported exactly once.
    pub fn update(&mut self, status_flags: u16, warnings: u16) {
        self.previous = self.current;
        self.current = ServerStatus(status_flags);
        self.warnings = self.warnings.saturating_add(warnings);

        let event = match (self.previous.in_transaction(), self.current.in_transaction()) {
            (false, true) => TransactionEvent::Begun,
            (true, false) => TransactionEvent::Completed,
            _ => return,
        };
        tracing::trace!(?event, status = status_flags, "transaction boundary");
        if let Some(listener) = self.listener.as_mut() {
            listener.on_transaction_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_tracker() -> (StatusTracker, Arc<Mutex<Vec<TransactionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut tracker = StatusTracker::new(ServerStatus::new(SERVER_STATUS_AUTOCOMMIT));
        tracker.set_listener(Some(Box::new(move |event: TransactionEvent| sink.lock().unwrap().push(event))));
        (tracker, events)
    }

    #[test]
    fn test_transaction_flips_on_off_on() {
        let (mut tracker, events) = recording_tracker();
        tracker.update(SERVER_STATUS_IN_TRANS, 0);
        tracker.update(SERVER_STATUS_AUTOCOMMIT, 0);
        tracker.update(SERVER_STATUS_IN_TRANS, 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![TransactionEvent::Begun, TransactionEvent::Completed, TransactionEvent::Begun]
        );
    }

    #[test]
    fn test_no_event_without_flip() {
        let (mut tracker, events) = recording_tracker();
        tracker.update(SERVER_STATUS_AUTOCOMMIT, 0);
        tracker.update(SERVER_STATUS_IN_TRANS | SERVER_MORE_RESULTS_EXISTS, 0);
        tracker.update(SERVER_STATUS_IN_TRANS, 0);
        assert_eq!(*events.lock().unwrap(), vec![TransactionEvent::Begun]);
        assert!(tracker.current().in_transaction());
        assert!(tracker.previous().more_results_exist());
    }

    #[test]
    fn test_warnings_accumulate_until_reset() {
        let mut tracker = StatusTracker::default();
        tracker.update(0, 2);
        tracker.update(0, 1);
        assert_eq!(tracker.warnings(), 3);
        tracker.begin_command();
        assert_eq!(tracker.warnings(), 0);
    }

    #[test]
    fn test_begin_command_keeps_session_bits() {
        let (mut tracker, events) = recording_tracker();
        tracker.update(
            SERVER_STATUS_IN_TRANS | SERVER_STATUS_AUTOCOMMIT | SERVER_QUERY_WAS_SLOW | SERVER_STATUS_NO_INDEX_USED,
            0,
        );
        tracker.begin_command();
        let status = tracker.current();
        assert!(status.in_transaction());
        assert!(status.autocommit());
        assert!(!status.query_was_slow());
        assert!(!status.no_index_used());

        tracker.update(SERVER_STATUS_IN_TRANS, 0);
        assert_eq!(*events.lock().unwrap(), vec![TransactionEvent::Begun]);
    }

    #[test]
    fn test_status_bits() {
        let status = ServerStatus::from(SERVER_STATUS_CURSOR_EXISTS | SERVER_QUERY_WAS_SLOW);
        assert!(status.cursor_exists());
        assert!(status.query_was_slow());
        assert!(!status.last_row_sent());
        assert!(!status.autocommit());
    }
}
