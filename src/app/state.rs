use crate::handlers::ReadBatch;
use crate::hw::FoundDevice;

const CLEAR_AFTER_SECONDS: i64 = 3 * 24 * 60 * 60;

/// In-memory collector state for one logger.
///
/// Rebuilt from scratch on every process start; the local store absorbs the
/// duplicates a restart refetches.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DeviceState {
    device: Option<FoundDevice>,
    newest_session_time: i64,
    oldest_session_time: i64,
    period: Option<u32>,
    consecutive_errors: u32,
    diagnostics_pending: bool,
}

impl DeviceState {
    /// Creates empty state. With `diagnostics`, the next cycle queries the firmware version.
    #[must_use]
    pub fn new(diagnostics: bool) -> Self {
        Self {
            diagnostics_pending: diagnostics,
            ..Self::default()
        }
    }

    /// Cached discovery result, if any.
    #[must_use]
    pub fn device(&self) -> Option<&FoundDevice> {
        self.device.as_ref()
    }

    /// Start time of the most recent session fetched, or `0`.
    #[must_use]
    pub fn newest_session_time(&self) -> i64 {
        self.newest_session_time
    }

    /// Start time of the oldest session fetched since the last clear, or `0` when unset.
    #[must_use]
    pub fn oldest_session_time(&self) -> i64 {
        self.oldest_session_time
    }

    /// Sampling period of the latest session.
    #[must_use]
    pub fn period(&self) -> Option<u32> {
        self.period
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub(crate) fn remember_device(&mut self, device: FoundDevice) {
        self.device = Some(device);
    }

    pub(crate) fn forget_device(&mut self) {
        self.device = None;
    }

    pub(crate) fn record_error(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    pub(crate) fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Folds a complete batch into the high-water marks.
    pub(crate) fn record_batch(&mut self, batch: &ReadBatch) {
        if let Some(newest) = batch.newest_time() {
            self.newest_session_time = self.newest_session_time.max(newest);
        }
        if self.oldest_session_time == 0
            && let Some(oldest) = batch.oldest_time()
        {
            self.oldest_session_time = oldest;
        }
        if let Some(period) = batch.newest_period() {
            self.period = Some(period);
        }
    }

    /// Whether device storage is old enough to be erased.
    #[must_use]
    pub fn clear_due(&self, clear_enabled: bool, now: i64) -> bool {
        clear_enabled
            && self.oldest_session_time != 0
            && now - self.oldest_session_time >= CLEAR_AFTER_SECONDS
    }

    pub(crate) fn mark_cleared(&mut self) {
        self.oldest_session_time = 0;
    }

    /// Returns whether the one-off diagnostics exchange is still owed, then marks it done.
    pub(crate) fn take_diagnostics(&mut self) -> bool {
        std::mem::take(&mut self.diagnostics_pending)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::handlers::{ReaderState, SessionReader};

    fn batch(listing: &str) -> ReadBatch {
        let mut reader = SessionReader::new(false);
        assert_eq!(ReaderState::Done, reader.on_chunk(listing.as_bytes()));
        reader
            .finish()
            .into_complete()
            .expect("listing used in tests should be complete")
    }

    #[test]
    fn record_batch_moves_marks_forward_only() {
        let mut state = DeviceState::new(false);

        state.record_batch(&batch(
            "id:1 t:2000 p:60 1\nid:2 t:3000 p:120 1\nTotal readings:2\n",
        ));
        assert_eq!(3000, state.newest_session_time());
        assert_eq!(2000, state.oldest_session_time());
        assert_eq!(Some(120), state.period());

        state.record_batch(&batch("id:0 t:1000 p:30 1\nTotal readings:1\n"));
        assert_eq!(3000, state.newest_session_time());
        assert_eq!(2000, state.oldest_session_time());
    }

    #[test]
    fn empty_batch_leaves_oldest_unset() {
        let mut state = DeviceState::new(false);
        state.record_batch(&batch("Total readings:0\n"));

        assert_eq!(0, state.oldest_session_time());
        assert_eq!(0, state.newest_session_time());
        assert_eq!(None, state.period());
    }

    #[rstest]
    #[case(true, 1000, 1000 + CLEAR_AFTER_SECONDS, true)]
    #[case(true, 1000, 999 + CLEAR_AFTER_SECONDS, false)]
    #[case(false, 1000, 1000 + CLEAR_AFTER_SECONDS, false)]
    #[case(true, 0, 1000 + CLEAR_AFTER_SECONDS, false)]
    fn clear_policy(
        #[case] enabled: bool,
        #[case] oldest: i64,
        #[case] now: i64,
        #[case] expected: bool,
    ) {
        let state = DeviceState {
            oldest_session_time: oldest,
            ..DeviceState::default()
        };
        assert_eq!(expected, state.clear_due(enabled, now));
    }

    #[test]
    fn diagnostics_run_once() {
        let mut state = DeviceState::new(true);
        assert!(state.take_diagnostics());
        assert!(!state.take_diagnostics());
    }
}
