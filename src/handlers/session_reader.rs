use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::error::{InteractionError, ProtocolError};
use crate::hw::DeviceSession;
use crate::protocol::DeviceCommand;
use crate::record::SessionRecord;

use super::{CommandCorrelator, LineFramer};

const HEADER_MARKER: &str = "Data readings";
const SENTINEL_MARKER: &str = "Total readings:";
const SESSION_MARKERS: [&str; 3] = ["id:", "t:", "p:"];
const FETCH_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Classification of one complete line received during a fetch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProtocolLine {
    /// `Data readings`: start of a listing.
    Header,
    /// `Total readings:<N>`: end of a listing with the declared session count.
    Sentinel(usize),
    /// A `Total readings:` line whose count is not a number. Still ends the listing.
    UnreadableSentinel(String),
    /// A line carrying the `id:`, `t:` and `p:` markers, kept verbatim.
    Session(String),
    /// Anything else the firmware prints.
    Other(String),
}

impl ProtocolLine {
    /// Classifies a trimmed line.
    ///
    /// ```
    /// use pepperoni::ProtocolLine;
    ///
    /// assert_eq!(ProtocolLine::Sentinel(3), ProtocolLine::classify("Total readings:3"));
    /// assert_eq!(ProtocolLine::Header, ProtocolLine::classify("Data readings"));
    /// ```
    #[must_use]
    pub fn classify(line: &str) -> Self {
        if line.contains(HEADER_MARKER) {
            return Self::Header;
        }

        if let Some(position) = line.find(SENTINEL_MARKER) {
            let declared = line[position + SENTINEL_MARKER.len()..].trim();
            return match declared.parse() {
                Ok(count) => Self::Sentinel(count),
                Err(_) => Self::UnreadableSentinel(line.to_string()),
            };
        }

        if SESSION_MARKERS.iter().all(|marker| line.contains(marker)) {
            return Self::Session(line.to_string());
        }

        Self::Other(line.to_string())
    }
}

/// Whether the reader wants more chunks.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReaderState {
    Continue,
    Done,
}

/// Sessions collected by one fetch.
///
/// Every session line is kept verbatim. Lines whose header parses are also
/// available as [`SessionRecord`]s, which feed the high-water marks.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReadBatch {
    lines: Vec<String>,
    records: Vec<SessionRecord>,
    declared_count: usize,
    terminated: bool,
    unreadable_sentinel: Option<String>,
}

impl ReadBatch {
    /// Session lines in arrival order, exactly as listed.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consumes the batch, returning its session lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Session lines whose header parses, in arrival order.
    #[must_use]
    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    /// Session count the device declared, or the running count without a sentinel.
    #[must_use]
    pub fn declared_count(&self) -> usize {
        self.declared_count
    }

    /// Whether the sentinel line was received.
    #[must_use]
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Latest session start time in the batch.
    #[must_use]
    pub fn newest_time(&self) -> Option<i64> {
        self.records.iter().map(SessionRecord::time).max()
    }

    /// Earliest session start time in the batch.
    #[must_use]
    pub fn oldest_time(&self) -> Option<i64> {
        self.records.iter().map(SessionRecord::time).min()
    }

    /// Sampling period of the most recent session.
    #[must_use]
    pub fn newest_period(&self) -> Option<u32> {
        self.records
            .iter()
            .max_by_key(|record| record.time())
            .map(SessionRecord::period)
    }
}

/// Result of a fetch: either every declared session arrived, or some are missing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FetchOutcome {
    Complete(ReadBatch),
    Incomplete { partial: ReadBatch },
}

impl FetchOutcome {
    /// The batch, complete or not.
    #[must_use]
    pub fn batch(&self) -> &ReadBatch {
        match self {
            Self::Complete(batch) | Self::Incomplete { partial: batch } => batch,
        }
    }

    /// Returns the batch when complete.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IncompleteTransfer`] when the collected count
    /// does not match the declared count, and
    /// [`ProtocolError::UnreadableSessionCount`] when the sentinel carried no
    /// usable count.
    pub fn into_complete(self) -> Result<ReadBatch, ProtocolError> {
        match self {
            Self::Complete(batch) => Ok(batch),
            Self::Incomplete { partial } => match partial.unreadable_sentinel {
                Some(line) => Err(ProtocolError::UnreadableSessionCount { line }),
                None => Err(ProtocolError::IncompleteTransfer {
                    declared: partial.declared_count,
                    collected: partial.lines.len(),
                }),
            },
        }
    }
}

/// Incremental parser for a `turndata disp` listing.
///
/// Feed it every notification chunk through [`SessionReader::on_chunk`], then
/// call [`SessionReader::finish`] once the reply ends.
#[derive(Debug, Default)]
pub struct SessionReader {
    framer: LineFramer,
    batch: ReadBatch,
    echo_lines: bool,
}

impl SessionReader {
    /// Creates a reader. With `echo_lines`, every received line is logged at info.
    #[must_use]
    pub fn new(echo_lines: bool) -> Self {
        Self {
            echo_lines,
            ..Self::default()
        }
    }

    /// Consumes one notification chunk.
    ///
    /// ```
    /// use pepperoni::{FetchOutcome, ReaderState, SessionReader};
    ///
    /// let mut reader = SessionReader::new(false);
    /// assert_eq!(ReaderState::Continue, reader.on_chunk(b"Data readings\nid:1 t:1000 p:60 1"));
    /// assert_eq!(ReaderState::Done, reader.on_chunk(b"0\nTotal readings:1\n"));
    /// assert!(matches!(reader.finish(), FetchOutcome::Complete(_)));
    /// ```
    pub fn on_chunk(&mut self, chunk: &[u8]) -> ReaderState {
        if self.batch.terminated {
            return ReaderState::Done;
        }

        for line in self.framer.push(chunk) {
            if self.echo_lines {
                info!(line = %line, "device");
            }

            match ProtocolLine::classify(&line) {
                ProtocolLine::Header => self.batch.declared_count = 0,
                ProtocolLine::Sentinel(count) => {
                    self.batch.declared_count = count;
                    self.batch.terminated = true;
                    break;
                }
                ProtocolLine::UnreadableSentinel(line) => {
                    warn!(line = %line, "listing ended without a readable session count");
                    self.batch.unreadable_sentinel = Some(line);
                    self.batch.terminated = true;
                    break;
                }
                ProtocolLine::Session(line) => self.collect(line),
                ProtocolLine::Other(line) => trace!(line = %line, "ignoring device output"),
            }
        }

        if self.batch.terminated {
            ReaderState::Done
        } else {
            ReaderState::Continue
        }
    }

    fn collect(&mut self, line: String) {
        match SessionRecord::parse(&line) {
            Ok(record) => self.batch.records.push(record),
            Err(error) => warn!(line = %line, %error, "session header does not parse"),
        }
        self.batch.lines.push(line);
    }

    /// Compares the declared count with the sessions collected so far.
    #[must_use]
    pub fn finish(self) -> FetchOutcome {
        let batch = self.batch;
        if batch.unreadable_sentinel.is_none() && batch.declared_count == batch.lines.len() {
            FetchOutcome::Complete(batch)
        } else {
            FetchOutcome::Incomplete { partial: batch }
        }
    }
}

/// Fetches sessions newer than the high-water mark.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFetchHandler {
    echo_lines: bool,
}

impl SessionFetchHandler {
    /// Creates a handler. With `echo_lines`, each device line is logged at info.
    #[must_use]
    pub fn new(echo_lines: bool) -> Self {
        Self { echo_lines }
    }

    /// Sends `turndata disp <newest + 1>` and reads the listing.
    ///
    /// Stops at the sentinel line or after five seconds without a chunk.
    /// A link that drops before the sentinel fails the fetch, whatever was
    /// collected so far.
    ///
    /// ```
    /// # async fn demo(session: pepperoni::DeviceSession) -> Result<(), pepperoni::ProtocolError> {
    /// use pepperoni::SessionFetchHandler;
    ///
    /// let batch = SessionFetchHandler::new(false)
    ///     .fetch(&session, 0)
    ///     .await?
    ///     .into_complete()?;
    /// println!("{} sessions", batch.records().len());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the command exchange fails at the transport
    /// level, including [`InteractionError::LinkDropped`].
    #[instrument(skip(self, session), level = "debug")]
    pub async fn fetch(
        &self,
        session: &DeviceSession,
        newest_session_time: i64,
    ) -> Result<FetchOutcome, InteractionError> {
        let command = DeviceCommand::TurnDataDisplay {
            min_time: newest_session_time + 1,
        };
        let mut reader = SessionReader::new(self.echo_lines);

        let reply = CommandCorrelator::send(session, &command, FETCH_IDLE_TIMEOUT, |chunk| {
            reader.on_chunk(chunk) == ReaderState::Done
        })
        .await?;

        let outcome = reader.finish();
        match &outcome {
            FetchOutcome::Complete(batch) => {
                info!(sessions = batch.lines().len(), "transferred sessions");
                debug!(terminated = batch.terminated(), ended_by = ?reply.ended_by());
            }
            FetchOutcome::Incomplete { partial } => warn!(
                declared = partial.declared_count(),
                collected = partial.lines().len(),
                terminated = partial.terminated(),
                ended_by = ?reply.ended_by(),
                "session listing incomplete"
            ),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn read_all(chunks: &[&str]) -> FetchOutcome {
        let mut reader = SessionReader::new(false);
        for chunk in chunks {
            if reader.on_chunk(chunk.as_bytes()) == ReaderState::Done {
                break;
            }
        }
        reader.finish()
    }

    #[rstest]
    #[case("Data readings", ProtocolLine::Header)]
    #[case("Total readings:12", ProtocolLine::Sentinel(12))]
    #[case("Total readings: 0", ProtocolLine::Sentinel(0))]
    #[case(
        "Total readings:lots",
        ProtocolLine::UnreadableSentinel("Total readings:lots".to_string())
    )]
    #[case(
        "id:x t:1000 p:60 1,2",
        ProtocolLine::Session("id:x t:1000 p:60 1,2".to_string())
    )]
    #[case("turndata disp 1001", ProtocolLine::Other("turndata disp 1001".to_string()))]
    fn classify_recognises_listing_lines(#[case] line: &str, #[case] expected: ProtocolLine) {
        assert_eq!(expected, ProtocolLine::classify(line));
    }

    #[test]
    fn split_session_line_is_reassembled() {
        let outcome = read_all(&[
            "Data readings\n",
            "id:1 t:1000 p:60 10,11,",
            "12\n",
            "Total readings:1\n",
        ]);

        let batch = outcome.into_complete().unwrap();
        assert_eq!(1, batch.records().len());
        assert_eq!("id:1 t:1000 p:60 10,11,12", batch.records()[0].line());
        assert!(batch.terminated());
    }

    #[rstest]
    #[case(vec!["Data readings\nTotal readings:0\n"], true)]
    #[case(vec!["Data readings\nid:1 t:5 p:60 1\nTotal readings:1\n"], true)]
    #[case(vec!["Data readings\nid:1 t:5 p:60 1\nTotal readings:2\n"], false)]
    #[case(
        vec!["Data readings\nid:1 t:5 p:60 1\nid:2 t:6 p:60 1\nTotal readings:1\n"],
        false
    )]
    #[case(vec!["Data readings\nid:1 t:5 p:60 1\n"], false)]
    #[case(vec!["Data readings\n"], true)]
    #[case(Vec::new(), true)]
    fn incomplete_iff_declared_count_differs(#[case] chunks: Vec<&str>, #[case] complete: bool) {
        let outcome = read_all(&chunks);
        assert_eq!(complete, matches!(outcome, FetchOutcome::Complete(_)));
    }

    #[test]
    fn unparseable_session_lines_still_count() {
        let outcome = read_all(&[
            "Data readings\nid:1 t:1000 p:60 10,11,x\nid:x t:bad p:60 1\n",
            "id:2 t:1960 p:60 1,2\nTotal readings:3\n",
        ]);

        let batch = outcome.into_complete().unwrap();
        assert_eq!(
            vec![
                "id:1 t:1000 p:60 10,11,x".to_string(),
                "id:x t:bad p:60 1".to_string(),
                "id:2 t:1960 p:60 1,2".to_string(),
            ],
            batch.lines()
        );
        assert_eq!(2, batch.records().len());
        assert_eq!(Some(1960), batch.newest_time());
    }

    #[test]
    fn unreadable_sentinel_ends_listing_as_incomplete() {
        let mut reader = SessionReader::new(false);

        assert_eq!(
            ReaderState::Done,
            reader.on_chunk(b"id:1 t:5 p:60 1\nTotal readings:?\n")
        );
        assert_matches!(
            reader.finish().into_complete(),
            Err(ProtocolError::UnreadableSessionCount { line }) if line == "Total readings:?"
        );
    }

    #[test]
    fn lines_after_sentinel_are_ignored() {
        let mut reader = SessionReader::new(false);
        assert_eq!(
            ReaderState::Done,
            reader.on_chunk(b"Total readings:0\nid:1 t:5 p:60 1\n")
        );
        assert_eq!(ReaderState::Done, reader.on_chunk(b"id:2 t:6 p:60 1\n"));

        assert_matches!(reader.finish(), FetchOutcome::Complete(batch) if batch.is_empty());
    }

    #[test]
    fn batch_tracks_time_range_and_latest_period() {
        let outcome = read_all(&[
            "id:1 t:2000 p:30 1\nid:2 t:1000 p:60 1\nid:3 t:1500 p:60 1\nTotal readings:3\n",
        ]);
        let batch = outcome.into_complete().unwrap();

        assert_eq!(Some(2000), batch.newest_time());
        assert_eq!(Some(1000), batch.oldest_time());
        assert_eq!(Some(30), batch.newest_period());
    }
}
