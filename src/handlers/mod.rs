mod correlator;
mod line_framer;
mod maintenance;
mod session_reader;
mod time_sync;

pub use self::correlator::{CommandCorrelator, ExchangeEnd, ExchangeReply};
pub use self::line_framer::LineFramer;
pub use self::maintenance::{ClearHandler, VersionHandler};
pub use self::session_reader::{
    FetchOutcome, ProtocolLine, ReadBatch, ReaderState, SessionFetchHandler, SessionReader,
};
pub use self::time_sync::TimeSyncHandler;
