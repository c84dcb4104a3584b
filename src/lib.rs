mod app;
mod cli;
mod error;
mod handlers;
mod hw;
mod protocol;
mod record;
mod store;
mod telemetry;
mod upload;

pub use app::{
    ConnectionOrchestrator, CycleReport, DeviceState, ERROR_COOLDOWN, ERROR_COOLDOWN_THRESHOLD,
    MIN_READ_DELAY, ScheduleController, TickOutcome, build_controller, candidate_delay,
    next_read_delay, run,
};
pub use cli::{Args, CollectorConfig, Command};
pub use error::{InteractionError, ProtocolError, StoreError, UploadError};
pub use handlers::{
    ClearHandler, CommandCorrelator, ExchangeEnd, ExchangeReply, FetchOutcome, LineFramer,
    ProtocolLine, ReadBatch, ReaderState, SessionFetchHandler, SessionReader, TimeSyncHandler,
    VersionHandler,
};
pub use hw::{
    AdvertisementDecoder, DeviceSession, FakeDevice, FakeResponse, FoundDevice, HardwareClient,
    NotificationStream, WriteMode, fake_hardware_client, real_hardware_client,
};
pub use protocol::{ADVERTISEMENT_MANUFACTURER_ID, COMMAND_MARKER, DeviceCommand, EndpointId};
pub use record::{RecordParseError, SessionRecord};
pub use store::{LocalStore, MergeReport};
pub use upload::{ReqwestUploadClient, SessionUploadForm, UploadClient, UploadForwarder};
