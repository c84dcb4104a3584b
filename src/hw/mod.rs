mod advertisement;
mod btleplug_backend;
mod fake_backend;
mod hardware;
mod model;

pub use self::advertisement::AdvertisementDecoder;
pub use self::fake_backend::{FakeDevice, FakeResponse};
pub use self::hardware::{
    DeviceSession, HardwareClient, NotificationStream, WriteMode, fake_hardware_client,
    real_hardware_client,
};
pub use self::model::FoundDevice;
