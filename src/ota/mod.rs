// OTA backends - ESP-IDF partitions and restart for the ota-core server

mod partition;
mod restart;

pub use partition::{EspPartitionStorage, OtaWrite, Partition};
pub use restart::EspRestart;
