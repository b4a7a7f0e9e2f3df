//! OTA Core - Hardware-independent logic for the local-network OTA server
//!
//! This crate contains the request parsing, body streaming and accept loop
//! that can be tested on the host platform without requiring ESP32 hardware.
//! The firmware crate supplies the partition and restart implementations.

pub mod config;
pub mod error;
pub mod header;
pub mod response;
pub mod restart;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod storage;
pub mod transport;
pub mod writer;

pub use config::ServerConfig;
pub use error::{OtaError, SetupError, StorageError, StorageOp};
pub use header::{Classification, RequestHeader};
pub use response::Response;
pub use restart::Restart;
pub use server::{Disposition, OtaServer};
pub use storage::{RegionInfo, Regions, Storage};
pub use transport::{Connection, Listener};
