//! Sequential accept loop.
//!
//! One connection is accepted, driven to completion through a fresh
//! [`ConnectionSession`], answered and closed before the next accept. A
//! successful boot-target change ends with a delay and a restart.

use std::io;

use crate::config::{ServerConfig, RECV_BUFFER_SIZE};
use crate::error::{OtaError, SetupError};
use crate::response::Response;
use crate::restart::Restart;
use crate::session::{ConnectionSession, Step};
use crate::storage::{RegionInfo, Regions, Storage};
use crate::transport::{Connection, Listener};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY_MS: u32 = 100;

/// How a connection ended.
#[derive(Debug)]
pub enum Disposition {
    /// A boot target was selected and the restart was triggered.
    Restarting { label: String },
    /// Command body without a recognized command; closed without a reply.
    Ignored,
    /// Failure reply sent; nothing was made bootable.
    Failed(OtaError),
}

pub struct OtaServer<S: Storage, R: Restart, const N: usize = RECV_BUFFER_SIZE> {
    storage: S,
    restart: R,
    regions: Regions<S::Region>,
    config: ServerConfig,
}

impl<S: Storage, R: Restart, const N: usize> OtaServer<S, R, N> {
    pub fn new(mut storage: S, restart: R, config: ServerConfig) -> Result<Self, SetupError> {
        let regions = Regions::discover(&mut storage)?;
        if let Some(boot) = storage.current_boot_region() {
            log::info!(
                "Current boot partition '{}' subtype {} at offset 0x{:x}",
                boot.label(),
                boot.subtype(),
                boot.offset()
            );
        }
        Ok(Self {
            storage,
            restart,
            regions,
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn restarter(&self) -> &R {
        &self.restart
    }

    /// Serve connections forever.
    pub fn serve<L: Listener>(&mut self, listener: &mut L) -> ! {
        loop {
            if let Err(e) = self.serve_one(listener) {
                log::warn!("Accept failed: {e}");
                self.restart.delay_ms(ACCEPT_RETRY_DELAY_MS);
            }
        }
    }

    /// Accept and fully handle a single connection.
    pub fn serve_one<L: Listener>(&mut self, listener: &mut L) -> io::Result<Disposition> {
        log::info!("Listening for connection ...");
        let mut connection = listener.accept()?;
        let disposition = self.handle_connection(&mut connection);

        if let Disposition::Restarting { label } = &disposition {
            log::info!("Next boot partition is {label}");
            if let Some(boot) = self.storage.current_boot_region() {
                log::info!(
                    "Next boot partition subtype {} at offset 0x{:x}",
                    boot.subtype(),
                    boot.offset()
                );
            }
            log::info!("Prepare to restart system!");
            self.restart.delay_ms(self.config.restart_delay_ms);
            self.restart.restart();
        }
        Ok(disposition)
    }

    /// Drive one connection through its session, reply and close it.
    ///
    /// Does not restart; [`OtaServer::serve_one`] does that.
    pub fn handle_connection<C: Connection>(&mut self, connection: &mut C) -> Disposition {
        let disposition = match self.process(connection) {
            Ok(Some(label)) => {
                reply(connection, Response::BootTargetSet { label: &label });
                Disposition::Restarting { label }
            }
            Ok(None) => Disposition::Ignored,
            Err(e) => {
                log::error!("OTA request failed: {e}");
                reply(connection, Response::Failure { code: e.code() });
                Disposition::Failed(e)
            }
        };
        connection.close();
        disposition
    }

    fn process<C: Connection>(&mut self, connection: &mut C) -> Result<Option<String>, OtaError> {
        let mut session = ConnectionSession::<S, N>::new(&mut self.storage, &self.regions);
        let mut scratch = [0u8; N];

        loop {
            let limit = session.read_limit().min(N);
            let received = match connection.receive(&mut scratch[..limit]) {
                Ok(n) => n,
                Err(e) => return Err(session.fail(e)),
            };
            if session.feed(&scratch[..received])? == Step::Done {
                break;
            }
        }

        let region = session.finish()?;
        Ok(region.map(|r| r.label().to_owned()))
    }
}

// Fire-and-forget: the connection is closed right after either way.
fn reply<C: Connection>(connection: &mut C, response: Response<'_>) {
    let encoded = response.encode();
    if let Err(e) = connection.send(encoded.as_bytes()) {
        log::warn!("Failed to send response: {e}");
    }
}
