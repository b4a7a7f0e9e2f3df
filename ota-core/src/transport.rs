//! Transport interface plus the `std::net` implementation.
//!
//! ESP-IDF ships a std-compatible socket layer, so the same TCP code serves
//! on the device and in host tests.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};

use crate::error::SetupError;

/// One accepted client.
pub trait Connection {
    /// Read at most `buf.len()` bytes. `Ok(0)` means the peer closed.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn close(&mut self);
}

pub trait Listener {
    type Connection: Connection;

    fn accept(&mut self) -> io::Result<Self::Connection>;
}

impl Connection for TcpStream {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn close(&mut self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            log::debug!("Socket shutdown failed: {e}");
        }
    }
}

impl Listener for TcpListener {
    type Connection = TcpStream;

    fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, addr) = TcpListener::accept(self)?;
        log::info!("TCP connection established with {addr}");
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Bind the listening socket on all interfaces.
pub fn listen(port: u16) -> Result<TcpListener, SetupError> {
    log::info!("Server socket on port {port}");
    TcpListener::bind(("0.0.0.0", port)).map_err(|source| SetupError::Listen { port, source })
}
