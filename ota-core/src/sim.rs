//! In-memory collaborators for running the server on a host.
//!
//! Every storage call is recorded as a [`StorageEvent`], and connections
//! replay a fixed script of reads, so tests can assert on exact call
//! sequences and chunk sizes.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

use crate::error::{codes, StorageError, StorageOp};
use crate::restart::Restart;
use crate::storage::{RegionInfo, Storage};
use crate::transport::{Connection, Listener};

/// Code returned by operations armed with [`SimStorage::fail_on`].
pub const INJECTED_ERROR_CODE: i32 = 0x5001;

const APP_FACTORY: u32 = 0x00;
const APP_OTA_0: u32 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRegion {
    pub label: String,
    pub subtype: u32,
    pub offset: u32,
    pub size: u32,
}

impl SimRegion {
    pub fn new(label: &str, subtype: u32, offset: u32, size: u32) -> Self {
        Self {
            label: label.to_owned(),
            subtype,
            offset,
            size,
        }
    }
}

impl RegionInfo for SimRegion {
    fn label(&self) -> &str {
        &self.label
    }

    fn subtype(&self) -> u32 {
        self.subtype
    }

    fn offset(&self) -> u32 {
        self.offset
    }

    fn size(&self) -> u32 {
        self.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    Begin(String),
    Write(usize),
    Finalize,
    Abort,
    SelectBoot(String),
}

#[derive(Debug)]
pub struct SimSession {
    region: SimRegion,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct SimStorage {
    update: Option<SimRegion>,
    factory: Option<SimRegion>,
    images: HashMap<String, Vec<u8>>,
    boot: Option<String>,
    events: Vec<StorageEvent>,
    failures: Vec<StorageOp>,
    open_sessions: usize,
}

impl Default for SimStorage {
    /// A factory app plus one OTA slot, booting the factory app.
    fn default() -> Self {
        Self {
            update: Some(SimRegion::new("ota_0", APP_OTA_0, 0x110000, 0x100000)),
            factory: Some(SimRegion::new("factory", APP_FACTORY, 0x10000, 0x100000)),
            images: HashMap::new(),
            boot: Some("factory".to_owned()),
            events: Vec::new(),
            failures: Vec::new(),
            open_sessions: 0,
        }
    }
}

impl SimStorage {
    pub fn with_update_region(mut self, region: Option<SimRegion>) -> Self {
        self.update = region;
        self
    }

    pub fn with_factory_region(mut self, region: Option<SimRegion>) -> Self {
        self.factory = region;
        self
    }

    /// Make every later call of `op` fail with [`INJECTED_ERROR_CODE`].
    pub fn fail_on(&mut self, op: StorageOp) {
        self.failures.push(op);
    }

    pub fn events(&self) -> &[StorageEvent] {
        &self.events
    }

    pub fn count(&self, predicate: impl Fn(&StorageEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }

    /// Sizes of every chunk handed to `write_chunk`, in order.
    pub fn writes(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StorageEvent::Write(len) => Some(*len),
                _ => None,
            })
            .collect()
    }

    /// Finalized image stored in a region.
    pub fn image(&self, label: &str) -> Option<&[u8]> {
        self.images.get(label).map(Vec::as_slice)
    }

    pub fn boot_label(&self) -> Option<&str> {
        self.boot.as_deref()
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions
    }

    fn check(&self, op: StorageOp) -> Result<(), StorageError> {
        if self.failures.contains(&op) {
            Err(StorageError::new(op, INJECTED_ERROR_CODE))
        } else {
            Ok(())
        }
    }

    fn region_by_label(&self, label: &str) -> Option<SimRegion> {
        [self.update.as_ref(), self.factory.as_ref()]
            .into_iter()
            .flatten()
            .find(|r| r.label == label)
            .cloned()
    }
}

impl Storage for SimStorage {
    type Region = SimRegion;
    type Session = SimSession;

    fn next_update_region(&mut self) -> Option<SimRegion> {
        self.update.clone()
    }

    fn factory_region(&mut self) -> Option<SimRegion> {
        self.factory.clone()
    }

    fn current_boot_region(&mut self) -> Option<SimRegion> {
        let label = self.boot.clone()?;
        self.region_by_label(&label)
    }

    fn begin_write(
        &mut self,
        region: &SimRegion,
        _size_hint: Option<usize>,
    ) -> Result<SimSession, StorageError> {
        self.events.push(StorageEvent::Begin(region.label.clone()));
        self.check(StorageOp::Begin)?;
        self.open_sessions += 1;
        Ok(SimSession {
            region: region.clone(),
            data: Vec::new(),
        })
    }

    fn write_chunk(&mut self, session: &mut SimSession, bytes: &[u8]) -> Result<(), StorageError> {
        self.events.push(StorageEvent::Write(bytes.len()));
        self.check(StorageOp::Write)?;
        if session.data.len() + bytes.len() > session.region.size as usize {
            return Err(StorageError::new(StorageOp::Write, codes::INVALID_SIZE));
        }
        session.data.extend_from_slice(bytes);
        Ok(())
    }

    fn finalize_write(&mut self, session: SimSession) -> Result<(), StorageError> {
        self.events.push(StorageEvent::Finalize);
        self.open_sessions -= 1;
        self.check(StorageOp::Finalize)?;
        if session.data.is_empty() {
            return Err(StorageError::new(StorageOp::Finalize, codes::OTA_VALIDATE_FAILED));
        }
        self.images.insert(session.region.label, session.data);
        Ok(())
    }

    fn abort_write(&mut self, _session: SimSession) -> Result<(), StorageError> {
        self.events.push(StorageEvent::Abort);
        self.open_sessions -= 1;
        self.check(StorageOp::Abort)
    }

    fn select_boot_region(&mut self, region: &SimRegion) -> Result<(), StorageError> {
        self.events.push(StorageEvent::SelectBoot(region.label.clone()));
        self.check(StorageOp::SelectBoot)?;
        let bootable = region.subtype == APP_FACTORY || self.images.contains_key(&region.label);
        if !bootable {
            return Err(StorageError::new(StorageOp::SelectBoot, codes::OTA_VALIDATE_FAILED));
        }
        self.boot = Some(region.label.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ReadEvent {
    Data(Vec<u8>),
    /// A failed read carrying this OS error number.
    Error(i32),
}

/// What the server did to a scripted connection.
#[derive(Debug, Default)]
pub struct Transcript {
    pub sent: Vec<u8>,
    pub closed: bool,
    pub receive_calls: usize,
    /// Window size offered by each `receive` call.
    pub windows: Vec<usize>,
}

impl Transcript {
    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.sent).into_owned()
    }
}

/// Replays reads in order. A `Data` event larger than the offered window is
/// split, the remainder delivered by the next call. Once the script runs out
/// every read reports an orderly close.
#[derive(Debug)]
pub struct ScriptedConnection {
    reads: VecDeque<ReadEvent>,
    transcript: Rc<RefCell<Transcript>>,
}

impl ScriptedConnection {
    pub fn new(reads: impl IntoIterator<Item = ReadEvent>) -> Self {
        Self {
            reads: reads.into_iter().collect(),
            transcript: Rc::default(),
        }
    }

    pub fn from_chunks<C: AsRef<[u8]>>(chunks: impl IntoIterator<Item = C>) -> Self {
        Self::new(
            chunks
                .into_iter()
                .map(|c| ReadEvent::Data(c.as_ref().to_vec())),
        )
    }

    pub fn transcript(&self) -> Rc<RefCell<Transcript>> {
        Rc::clone(&self.transcript)
    }

    /// Bytes still queued for delivery.
    pub fn undelivered(&self) -> usize {
        self.reads
            .iter()
            .map(|e| match e {
                ReadEvent::Data(d) => d.len(),
                ReadEvent::Error(_) => 0,
            })
            .sum()
    }
}

impl Connection for ScriptedConnection {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut transcript = self.transcript.borrow_mut();
            transcript.receive_calls += 1;
            transcript.windows.push(buf.len());
        }
        match self.reads.pop_front() {
            None => Ok(0),
            Some(ReadEvent::Error(code)) => Err(io::Error::from_raw_os_error(code)),
            Some(ReadEvent::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(ReadEvent::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.transcript.borrow_mut().sent.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.transcript.borrow_mut().closed = true;
    }
}

#[derive(Debug, Default)]
pub struct ScriptedListener {
    pending: VecDeque<ScriptedConnection>,
}

impl ScriptedListener {
    pub fn push(&mut self, connection: ScriptedConnection) {
        self.pending.push_back(connection);
    }
}

impl Listener for ScriptedListener {
    type Connection = ScriptedConnection;

    fn accept(&mut self) -> io::Result<ScriptedConnection> {
        self.pending
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no pending connection"))
    }
}

#[derive(Debug, Default)]
pub struct RecordingRestart {
    pub delays: Vec<u32>,
    pub restarts: usize,
}

impl Restart for RecordingRestart {
    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}
