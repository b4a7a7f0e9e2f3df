//! Per-connection request state machine.
//!
//! A [`ConnectionSession`] is fed raw chunks as they arrive from the
//! transport. It accumulates the header block until the terminator shows up,
//! classifies the request once, then routes body bytes either straight into
//! an [`UpdateWriter`] (firmware) or into its own buffer (boot command).
//!
//! ```text
//! AwaitingHeader --header parsed--> Streaming --predicate false--> Completed
//!        |                              |
//!        +------- read error / early close ----------------------> Errored
//!        +------- rejected request / storage failure ------------> Aborted
//! ```
//!
//! An open firmware write is aborted on every path except a successful
//! [`ConnectionSession::finish`], including a session dropped mid-stream.

use crate::error::{HeaderError, OtaError, TransportError};
use crate::header::{
    find_terminator, parse_header, Classification, RequestHeader, FACTORY_COMMAND,
    HEADER_TERMINATOR,
};
use crate::storage::{RegionInfo, Regions, Storage};
use crate::writer::UpdateWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingHeader,
    Streaming,
    Completed,
    Aborted,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep reading; at most [`ConnectionSession::read_limit`] bytes.
    Continue,
    /// All needed bytes are in; call [`ConnectionSession::finish`].
    Done,
}

pub struct ConnectionSession<'a, S: Storage, const N: usize> {
    storage: &'a mut S,
    regions: &'a Regions<S::Region>,
    state: State,
    declared_length: Option<usize>,
    bytes_received: usize,
    classification: Classification,
    buffer: [u8; N],
    filled: usize,
    body_start: usize,
    writer: Option<UpdateWriter<S>>,
    last_progress: usize,
}

impl<'a, S: Storage, const N: usize> ConnectionSession<'a, S, N> {
    pub fn new(storage: &'a mut S, regions: &'a Regions<S::Region>) -> Self {
        Self {
            storage,
            regions,
            state: State::AwaitingHeader,
            declared_length: None,
            bytes_received: 0,
            classification: Classification::Unclassified,
            buffer: [0; N],
            filled: 0,
            body_start: 0,
            writer: None,
            last_progress: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn declared_length(&self) -> Option<usize> {
        self.declared_length
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    pub fn has_open_write(&self) -> bool {
        self.writer.is_some()
    }

    /// Largest chunk the next read should ask for.
    ///
    /// Body reads never extend past the declared length, so a peer sending
    /// trailing bytes cannot push the byte count beyond it.
    pub fn read_limit(&self) -> usize {
        match (self.state, self.classification) {
            (State::AwaitingHeader, _) => N - self.filled,
            (State::Streaming, Classification::FirmwareUpload) => self.remaining(),
            (State::Streaming, Classification::BootCommand) => {
                self.remaining().min(N - self.filled)
            }
            _ => 0,
        }
    }

    /// Route one chunk. An empty chunk is the peer closing the connection.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Step, OtaError> {
        let result = match self.state {
            State::AwaitingHeader | State::Streaming if chunk.is_empty() => {
                Err(TransportError::PeerClosed {
                    received: self.bytes_received,
                }
                .into())
            }
            State::AwaitingHeader => self.feed_header(chunk),
            State::Streaming => self.feed_body(chunk),
            State::Completed | State::Aborted | State::Errored => Ok(Step::Done),
        };
        if let Err(e) = &result {
            self.terminate(if e.is_transport() {
                State::Errored
            } else {
                State::Aborted
            });
        }
        result
    }

    /// Record a failed read on the transport.
    pub fn fail(&mut self, error: std::io::Error) -> OtaError {
        self.terminate(State::Errored);
        TransportError::Receive(error).into()
    }

    /// Act on a completed request.
    ///
    /// Returns the region selected as the next boot target, or `None` when a
    /// command body carried no recognized command.
    pub fn finish(mut self) -> Result<Option<&'a S::Region>, OtaError> {
        if self.state != State::Completed {
            self.terminate(State::Errored);
            return Err(TransportError::PeerClosed {
                received: self.bytes_received,
            }
            .into());
        }
        let regions = self.regions;

        match self.classification {
            Classification::FirmwareUpload => {
                let Some(writer) = self.writer.take() else {
                    return Ok(None);
                };
                writer.commit(self.storage, &regions.update)?;
                Ok(Some(&regions.update))
            }
            Classification::BootCommand => {
                let body = &self.buffer[self.body_start..self.filled];
                if !contains(body, FACTORY_COMMAND) {
                    log::info!("No recognized command in {} byte body, ignoring", body.len());
                    return Ok(None);
                }
                log::info!("Factory command received");
                self.storage.select_boot_region(&regions.factory)?;
                Ok(Some(&regions.factory))
            }
            Classification::Unclassified => Ok(None),
        }
    }

    fn feed_header(&mut self, chunk: &[u8]) -> Result<Step, OtaError> {
        if chunk.len() > N - self.filled {
            return Err(HeaderError::TooLarge { limit: N }.into());
        }
        // The terminator may straddle the previous read.
        let search_from = self.filled.saturating_sub(HEADER_TERMINATOR.len() - 1);
        self.buffer[self.filled..self.filled + chunk.len()].copy_from_slice(chunk);
        self.filled += chunk.len();

        let Some(end) = find_terminator(&self.buffer[search_from..self.filled]) else {
            if self.filled == N {
                return Err(HeaderError::TooLarge { limit: N }.into());
            }
            log::debug!("Header incomplete after {} bytes", self.filled);
            return Ok(Step::Continue);
        };
        let end = search_from + end;

        let header = parse_header(&self.buffer[..end])?;
        self.start_body(header)?;
        self.body_start = end + HEADER_TERMINATOR.len();

        // Anything past the declared length is dropped.
        let body_end = self
            .filled
            .min(self.body_start.saturating_add(header.declared_length));
        self.bytes_received = body_end - self.body_start;

        match self.classification {
            Classification::FirmwareUpload => {
                if let Some(writer) = self.writer.as_mut() {
                    writer.write(self.storage, &self.buffer[self.body_start..body_end])?;
                }
                self.filled = self.body_start;
                self.log_progress();
            }
            _ => self.filled = body_end,
        }
        self.state = State::Streaming;
        self.next_step()
    }

    fn start_body(&mut self, header: RequestHeader) -> Result<(), OtaError> {
        log::info!(
            "Detected content length: {}, classification: {:?}",
            header.declared_length,
            header.classification
        );
        if header.classification == Classification::FirmwareUpload {
            let capacity = self.regions.update.size() as usize;
            if header.declared_length == 0 {
                return Err(HeaderError::EmptyImage.into());
            }
            if header.declared_length > capacity {
                return Err(HeaderError::ImageTooLarge {
                    declared: header.declared_length,
                    capacity,
                }
                .into());
            }
            self.writer = Some(UpdateWriter::begin(self.storage, &self.regions.update)?);
        }
        self.declared_length = Some(header.declared_length);
        self.classification = header.classification;
        Ok(())
    }

    fn feed_body(&mut self, chunk: &[u8]) -> Result<Step, OtaError> {
        let take = chunk.len().min(self.read_limit());
        let chunk = &chunk[..take];

        match self.classification {
            Classification::FirmwareUpload => {
                if let Some(writer) = self.writer.as_mut() {
                    writer.write(self.storage, chunk)?;
                }
                self.bytes_received += take;
                self.log_progress();
            }
            _ => {
                self.buffer[self.filled..self.filled + take].copy_from_slice(chunk);
                self.filled += take;
                self.bytes_received += take;
            }
        }
        self.next_step()
    }

    fn next_step(&mut self) -> Result<Step, OtaError> {
        if !self.wants_more() {
            self.state = State::Completed;
            return Ok(Step::Done);
        }
        if self.classification == Classification::BootCommand && self.filled == N {
            return Err(OtaError::BufferExhausted { capacity: N });
        }
        Ok(Step::Continue)
    }

    // Commands stop as soon as enough bytes for the token have arrived.
    fn wants_more(&self) -> bool {
        let declared = self.declared_length.unwrap_or(0);
        self.bytes_received < declared
            && (self.classification == Classification::FirmwareUpload
                || self.bytes_received < FACTORY_COMMAND.len())
    }

    fn remaining(&self) -> usize {
        self.declared_length
            .unwrap_or(0)
            .saturating_sub(self.bytes_received)
    }

    fn log_progress(&mut self) {
        let Some(declared) = self.declared_length.filter(|&d| d > 0) else {
            return;
        };
        let percent = progress_percent(self.bytes_received, declared);
        if percent >= self.last_progress + 10 || (percent == 100 && self.last_progress < 100) {
            log::info!("Received: {percent}% ({}/{declared})", self.bytes_received);
            self.last_progress = percent;
        }
    }

    fn terminate(&mut self, state: State) {
        self.state = state;
        if let Some(writer) = self.writer.take() {
            writer.abort(self.storage);
        }
    }
}

impl<S: Storage, const N: usize> Drop for ConnectionSession<'_, S, N> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort(self.storage);
        }
    }
}

// u64 so 32-bit targets don't overflow on large images.
fn progress_percent(received: usize, declared: usize) -> usize {
    (received as u64 * 100 / declared as u64) as usize
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{codes, StorageOp};
    use crate::sim::{SimRegion, SimStorage, StorageEvent};

    const UPLOAD: &str = "POST /update HTTP/1.1\r\nContent-Type: application/octet-stream\r\n";

    fn upload_header(len: usize) -> Vec<u8> {
        format!("{UPLOAD}Content-Length: {len}\r\n\r\n").into_bytes()
    }

    fn command(body: &str) -> Vec<u8> {
        format!(
            "Content-Type: text/parameters\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    fn setup() -> (SimStorage, Regions<SimRegion>) {
        let mut storage = SimStorage::default();
        let regions = Regions::discover(&mut storage).unwrap();
        (storage, regions)
    }

    #[test]
    fn header_split_across_reads() {
        let (mut storage, regions) = setup();
        let mut request = upload_header(4);
        request.extend_from_slice(b"\x01\x02\x03\x04");

        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        // Split inside the terminator itself.
        let split = request.len() - 6;
        assert_eq!(session.feed(&request[..split]).unwrap(), Step::Continue);
        assert_eq!(session.state(), State::AwaitingHeader);
        assert_eq!(session.feed(&request[split..]).unwrap(), Step::Done);
        assert_eq!(session.bytes_received(), 4);
        assert_eq!(session.finish().unwrap().map(|r| r.label.as_str()), Some("ota_0"));

        assert_eq!(storage.image("ota_0"), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn trailing_bytes_beyond_declared_length_are_dropped() {
        let (mut storage, regions) = setup();
        let mut request = upload_header(3);
        request.extend_from_slice(b"abcdef");

        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        assert_eq!(session.feed(&request).unwrap(), Step::Done);
        assert_eq!(session.bytes_received(), 3);
        session.finish().unwrap();
        assert_eq!(storage.image("ota_0"), Some(&b"abc"[..]));
    }

    #[test]
    fn read_limit_tracks_remaining_body() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 128>::new(&mut storage, &regions);
        assert_eq!(session.read_limit(), 128);
        session.feed(&upload_header(300)).unwrap();
        assert_eq!(session.read_limit(), 300);
        session.feed(&[0u8; 100]).unwrap();
        assert_eq!(session.read_limit(), 200);
    }

    #[test]
    fn oversized_header_is_rejected() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 32>::new(&mut storage, &regions);
        let junk = [b'x'; 32];
        let err = session.feed(&junk).unwrap_err();
        assert!(matches!(err, OtaError::MalformedRequest(HeaderError::TooLarge { limit: 32 })));
        assert_eq!(session.state(), State::Aborted);
        drop(session);
        assert!(storage.events().is_empty());
    }

    #[test]
    fn unknown_content_type_opens_nothing() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        let err = session
            .feed(b"Content-Type: text/plain\r\nContent-Length: 7\r\n\r\nfactory")
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARG);
        drop(session);
        assert!(storage.events().is_empty());
    }

    #[test]
    fn empty_or_oversized_images_are_rejected_before_begin() {
        let mut storage = SimStorage::default()
            .with_update_region(Some(SimRegion::new("ota_0", 0x10, 0x110000, 1000)));
        let regions = Regions::discover(&mut storage).unwrap();

        for (len, expected) in [(0, HeaderError::EmptyImage), (
            1001,
            HeaderError::ImageTooLarge {
                declared: 1001,
                capacity: 1000,
            },
        )] {
            let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
            match session.feed(&upload_header(len)).unwrap_err() {
                OtaError::MalformedRequest(e) => assert_eq!(e, expected),
                other => panic!("unexpected error {other:?}"),
            }
        }
        assert!(storage.events().is_empty());
    }

    #[test]
    fn early_close_aborts_exactly_once() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        session.feed(&upload_header(100)).unwrap();
        session.feed(&[7u8; 40]).unwrap();
        assert!(session.has_open_write());

        let err = session.feed(&[]).unwrap_err();
        assert!(matches!(err, OtaError::Transport(TransportError::PeerClosed { received: 40 })));
        assert_eq!(session.state(), State::Errored);
        assert!(!session.has_open_write());
        drop(session);

        assert_eq!(storage.count(|e| matches!(e, StorageEvent::Abort)), 1);
        assert_eq!(storage.count(|e| matches!(e, StorageEvent::SelectBoot(_))), 0);
        assert_eq!(storage.open_sessions(), 0);
    }

    #[test]
    fn dropped_session_aborts_open_write() {
        let (mut storage, regions) = setup();
        {
            let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
            session.feed(&upload_header(100)).unwrap();
        }
        assert_eq!(storage.count(|e| matches!(e, StorageEvent::Abort)), 1);
        assert_eq!(storage.boot_label(), Some("factory"));
    }

    #[test]
    fn write_failure_aborts_session() {
        let (mut storage, regions) = setup();
        storage.fail_on(StorageOp::Write);
        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        session.feed(&upload_header(10)).unwrap();
        let err = session.feed(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, OtaError::Storage(e) if e.op == StorageOp::Write));
        assert_eq!(session.state(), State::Aborted);
        drop(session);
        assert_eq!(storage.count(|e| matches!(e, StorageEvent::Abort)), 1);
    }

    #[test]
    fn command_stops_at_token_length() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        let header = b"Content-Type: text/parameters\r\nContent-Length: 50\r\n\r\n";
        assert_eq!(session.feed(header).unwrap(), Step::Continue);
        assert_eq!(session.feed(b"fac").unwrap(), Step::Continue);
        assert_eq!(session.feed(b"tory").unwrap(), Step::Done);
        assert_eq!(session.finish().unwrap().map(|r| r.label.as_str()), Some("factory"));
        assert_eq!(storage.events(), &[StorageEvent::SelectBoot("factory".into())]);
    }

    #[test]
    fn command_without_token_is_ignored() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        assert_eq!(session.feed(&command("restart")).unwrap(), Step::Done);
        assert!(session.finish().unwrap().is_none());
        assert!(storage.events().is_empty());
    }

    #[test]
    fn command_buffer_exhaustion_fails_closed() {
        let (mut storage, regions) = setup();
        // 64-byte buffer: the header leaves only a few bytes for the body.
        let header = b"Content-Type: text/parameters\r\nContent-Length: 7\r\nX-Pad:12\r\n\r\n";
        assert_eq!(header.len(), 62);
        let mut session = ConnectionSession::<_, 64>::new(&mut storage, &regions);
        session.feed(&header[..]).unwrap();
        let err = session.feed(b"fa").unwrap_err();
        assert!(matches!(err, OtaError::BufferExhausted { capacity: 64 }));
        drop(session);
        assert!(storage.events().is_empty());
    }

    #[test]
    fn progress_percent_handles_large_images() {
        assert_eq!(progress_percent(0, 1024), 0);
        assert_eq!(progress_percent(512, 1024), 50);
        // 100 * 50 MB does not fit a 32-bit usize.
        assert_eq!(progress_percent(50_000_000, 100_000_000), 50);
        assert_eq!(progress_percent(100_000_000, 100_000_000), 100);
    }

    #[test]
    fn finish_before_completion_is_an_error() {
        let (mut storage, regions) = setup();
        let mut session = ConnectionSession::<_, 256>::new(&mut storage, &regions);
        session.feed(&upload_header(10)).unwrap();
        assert!(session.finish().is_err());
        assert_eq!(storage.count(|e| matches!(e, StorageEvent::Abort)), 1);
        assert_eq!(storage.count(|e| matches!(e, StorageEvent::Finalize)), 0);
    }
}
