//! End-to-end request handling over scripted and real TCP connections.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use ota_core::header::FACTORY_COMMAND;
use ota_core::sim::{RecordingRestart, ScriptedConnection, SimStorage, StorageEvent};
use ota_core::{Disposition, OtaServer, RequestHeader, ServerConfig};
use proptest::prelude::*;

fn server() -> OtaServer<SimStorage, RecordingRestart> {
    OtaServer::new(SimStorage::default(), RecordingRestart::default(), ServerConfig::default())
        .unwrap()
}

fn upload(image: &[u8]) -> Vec<u8> {
    let mut request = RequestHeader::firmware(image.len()).encode().into_bytes();
    request.extend_from_slice(image);
    request
}

/// Cut `data` into pieces of the given sizes; the tail goes last.
fn split(data: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut rest = data;
    for &size in sizes {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(size.min(rest.len()));
        chunks.push(head.to_vec());
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest.to_vec());
    }
    chunks
}

proptest! {
    #[test]
    fn any_chunking_writes_exactly_the_declared_length(
        image in proptest::collection::vec(any::<u8>(), 1..4096),
        sizes in proptest::collection::vec(1usize..700, 0..16),
    ) {
        let mut server = server();
        let mut connection = ScriptedConnection::from_chunks(split(&upload(&image), &sizes));

        let disposition = server.handle_connection(&mut connection);
        prop_assert!(
            matches!(disposition, Disposition::Restarting { .. }),
            "expected a restart, got {:?}",
            disposition
        );

        let storage = server.storage();
        prop_assert_eq!(storage.writes().iter().sum::<usize>(), image.len());
        prop_assert_eq!(storage.image("ota_0"), Some(image.as_slice()));
        prop_assert_eq!(storage.count(|e| matches!(e, StorageEvent::Finalize)), 1);
    }

    #[test]
    fn truncated_upload_never_becomes_bootable(
        image in proptest::collection::vec(any::<u8>(), 2..2048),
        keep in 0.0f64..1.0,
        sizes in proptest::collection::vec(1usize..300, 0..8),
    ) {
        let request = upload(&image);
        let header_len = request.len() - image.len();
        let cut = header_len + ((image.len() - 1) as f64 * keep) as usize;

        let mut server = server();
        let mut connection = ScriptedConnection::from_chunks(split(&request[..cut], &sizes));
        let disposition = server.handle_connection(&mut connection);
        prop_assert!(
            matches!(disposition, Disposition::Failed(ref e) if e.is_transport()),
            "expected a transport failure, got {:?}",
            disposition
        );

        let storage = server.storage();
        prop_assert_eq!(storage.count(|e| matches!(e, StorageEvent::Abort)), 1);
        prop_assert_eq!(storage.count(|e| matches!(e, StorageEvent::SelectBoot(_))), 0);
        prop_assert_eq!(storage.boot_label(), Some("factory"));
        prop_assert_eq!(storage.open_sessions(), 0);
    }
}

fn roundtrip_over_tcp(request: Vec<u8>) -> (Disposition, String, OtaServer<SimStorage, RecordingRestart>) {
    let mut listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        for chunk in request.chunks(333) {
            stream.write_all(chunk).unwrap();
        }
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();
        reply
    });

    let mut server = server();
    let disposition = server.serve_one(&mut listener).unwrap();
    let reply = client.join().unwrap();
    (disposition, reply, server)
}

#[test]
fn firmware_upload_over_tcp() {
    let image: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
    let (disposition, reply, server) = roundtrip_over_tcp(upload(&image));

    assert!(matches!(disposition, Disposition::Restarting { .. }));
    assert_eq!(reply, "200 OK\n\nSuccess. Next boot partition is ota_0\n");
    assert_eq!(server.storage().image("ota_0"), Some(image.as_slice()));
    assert_eq!(server.storage().boot_label(), Some("ota_0"));
    assert_eq!(server.restarter().restarts, 1);
}

#[test]
fn factory_command_over_tcp() {
    let mut request = RequestHeader::factory_command().encode().into_bytes();
    request.extend_from_slice(FACTORY_COMMAND);
    let (disposition, reply, server) = roundtrip_over_tcp(request);

    assert!(matches!(disposition, Disposition::Restarting { ref label } if label == "factory"));
    assert_eq!(reply, "200 OK\n\nSuccess. Next boot partition is factory\n");
    assert_eq!(server.storage().boot_label(), Some("factory"));
}

#[test]
fn unsupported_request_over_tcp_gets_failure_reply() {
    let request = b"POST / HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi".to_vec();
    let (disposition, reply, server) = roundtrip_over_tcp(request);

    assert!(matches!(disposition, Disposition::Failed(_)));
    assert_eq!(reply, "400 Bad Request\n\nFailure. Error code: 0x102\n");
    assert!(server.storage().events().is_empty());
    assert_eq!(server.restarter().restarts, 0);
}
