//! Integration tests for guestwire.
//!
//! Each test runs a whole session over an in-memory WebSocket and an
//! in-memory data channel, playing the host side by hand.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use guestwire::protocol::{
    encode_services_request, parse_services_response, Header, ServiceInfo, HEADER_SIZE,
};
use guestwire::runtime::{guest_fn, RECV_FLAG_NONBLOCK};
use guestwire::service::ServiceContext;
use guestwire::transport::MemoryChannel;
use guestwire::{
    Guest, GuestOutcome, GuestwireError, Session, SessionBuilder, SessionObserver,
};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type Socket = WebSocketStream<DuplexStream>;

const SIGNAL_NONE: u16 = 0;
const SIGNAL_ORIGIN: u16 = 1;
const SIGNAL_SERVICES: u16 = 2;
const SIGNAL_MESSAGE: u16 = 3;
const POLLOUT: u16 = 1;

fn signal(code: u16, flags: u16, payload: &[u8]) -> Vec<u8> {
    let header = Header::new((HEADER_SIZE + payload.len()) as u32, code, flags);
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn message(atom: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = atom.to_le_bytes().to_vec();
    payload.extend_from_slice(body);
    signal(SIGNAL_MESSAGE, 0, &payload)
}

async fn socket_pair() -> (Socket, Socket) {
    let (client, server) = duplex(256 * 1024);
    (
        WebSocketStream::from_raw_socket(client, Role::Client, None).await,
        WebSocketStream::from_raw_socket(server, Role::Server, None).await,
    )
}

/// Send `frame` from the host side as one binary message.
async fn send_signal(server: &mut Socket, frame: Vec<u8>) {
    server.send(Message::Binary(frame.into())).await.unwrap();
}

/// Read one event message from the host side of the control channel.
async fn read_event(server: &mut Socket) -> (Header, Vec<u8>) {
    let message = tokio::time::timeout(Duration::from_secs(5), server.next())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
        .unwrap();
    let data = match message {
        Message::Binary(data) => data,
        other => panic!("expected a binary event, got {:?}", other),
    };

    let header = Header::decode(&data).unwrap();
    assert_eq!(header.length as usize, data.len());
    (header, data[HEADER_SIZE..].to_vec())
}

/// Guest that stays alive until the host feeds it one byte.
fn wait_then_exit() -> impl Guest {
    guest_fn(|host| {
        let mut buf = [0u8; 1];
        host.recv(&mut buf, 0)?;
        host.exit(0)
    })
}

async fn start(builder: SessionBuilder, channel: &MemoryChannel) -> (Session, Socket) {
    let (client, server) = socket_pair().await;
    let session = builder
        .start_with(client, channel.clone(), wait_then_exit())
        .unwrap();
    (session, server)
}

async fn finish(session: Session, channel: &MemoryChannel) {
    channel.push_inbound(Bytes::from_static(b"x"));
    assert_eq!(session.wait().await.unwrap(), GuestOutcome::Status(0));
}

fn noop(_: Bytes, _: &ServiceContext) -> guestwire::Result<()> {
    Ok(())
}

#[derive(Clone, Default)]
struct Recorder {
    origins: Arc<Mutex<Vec<Bytes>>>,
    exits: Arc<Mutex<Vec<GuestOutcome>>>,
}

impl SessionObserver for Recorder {
    fn on_origin(&mut self, payload: Bytes) {
        self.origins.lock().unwrap().push(payload);
    }

    fn on_exit(&mut self, outcome: &GuestOutcome) {
        self.exits.lock().unwrap().push(outcome.clone());
    }
}

/// Discovery answers in request order, zeroing unknown names.
#[tokio::test]
async fn test_service_discovery_round_trip() {
    let channel = MemoryChannel::new();
    let builder = Session::builder()
        .service("kv", 1, noop)
        .service("log", 2, noop);
    let (session, mut server) = start(builder, &channel).await;

    let request = encode_services_request(&["log", "nope", "kv"]);
    send_signal(&mut server, signal(SIGNAL_SERVICES, 0, &request)).await;

    let (header, payload) = read_event(&mut server).await;
    assert_eq!(header.code, 2);
    assert_eq!(header.length, 8 + 4 + 3 * 8);
    assert_eq!(
        parse_services_response(&payload).unwrap(),
        vec![
            ServiceInfo::new(2, 2),
            ServiceInfo::UNAVAILABLE,
            ServiceInfo::new(1, 1),
        ]
    );

    finish(session, &channel).await;
}

/// Discovery response bytes for `["kv", "log"]` with atoms 7 and 9.
#[tokio::test]
async fn test_service_discovery_exact_bytes() {
    let channel = MemoryChannel::new();
    let builder = Session::builder()
        .service_at(7, "kv", 1, noop)
        .service_at(9, "log", 2, noop);
    let (session, mut server) = start(builder, &channel).await;

    let request = encode_services_request(&["kv", "log"]);
    send_signal(&mut server, signal(SIGNAL_SERVICES, 0, &request)).await;

    let (header, payload) = read_event(&mut server).await;
    let mut raw = header.encode().to_vec();
    raw.extend_from_slice(&payload);
    assert_eq!(
        raw,
        [
            0x1c, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, // header
            0x02, 0x00, 0x00, 0x00, // count
            0x07, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, // kv
            0x09, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, // log
        ]
    );

    finish(session, &channel).await;
}

/// Several POLLOUT-flagged signals before an idle point yield one ack.
#[tokio::test]
async fn test_pollout_coalescing() {
    let channel = MemoryChannel::new();
    let (session, mut server) = start(Session::builder(), &channel).await;

    for _ in 0..5 {
        server
            .feed(Message::Binary(signal(SIGNAL_NONE, POLLOUT, b"").into()))
            .await
            .unwrap();
    }
    server.flush().await.unwrap();

    let (header, payload) = read_event(&mut server).await;
    assert_eq!(header, Header::new(8, 0, 0));
    assert!(payload.is_empty());

    // The next event is the discovery answer, not a second ack.
    send_signal(
        &mut server,
        signal(SIGNAL_SERVICES, 0, &encode_services_request::<&str>(&[])),
    )
    .await;
    let (header, _) = read_event(&mut server).await;
    assert_eq!(header.code, 2);

    // The acknowledgment re-arms.
    send_signal(&mut server, signal(SIGNAL_NONE, POLLOUT, b"")).await;
    let (header, _) = read_event(&mut server).await;
    assert_eq!(header, Header::new(8, 0, 0));

    finish(session, &channel).await;
}

/// Events sent before the channel opens go out first, in order.
#[tokio::test]
async fn test_pending_queue_flushed_in_order() {
    let channel = MemoryChannel::new();
    let (client, server) = duplex(64 * 1024);
    let mut server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    let (open_tx, open_rx) = oneshot::channel::<()>();

    let connect = async move {
        let _ = open_rx.await;
        Ok::<_, GuestwireError>(WebSocketStream::from_raw_socket(client, Role::Client, None).await)
    };
    let session = Session::builder()
        .start_with_connector(connect, channel.clone(), wait_then_exit())
        .unwrap();

    let handle = session.handle();
    handle.send_origin(&b"first"[..]).unwrap();
    handle.send_origin(&b"second"[..]).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    open_tx.send(()).unwrap();
    handle.send_origin(&b"third"[..]).unwrap();

    let expected: [&[u8]; 3] = [b"first", b"second", b"third"];
    for expected in expected {
        let (header, payload) = read_event(&mut server).await;
        assert_eq!(header.code, 1);
        assert_eq!(payload, expected);
    }

    finish(session, &channel).await;
}

/// A handler reply travels back as a MESSAGE event for its own atom.
#[tokio::test]
async fn test_message_dispatch_and_reply() {
    let channel = MemoryChannel::new();
    let builder = Session::builder()
        .service("noop", 1, noop)
        .service("echo", 1, |payload: Bytes, ctx: &ServiceContext| {
            ctx.send(&payload)
        });
    let (session, mut server) = start(builder, &channel).await;

    send_signal(&mut server, message(2, b"ping")).await;

    let (header, payload) = read_event(&mut server).await;
    assert_eq!(header.code, 3);
    let mut expected = 2u32.to_le_bytes().to_vec();
    expected.extend_from_slice(b"ping");
    assert_eq!(payload, expected);

    finish(session, &channel).await;
}

#[tokio::test]
async fn test_origin_signal_reaches_observer() {
    let channel = MemoryChannel::new();
    let recorder = Recorder::default();
    let (session, mut server) =
        start(Session::builder().observer(recorder.clone()), &channel).await;

    send_signal(&mut server, signal(SIGNAL_ORIGIN, 0, b"https://host.example")).await;
    send_signal(&mut server, signal(SIGNAL_NONE, POLLOUT, b"")).await;
    read_event(&mut server).await;

    assert_eq!(
        recorder.origins.lock().unwrap().as_slice(),
        &[Bytes::from_static(b"https://host.example")]
    );

    finish(session, &channel).await;
    assert_eq!(
        recorder.exits.lock().unwrap().as_slice(),
        &[GuestOutcome::Status(0)]
    );
}

#[tokio::test]
async fn test_message_to_atom_zero_is_fatal() {
    let channel = MemoryChannel::new();
    let (session, mut server) = start(Session::builder().service("svc", 1, noop), &channel).await;

    send_signal(&mut server, message(0, b"data")).await;

    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, GuestwireError::Protocol(ref m) if m.contains("invalid service identifier 0")));
    channel.close();
}

#[tokio::test]
async fn test_message_to_unknown_atom_is_fatal() {
    let channel = MemoryChannel::new();
    let (session, mut server) = start(Session::builder(), &channel).await;

    send_signal(&mut server, message(42, b"")).await;

    assert!(session.wait().await.is_err());
    channel.close();
}

#[tokio::test]
async fn test_oversized_frame_is_fatal() {
    let channel = MemoryChannel::new();
    let (session, mut server) = start(Session::builder(), &channel).await;

    // Only the header: the declared length alone is a violation.
    send_signal(&mut server, Header::new(70_000, 3, 0).encode().to_vec()).await;

    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, GuestwireError::Protocol(ref m) if m.contains("exceeds maximum")));
    channel.close();
}

#[tokio::test]
async fn test_unrecognized_signal_code_is_fatal() {
    let channel = MemoryChannel::new();
    let (session, mut server) = start(Session::builder(), &channel).await;

    send_signal(&mut server, signal(9, 0, b"")).await;

    assert!(matches!(
        session.wait().await.unwrap_err(),
        GuestwireError::Protocol(_)
    ));
    channel.close();
}

/// Guest I/O goes through the data channel with the `recv` contract.
#[tokio::test]
async fn test_guest_recv_and_send_contract() {
    let channel = MemoryChannel::new();
    channel.push_inbound(Bytes::from_static(b"hello world"));
    let (client, _server) = socket_pair().await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let guest = guest_fn(move |host| {
        let mut buf = [0u8; 5];
        let left = host.recv(&mut buf, 0)?;
        sink.lock().unwrap().push((left, buf.to_vec()));

        let mut buf = [0u8; 16];
        let left = host.recv(&mut buf, 0)?;
        sink.lock().unwrap().push((left, buf[..16 - left].to_vec()));

        // Nothing pending and nothing available.
        let mut buf = [0u8; 4];
        let left = host.recv(&mut buf, RECV_FLAG_NONBLOCK)?;
        sink.lock().unwrap().push((left, Vec::new()));

        host.send(b"done")?;
        host.exit(0)
    });

    let session = Session::builder()
        .start_with(client, channel.clone(), guest)
        .unwrap();

    assert_eq!(session.wait().await.unwrap(), GuestOutcome::Status(0));
    assert_eq!(
        observed.lock().unwrap().as_slice(),
        &[
            (0, b"hello".to_vec()),
            (10, b" world".to_vec()),
            (4, Vec::new()),
        ]
    );
    assert_eq!(channel.sent(), vec![b"done".to_vec()]);
}

/// The first exit status is the one reported, exactly once.
#[tokio::test]
async fn test_exit_reported_once_with_first_status() {
    let channel = MemoryChannel::new();
    let recorder = Recorder::default();
    let (client, _server) = socket_pair().await;

    let guest = guest_fn(|host| {
        let _ = host.exit::<()>(3);
        host.exit(4)
    });
    let session = Session::builder()
        .observer(recorder.clone())
        .start_with(client, channel, guest)
        .unwrap();

    assert_eq!(session.wait().await.unwrap(), GuestOutcome::Status(3));
    assert_eq!(
        recorder.exits.lock().unwrap().as_slice(),
        &[GuestOutcome::Status(3)]
    );
}

#[tokio::test]
async fn test_guest_panic_reported_as_fault() {
    let recorder = Recorder::default();
    let (client, _server) = socket_pair().await;

    let session = Session::builder()
        .observer(recorder.clone())
        .start_with(
            client,
            MemoryChannel::new(),
            guest_fn(|_| panic!("trap: unreachable")),
        )
        .unwrap();

    let outcome = session.wait().await.unwrap();
    assert_eq!(outcome, GuestOutcome::Fault("trap: unreachable".to_string()));
    assert_eq!(recorder.exits.lock().unwrap().len(), 1);
}

/// A data-channel timeout tears the session down.
#[tokio::test]
async fn test_data_channel_timeout_is_fatal() {
    let channel = MemoryChannel::with_timeout(Duration::from_millis(20));
    let recorder = Recorder::default();
    let (client, _server) = socket_pair().await;

    let session = Session::builder()
        .observer(recorder.clone())
        .start_with(client, channel, wait_then_exit())
        .unwrap();

    assert!(matches!(
        session.wait().await.unwrap_err(),
        GuestwireError::Timeout
    ));
    assert!(recorder.exits.lock().unwrap().is_empty());
}

/// A frame whose declared length disagrees with its message is rejected
/// before anything in it is acted on.
#[tokio::test]
async fn test_length_mismatch_is_fatal_without_partial_processing() {
    let channel = MemoryChannel::new();
    let recorder = Recorder::default();
    let (session, mut server) =
        start(Session::builder().observer(recorder.clone()), &channel).await;

    let mut short = Header::new(20, SIGNAL_ORIGIN, POLLOUT).encode().to_vec();
    short.extend_from_slice(b"hello");
    send_signal(&mut server, short).await;
    send_signal(&mut server, signal(SIGNAL_NONE, 0, b"")).await;

    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, GuestwireError::Protocol(ref m) if m.contains("inconsistent frame size")));
    assert!(recorder.origins.lock().unwrap().is_empty());
    channel.close();
}

/// Two frames packed into one message are one malformed frame.
#[tokio::test]
async fn test_message_carries_exactly_one_frame() {
    let channel = MemoryChannel::new();
    let recorder = Recorder::default();
    let (session, mut server) =
        start(Session::builder().observer(recorder.clone()), &channel).await;

    let mut packed = signal(SIGNAL_ORIGIN, 0, b"one");
    packed.extend(signal(SIGNAL_ORIGIN, 0, b"two"));
    send_signal(&mut server, packed).await;

    assert!(matches!(
        session.wait().await.unwrap_err(),
        GuestwireError::Protocol(_)
    ));
    assert!(recorder.origins.lock().unwrap().is_empty());
    channel.close();
}
