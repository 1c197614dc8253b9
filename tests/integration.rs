//! Integration tests for cluster-rpc.
//!
//! Each test drives a real `Client` over an in-memory duplex stream. The
//! other end is a small fake server that decodes request frames with the
//! crate's own framing and writes response frames back.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use cluster_rpc::codec::PayloadFormat;
use cluster_rpc::protocol::{build_frame, encode_varint, FrameBuffer};
use cluster_rpc::{done_channel, Client, Kind, Request, Response, RpcError};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Server side of a duplex connection.
struct FakeServer {
    stream: DuplexStream,
    frames: FrameBuffer,
    format: PayloadFormat,
    /// Every byte received, in order.
    raw: Vec<u8>,
}

impl FakeServer {
    fn new(stream: DuplexStream) -> Self {
        Self::with_format(stream, PayloadFormat::MsgPack)
    }

    fn with_format(stream: DuplexStream, format: PayloadFormat) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
            format,
            raw: Vec::new(),
        }
    }

    async fn next_request(&mut self) -> Request {
        loop {
            match self.frames.next_frame() {
                Ok(payload) => return self.format.decode(&payload).unwrap(),
                Err(e) if e.is_incomplete() => {}
                Err(e) => panic!("bad frame from client: {}", e),
            }

            let mut buf = [0u8; 1024];
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a request")
                .unwrap();
            assert!(n > 0, "client closed the stream");
            self.frames.extend(&buf[..n]);
            self.raw.extend_from_slice(&buf[..n]);
        }
    }

    fn frame(&self, response: &Response) -> Bytes {
        build_frame(&self.format.encode(response).unwrap())
    }

    async fn respond(&mut self, response: &Response) {
        let frame = self.frame(response);
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn respond_bytewise(&mut self, response: &Response) {
        let frame = self.frame(response);
        for byte in frame.iter() {
            self.stream.write_all(&[*byte]).await.unwrap();
            self.stream.flush().await.unwrap();
            tokio::task::yield_now().await;
        }
    }
}

fn connect() -> (Client, FakeServer) {
    let (client_end, server_end) = duplex(256 * 1024);
    (Client::new(client_end), FakeServer::new(server_end))
}

#[tokio::test]
async fn test_room_join_round_trip() {
    let (client, mut server) = connect();
    let args = Bytes::from_static(b"0123456789");

    let caller = {
        let client = client.clone();
        let args = args.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Room", "Join", 7, args).await })
    };

    let request = server.next_request().await;

    // One frame, single-byte length prefix covering the whole payload
    assert!(server.raw[0] < 0x80);
    assert_eq!(server.raw[0] as usize, server.raw.len() - 1);

    assert_eq!(request.seq, 1);
    assert_eq!(request.service_method, "Room.Join");
    assert_eq!(request.sid, 7);
    assert_eq!(request.kind, Kind::Call);
    assert_eq!(request.args, args);

    server
        .respond(&Response::ok(1, Bytes::from_static(b"joined room 3")))
        .await;

    let reply = timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Bytes::from_static(b"joined room 3"));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_complete_exactly_once() {
    const CALLS: usize = 64;
    let (client, mut server) = connect();

    let mut callers = Vec::new();
    for i in 0..CALLS {
        let client = client.clone();
        callers.push(tokio::spawn(async move {
            let args = Bytes::from(format!("call-{}", i));
            let reply = client.call(Kind::Call, "Echo", "Say", i as u64, args.clone()).await;
            (args, reply)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..CALLS {
        requests.push(server.next_request().await);
    }

    let seqs: HashSet<u64> = requests.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (1..=CALLS as u64).collect::<HashSet<_>>());

    // Reply in reverse order of arrival
    for request in requests.iter().rev() {
        server.respond(&Response::ok(request.seq, request.args.clone())).await;
    }

    for caller in callers {
        let (args, reply) = timeout(WAIT, caller).await.unwrap().unwrap();
        assert_eq!(reply.unwrap(), args);
    }
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.dropped_completions(), 0);
}

#[tokio::test]
async fn test_go_reports_issue_order() {
    let (client, mut server) = connect();
    let (done, mut rx) = done_channel(8);

    let mut issued = Vec::new();
    for _ in 0..4 {
        let handle = client
            .go(Kind::Call, "Svc", "M", 0, Some(done.clone()), Bytes::new())
            .await
            .unwrap();
        issued.push(handle.seq().unwrap());
    }
    assert_eq!(issued, vec![1, 2, 3, 4]);

    for _ in 0..4 {
        server.next_request().await;
    }
    for seq in [3, 1, 4, 2] {
        server.respond(&Response::ok(seq, Bytes::new())).await;
    }

    let mut completed = Vec::new();
    for _ in 0..4 {
        let call = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(call.error.is_none());
        completed.push(call.seq.unwrap());
    }
    assert_eq!(completed, vec![3, 1, 4, 2]);
}

#[tokio::test]
async fn test_responses_fed_one_byte_at_a_time() {
    let (client, mut server) = connect();

    let mut first = client
        .go(Kind::Call, "Svc", "Small", 0, None, Bytes::new())
        .await
        .unwrap();
    let mut second = client
        .go(Kind::Call, "Svc", "Large", 0, None, Bytes::new())
        .await
        .unwrap();
    server.next_request().await;
    server.next_request().await;

    let large = vec![0x42u8; 20_000];
    server.respond_bytewise(&Response::ok(1, &b"tiny"[..])).await;
    server.respond_bytewise(&Response::ok(2, large.clone())).await;

    let a = timeout(WAIT, first.done()).await.unwrap().unwrap();
    let b = timeout(WAIT, second.done()).await.unwrap().unwrap();
    assert_eq!(a.into_result().unwrap(), Bytes::from_static(b"tiny"));
    assert_eq!(b.into_result().unwrap(), Bytes::from(large));
}

#[tokio::test]
async fn test_close_fails_every_pending_call_once() {
    const PENDING: usize = 5;
    let (client, mut server) = connect();
    let (done, mut rx) = done_channel(PENDING);

    for _ in 0..PENDING {
        client
            .go(Kind::Call, "Slow", "Op", 0, Some(done.clone()), Bytes::new())
            .await
            .unwrap();
    }
    for _ in 0..PENDING {
        server.next_request().await;
    }
    assert_eq!(client.pending_count(), PENDING);

    client.close().await.unwrap();
    timeout(WAIT, client.wait_for_shutdown()).await.unwrap();

    for _ in 0..PENDING {
        let call = rx.try_recv().unwrap();
        assert!(matches!(call.error, Some(RpcError::Shutdown)));
        assert!(call.reply.is_none());
    }
    assert!(rx.try_recv().is_err(), "no call may complete twice");
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.dropped_completions(), 0);

    // Late reply for an already-failed call is ignored
    let late = server.frame(&Response::ok(1, Bytes::new()));
    let _ = server.stream.write_all(&late).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_peer_disconnect_is_unexpected_eof() {
    let (client, mut server) = connect();

    let mut handle = client
        .go(Kind::Call, "Room", "Join", 1, None, Bytes::new())
        .await
        .unwrap();
    server.next_request().await;
    drop(server);

    let call = timeout(WAIT, handle.done()).await.unwrap().unwrap();
    assert!(matches!(call.error, Some(RpcError::UnexpectedEof)));

    timeout(WAIT, client.wait_for_shutdown()).await.unwrap();
    assert!(client.is_shutdown());

    let result = client.call(Kind::Call, "Room", "Join", 1, Bytes::new()).await;
    assert!(matches!(result, Err(RpcError::Shutdown)));
}

#[tokio::test]
async fn test_unknown_sequence_is_dropped() {
    let (client, mut server) = connect();

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Svc", "M", 0, Bytes::new()).await })
    };
    let request = server.next_request().await;

    server.respond(&Response::ok(999, &b"stray"[..])).await;
    server.respond(&Response::error(12345, "stale")).await;
    server.respond(&Response::ok(request.seq, &b"mine"[..])).await;

    let reply = timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Bytes::from_static(b"mine"));
    assert!(!client.is_shutdown());
}

#[tokio::test]
async fn test_push_frames_bypass_pending_table() {
    let (client, mut server) = connect();

    let mut handle = client
        .go(Kind::Call, "Svc", "M", 0, None, Bytes::new())
        .await
        .unwrap();
    let request = server.next_request().await;

    // Same seq as the pending call, but push kinds must never match it
    let mut push = Response::push(&b"tick"[..]);
    push.seq = request.seq;
    server.respond(&push).await;

    let relayed = Response {
        seq: request.seq,
        kind: Kind::HandlerResponse,
        error: String::new(),
        data: Bytes::from_static(b"relayed"),
    };
    server.respond(&relayed).await;

    let first = timeout(WAIT, client.recv_push()).await.unwrap().unwrap();
    assert_eq!(first.kind, Kind::Push);
    assert_eq!(first.data, Bytes::from_static(b"tick"));

    let second = timeout(WAIT, client.recv_push()).await.unwrap().unwrap();
    assert_eq!(second.kind, Kind::HandlerResponse);

    assert_eq!(client.pending_count(), 1);

    server.respond(&Response::ok(request.seq, &b"reply"[..])).await;
    let call = timeout(WAIT, handle.done()).await.unwrap().unwrap();
    assert_eq!(call.into_result().unwrap(), Bytes::from_static(b"reply"));
}

#[tokio::test]
async fn test_push_channel_closes_after_shutdown() {
    let (client, mut server) = connect();

    server.respond(&Response::push(&b"last words"[..])).await;
    drop(server);

    timeout(WAIT, client.wait_for_shutdown()).await.unwrap();

    let push = client.recv_push().await.unwrap();
    assert_eq!(push.data, Bytes::from_static(b"last words"));
    assert!(client.recv_push().await.is_none());
}

#[tokio::test]
async fn test_full_push_channel_drops() {
    let (client_end, server_end) = duplex(64 * 1024);
    let client = Client::builder().push_capacity(1).build(client_end);
    let mut server = FakeServer::new(server_end);

    for i in 0..3u8 {
        server.respond(&Response::push(vec![i])).await;
    }

    // Replies are processed in order, so this call resolving means all
    // pushes ahead of it have been routed.
    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Sync", "Point", 0, Bytes::new()).await })
    };
    let request = server.next_request().await;
    server.respond(&Response::ok(request.seq, Bytes::new())).await;
    timeout(WAIT, caller).await.unwrap().unwrap().unwrap();

    assert_eq!(client.dropped_pushes(), 2);
    assert_eq!(client.try_recv_push().unwrap().data, Bytes::from(vec![0u8]));
    assert!(client.try_recv_push().is_none());
}

#[tokio::test]
async fn test_remote_error_reaches_only_its_call() {
    let (client, mut server) = connect();
    let (done, mut rx) = done_channel(2);

    client
        .go(Kind::Call, "Room", "Join", 1, Some(done.clone()), Bytes::new())
        .await
        .unwrap();
    client
        .go(Kind::Call, "Room", "Info", 1, Some(done), Bytes::new())
        .await
        .unwrap();
    server.next_request().await;
    server.next_request().await;

    server.respond(&Response::error(1, "room is full")).await;
    server.respond(&Response::ok(2, &b"info"[..])).await;

    let failed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(failed.service_method, "Room.Join");
    match failed.error {
        Some(RpcError::Remote(ref message)) => assert_eq!(message, "room is full"),
        ref other => panic!("expected remote error, got {:?}", other),
    }
    assert!(failed.reply.is_none());

    let ok = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(ok.into_result().unwrap(), Bytes::from_static(b"info"));
    assert!(!client.is_shutdown());
}

#[tokio::test]
async fn test_full_done_channel_drops_and_counts() {
    let (client, mut server) = connect();
    let (done, mut rx) = done_channel(1);

    for _ in 0..2 {
        client
            .go(Kind::Call, "Svc", "M", 0, Some(done.clone()), Bytes::new())
            .await
            .unwrap();
    }
    server.next_request().await;
    server.next_request().await;
    server.respond(&Response::ok(1, &b"one"[..])).await;
    server.respond(&Response::ok(2, &b"two"[..])).await;

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Sync", "Point", 0, Bytes::new()).await })
    };
    let request = server.next_request().await;
    server.respond(&Response::ok(request.seq, Bytes::new())).await;
    timeout(WAIT, caller).await.unwrap().unwrap().unwrap();

    assert_eq!(client.dropped_completions(), 1);
    let delivered = rx.try_recv().unwrap();
    assert_eq!(delivered.seq, Some(1));
    assert!(rx.try_recv().is_err());
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_unbuffered_done_channel_is_a_local_error() {
    let (client, _server) = connect();
    let (done, _rx) = done_channel(0);

    let result = client
        .go(Kind::Call, "Room", "Join", 1, Some(done), Bytes::new())
        .await;
    assert!(matches!(result, Err(RpcError::UnbufferedDone)));

    // The client keeps working
    assert!(!client.is_shutdown());
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_shutdown_hook_runs_once_after_sweep() {
    let (client, mut server) = connect();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handle = client
        .go(Kind::Call, "Svc", "M", 0, None, Bytes::new())
        .await
        .unwrap();
    server.next_request().await;

    let counter = runs.clone();
    let probe = client.clone();
    client.on_shutdown(move || {
        // Pending calls were already swept when the hook runs
        assert_eq!(probe.pending_count(), 0);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.close().await.unwrap();
    timeout(WAIT, client.wait_for_shutdown()).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let call = handle.done().await.unwrap();
    assert!(matches!(call.error, Some(RpcError::Shutdown)));
}

#[tokio::test]
async fn test_oversized_frame_terminates_connection() {
    let (client_end, server_end) = duplex(64 * 1024);
    let client = Client::builder().max_frame_size(256).build(client_end);
    let mut server = FakeServer::new(server_end);

    let mut handle = client
        .go(Kind::Call, "Svc", "M", 0, None, Bytes::new())
        .await
        .unwrap();
    server.next_request().await;

    let mut prefix = Vec::new();
    encode_varint(1000, &mut prefix);
    server.stream.write_all(&prefix).await.unwrap();

    let call = timeout(WAIT, handle.done()).await.unwrap().unwrap();
    assert!(matches!(
        call.error,
        Some(RpcError::FrameTooLarge { size: 1000, max: 256 })
    ));
    timeout(WAIT, client.wait_for_shutdown()).await.unwrap();
}

#[tokio::test]
async fn test_request_too_long_fails_only_that_call() {
    let (client_end, server_end) = duplex(64 * 1024);
    let client = Client::builder().max_frame_size(128).build(client_end);
    let mut server = FakeServer::new(server_end);

    let result = client
        .call(Kind::Call, "Svc", "Big", 0, vec![0u8; 512])
        .await;
    assert!(matches!(result, Err(RpcError::RequestTooLong { max: 128, .. })));
    assert_eq!(client.pending_count(), 0);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Svc", "Small", 0, Bytes::new()).await })
    };
    let request = server.next_request().await;
    // The failed call consumed a sequence number but never hit the wire
    assert_eq!(request.seq, 2);
    server.respond(&Response::ok(request.seq, Bytes::new())).await;
    timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_undecodable_frame_is_skipped() {
    let (client, mut server) = connect();

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Svc", "M", 0, Bytes::new()).await })
    };
    let request = server.next_request().await;

    server.stream.write_all(&build_frame(b"\xc1\xc1\xc1")).await.unwrap();
    server.respond(&Response::ok(request.seq, &b"fine"[..])).await;

    let reply = timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Bytes::from_static(b"fine"));
}

#[tokio::test]
async fn test_json_payload_format() {
    let (client_end, server_end) = duplex(64 * 1024);
    let client = Client::builder()
        .payload_format(PayloadFormat::Json)
        .build(client_end);
    let mut server = FakeServer::with_format(server_end, PayloadFormat::Json);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Chat", "Send", 3, &b"hi"[..]).await })
    };
    let request = server.next_request().await;
    assert_eq!(request.service_method, "Chat.Send");
    assert!(std::str::from_utf8(&server.raw[1..]).unwrap().contains("\"ServiceMethod\""));

    server.respond(&Response::ok(request.seq, &b"sent"[..])).await;
    let reply = timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Bytes::from_static(b"sent"));
}

#[tokio::test]
async fn test_notify_is_fire_and_forget() {
    let (client, mut server) = connect();

    client.notify("Chat", "Typing", 9, &b"..."[..]).await.unwrap();
    let request = server.next_request().await;

    assert_eq!(request.kind, Kind::Push);
    assert_eq!(request.seq, 1);
    assert_eq!(request.sid, 9);
    assert_eq!(client.pending_count(), 0);
}

/// Stream whose reads never complete and whose writes always fail.
struct BrokenWriter;

impl AsyncRead for BrokenWriter {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "peer went away",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_write_failure_fails_only_that_call() {
    let client = Client::new(BrokenWriter);

    let result = client.call(Kind::Call, "Room", "Join", 1, Bytes::new()).await;
    match result {
        Err(RpcError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe),
        other => panic!("expected I/O error, got {:?}", other),
    }

    assert_eq!(client.pending_count(), 0);
    assert!(!client.is_shutdown());
}

#[tokio::test]
async fn test_close_aborts_stalled_write() {
    // Peer never reads, so a large request fills the pipe and blocks
    let (client_end, _server_end) = duplex(64);
    let client = Client::new(client_end);

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    client.on_shutdown(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Blob", "Put", 0, vec![0u8; 4096]).await })
    };

    timeout(WAIT, async {
        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    timeout(WAIT, client.close())
        .await
        .expect("close blocked behind a stalled write")
        .unwrap();
    timeout(WAIT, client.wait_for_shutdown()).await.unwrap();

    let result = timeout(WAIT, caller).await.unwrap().unwrap();
    assert!(matches!(result, Err(RpcError::Shutdown)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_json_reply_with_base64_data() {
    let (client_end, server_end) = duplex(64 * 1024);
    let client = Client::builder()
        .payload_format(PayloadFormat::Json)
        .build(client_end);
    let mut server = FakeServer::with_format(server_end, PayloadFormat::Json);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Kind::Call, "Chat", "Send", 3, &b"hi"[..]).await })
    };
    let request = server.next_request().await;
    assert!(std::str::from_utf8(&server.raw[1..]).unwrap().contains(r#""Args":"aGk=""#));

    let reply = format!(
        r#"{{"Seq":{},"Kind":2,"Error":"","Data":"aGk="}}"#,
        request.seq
    );
    server.stream.write_all(&build_frame(reply.as_bytes())).await.unwrap();

    let data = timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
    assert_eq!(data, Bytes::from_static(b"hi"));
}
