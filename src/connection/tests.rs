use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use crate::frame;
use crate::message::{Message, MessageKind};
use crate::object_path::ObjectPath;
use crate::proto::Flags;
use crate::sasl::{Mechanism, StaticIdentity};
use crate::value::Value;

use super::config::Connector;
use super::transport::Transport;
use super::{ConnectionBuilder, ConnectionEvent, ConnectionState};

const TEST_PATH: &ObjectPath = ObjectPath::new_const(b"/org/example/Test");

/// A connector handing the client an in-memory pipe and the test the other
/// end, once per (re)connection attempt.
fn test_connector() -> (Connector, mpsc::UnboundedReceiver<DuplexStream>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let connector: Connector = Arc::new(move || {
        let tx = tx.clone();

        Box::pin(async move {
            let (client, server) = tokio::io::duplex(1 << 16);
            let _ = tx.send(server);
            Ok(Transport::Mem(client))
        })
    });

    (connector, rx)
}

fn builder(connector: Connector) -> ConnectionBuilder {
    ConnectionBuilder::new()
        .connector(connector)
        .auth_mechanisms(&[Mechanism::External])
        .identity_resolver(Arc::new(StaticIdentity("1000".into())))
        .auto_reconnect(false)
        .health_check_enabled(false)
        .reconnect_jitter_factor(0.0)
}

/// A scripted bus peer driving the server side of the wire protocol.
struct TestServer {
    stream: DuplexStream,
    buf: Vec<u8>,
    serial: u32,
}

impl TestServer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            serial: 9000,
        }
    }

    async fn read_line(&mut self) -> String {
        loop {
            if let Some(n) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=n).collect();
                line.truncate(n.saturating_sub(1));

                if line.first() == Some(&0) {
                    line.remove(0);
                }

                return String::from_utf8(line).unwrap();
            }

            let mut scratch = [0u8; 512];
            let n = self.stream.read(&mut scratch).await.unwrap();
            assert!(n > 0, "client hung up mid-handshake");
            self.buf.extend_from_slice(&scratch[..n]);
        }
    }

    async fn handshake(&mut self) {
        let auth = self.read_line().await;
        assert_eq!(auth, "AUTH EXTERNAL 31303030");

        self.stream
            .write_all(b"OK 0123456789abcdef0123456789abcdef\r\n")
            .await
            .unwrap();

        let begin = self.read_line().await;
        assert_eq!(begin, "BEGIN");
    }

    async fn read_frame(&mut self) -> Message {
        loop {
            if let Some((message, consumed)) = frame::decode_frame(&self.buf).unwrap() {
                self.buf.drain(..consumed);
                return message;
            }

            let mut scratch = [0u8; 4096];
            let n = self.stream.read(&mut scratch).await.unwrap();
            assert!(n > 0, "client hung up mid-frame");
            self.buf.extend_from_slice(&scratch[..n]);
        }
    }

    async fn send(&mut self, message: &Message) {
        self.serial += 1;
        let serial = NonZeroU32::new(self.serial).unwrap();

        let mut out = Vec::new();
        frame::encode_message(message, serial, &mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    /// Answer the mandatory `Hello`, returning the call for inspection.
    async fn serve_hello(&mut self, name: &str) -> Message {
        let hello = self.read_frame().await;

        let MessageKind::MethodCall { member, .. } = hello.kind() else {
            panic!("expected Hello call, got {:?}", hello.kind());
        };
        assert_eq!(member, "Hello");
        assert_eq!(hello.destination(), Some("org.freedesktop.DBus"));

        let reply = hello
            .method_return()
            .unwrap()
            .with_sender("org.freedesktop.DBus")
            .with_body(vec![Value::from(name)])
            .unwrap();

        self.send(&reply).await;
        hello
    }
}

#[tokio::test]
async fn connect_authenticates_and_acquires_name() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;

        let hello = server.serve_hello(":1.7").await;
        // The very first outbound message uses serial 1.
        assert_eq!(hello.serial(), NonZeroU32::new(1));
        server
    });

    let connection = builder(connector).connect().await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.unique_name().as_deref(), Some(":1.7"));
    assert_eq!(
        connection.server_guid().as_deref(),
        Some("0123456789abcdef0123456789abcdef")
    );

    let _server = server.await.unwrap();
}

#[tokio::test]
async fn out_of_order_replies_resolve_their_own_futures() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        let first = server.read_frame().await;
        let second = server.read_frame().await;

        let first_serial = first.serial().unwrap().get();
        let second_serial = second.serial().unwrap().get();
        assert_eq!(second_serial, first_serial + 1);

        // Answer in reverse arrival order.
        let reply = second
            .method_return()
            .unwrap()
            .with_body(vec![Value::from("second")])
            .unwrap();
        server.send(&reply).await;

        let reply = first
            .method_return()
            .unwrap()
            .with_body(vec![Value::from("first")])
            .unwrap();
        server.send(&reply).await;

        server
    });

    let connection = builder(connector).connect().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let call = |marker: &'static str| {
        let connection = connection.clone();
        let order = Arc::clone(&order);

        async move {
            let message = Message::method_call(TEST_PATH, "Frob")
                .with_interface("org.example.Iface")
                .with_destination("org.example.Service");

            let reply = connection.call(message).await.unwrap();
            order.lock().unwrap().push(marker);
            reply
        }
    };

    let (first_reply, second_reply) = tokio::join!(call("first"), call("second"));

    // Matching is by serial, not arrival order: each future got its own
    // reply, and the later call resolved first.
    assert_eq!(first_reply.body(), [Value::from("first")]);
    assert_eq!(second_reply.body(), [Value::from("second")]);
    assert_eq!(*order.lock().unwrap(), ["second", "first"]);

    let _server = server.await.unwrap();
}

#[tokio::test]
async fn duplicate_reply_is_dropped_silently() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        let call = server.read_frame().await;
        let reply = call
            .method_return()
            .unwrap()
            .with_body(vec![Value::from("pong")])
            .unwrap();

        server.send(&reply).await;
        server.send(&reply).await;

        let signal = Message::signal(TEST_PATH, "Done").with_interface("org.example.Iface");
        server.send(&signal).await;

        server
    });

    let connection = builder(connector).connect().await.unwrap();
    let mut inbound = connection.subscribe_inbound();

    let message = Message::method_call(TEST_PATH, "Ping")
        .with_interface("org.example.Iface")
        .with_destination("org.example.Service");

    let reply = connection.call(message).await.unwrap();
    assert_eq!(reply.body(), [Value::from("pong")]);

    // The duplicate must not surface as inbound traffic; the next inbound
    // message is the signal sent after it.
    let message = inbound.recv().await.unwrap();
    assert!(matches!(message.kind(), MessageKind::Signal { member, .. } if member == "Done"));

    let _server = server.await.unwrap();
}

#[tokio::test]
async fn unmatched_reply_flows_to_inbound_path() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        let stray = Message {
            kind: MessageKind::MethodReturn {
                reply_serial: NonZeroU32::new(77).unwrap(),
            },
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            endianness: crate::proto::Endianness::NATIVE,
            signature: crate::signature::SignatureBuf::empty(),
            body: Vec::new(),
        };

        server.send(&stray).await;
        server
    });

    let connection = builder(connector).connect().await.unwrap();
    let mut inbound = connection.subscribe_inbound();

    let message = inbound.recv().await.unwrap();
    assert_eq!(
        message.kind().reply_serial(),
        NonZeroU32::new(77),
        "a reply nobody asked for is inbound traffic"
    );

    let _server = server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn call_deadline_fires_without_reply() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        // Swallow the call and never answer.
        let _call = server.read_frame().await;
        server.read_frame().await
    });

    let connection = builder(connector).connect().await.unwrap();

    let message = Message::method_call(TEST_PATH, "Stall")
        .with_interface("org.example.Iface")
        .with_destination("org.example.Service");

    let started = tokio::time::Instant::now();
    let err = connection
        .call_with_timeout(message, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(started.elapsed(), Duration::from_secs(1));

    server.abort();
}

#[tokio::test(start_paused = true)]
async fn reconnect_resets_serials_and_relearns_name() {
    let (connector, mut servers) = test_connector();

    let first_session = tokio::spawn(async move {
        let stream = servers.recv().await.unwrap();
        let mut server = TestServer::new(stream);
        server.handshake().await;
        server.serve_hello(":1.7").await;

        let call = server.read_frame().await;
        assert_eq!(call.serial(), NonZeroU32::new(2));

        let reply = call.method_return().unwrap();
        server.send(&reply).await;

        // Dropping the server stream kills the session; the receiver goes
        // back to the test for the next connection attempt.
        servers
    });

    let connection = builder(connector)
        .auto_reconnect(true)
        .reconnect_initial_delay(Duration::from_millis(10))
        .reconnect_max_attempts(3)
        .connect()
        .await
        .unwrap();

    let mut events = connection.subscribe_events();
    assert_eq!(connection.unique_name().as_deref(), Some(":1.7"));

    let message = Message::method_call(TEST_PATH, "Frob")
        .with_interface("org.example.Iface")
        .with_destination("org.example.Service");

    connection.call(message.clone()).await.unwrap();

    let mut servers = first_session.await.unwrap();

    // The session is gone; the client must announce the retry.
    loop {
        if let ConnectionEvent::ReconnectionStarting { attempt: 1 } = events.recv().await.unwrap()
        {
            break;
        }
    }

    let mut server = TestServer::new(servers.recv().await.unwrap());
    server.handshake().await;

    // After a reconnect the serial counter starts over: the new session's
    // Hello is serial 1 again, and the name is re-learned from its reply.
    let hello = server.serve_hello(":1.8").await;
    assert_eq!(hello.serial(), NonZeroU32::new(1));

    let reply_task = tokio::spawn(async move {
        let call = server.read_frame().await;
        assert_eq!(call.serial(), NonZeroU32::new(2));
        let reply = call.method_return().unwrap();
        server.send(&reply).await;
        server
    });

    connection.call(message).await.unwrap();
    assert_eq!(connection.unique_name().as_deref(), Some(":1.8"));

    let _server = reply_task.await.unwrap();
}

#[tokio::test]
async fn lost_transport_fails_outstanding_requests() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        // Take the call, then hang up with it outstanding.
        let _call = server.read_frame().await;
    });

    let connection = builder(connector).connect().await.unwrap();

    let message = Message::method_call(TEST_PATH, "Frob")
        .with_interface("org.example.Iface")
        .with_destination("org.example.Service");

    let err = connection.call(message).await.unwrap_err();
    assert!(err.is_closed());

    server.await.unwrap();
}

#[tokio::test]
async fn send_writes_signals_without_registering() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        let signal = server.read_frame().await;
        assert!(matches!(
            signal.kind(),
            MessageKind::Signal { member, .. } if member == "Announce"
        ));

        server
    });

    let connection = builder(connector).connect().await.unwrap();

    let signal = Message::signal(TEST_PATH, "Announce")
        .with_interface("org.example.Iface")
        .with_body(vec![Value::UInt32(5)])
        .unwrap();

    connection.send(signal).await.unwrap();

    // A message that cannot be answered is refused by call().
    let signal = Message::signal(TEST_PATH, "Announce").with_interface("org.example.Iface");
    assert!(connection.call(signal).await.is_err());

    let _server = server.await.unwrap();
}

#[tokio::test]
async fn close_is_terminal() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;
        server
    });

    let connection = builder(connector).connect().await.unwrap();
    let _server = server.await.unwrap();

    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Closed);

    let message = Message::method_call(TEST_PATH, "Frob")
        .with_interface("org.example.Iface")
        .with_destination("org.example.Service");

    let err = connection.call(message).await.unwrap_err();
    assert!(err.is_closed());
}

#[tokio::test(start_paused = true)]
async fn failed_health_probes_recycle_the_session() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        // Absorb pings without ever answering.
        loop {
            let ping = server.read_frame().await;
            assert!(matches!(
                ping.kind(),
                MessageKind::MethodCall { member, .. } if member == "Ping"
            ));
        }
    });

    let connection = builder(connector)
        .health_check_enabled(true)
        .health_check_interval(Duration::from_secs(1))
        .health_check_timeout(Duration::from_secs(1))
        .connect()
        .await
        .unwrap();

    let mut events = connection.subscribe_events();

    loop {
        if events.recv().await.unwrap() == ConnectionEvent::HealthDegraded {
            break;
        }
    }

    let mut state_rx = connection.state_watch();
    state_rx
        .wait_for(|state| *state == ConnectionState::Closed)
        .await
        .unwrap();

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_handlers_observe_signals() {
    let (connector, mut servers) = test_connector();

    let server = tokio::spawn(async move {
        let mut server = TestServer::new(servers.recv().await.unwrap());
        server.handshake().await;
        server.serve_hello(":1.7").await;

        let signal = Message::signal(TEST_PATH, "Tick").with_interface("org.example.Iface");
        server.send(&signal).await;
        server
    });

    let connection = builder(connector).connect().await.unwrap();

    let (seen_tx, seen_rx) = std::sync::mpsc::channel();
    connection.add_inbound_handler(move |message| {
        if let MessageKind::Signal { member, .. } = message.kind() {
            let _ = seen_tx.send(member.clone());
        }
    });

    let member = seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(member, "Tick");

    let _server = server.await.unwrap();
}
