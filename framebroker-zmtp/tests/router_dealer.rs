use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWriteExt};
use compio::net::TcpStream;
use framebroker_core::options::TransportOptions;
use framebroker_zmtp::codec::{encode_frame, FLAG_COMMAND};
use framebroker_zmtp::command::build_ready;
use framebroker_zmtp::greeting::build_greeting;
use framebroker_zmtp::{perform_handshake, DealerSocket, RouterEvent, RouterSocket, SocketType};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

fn run<F: Future<Output = ()>>(fut: F) {
    compio::runtime::Runtime::new().unwrap().block_on(async {
        compio::time::timeout(Duration::from_secs(10), fut)
            .await
            .expect("test timed out");
    });
}

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn msg(parts: &[&'static [u8]]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from_static(p)).collect()
}

/// Read until the server closes the connection; a reset counts as closed.
async fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut all = Vec::new();
    loop {
        let BufResult(res, chunk) = stream.read(Vec::with_capacity(1024)).await;
        match res {
            Ok(0) => return all,
            Ok(_) => all.extend_from_slice(&chunk),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return all,
            Err(e) => panic!("read failed: {e}"),
        }
    }
}

#[test]
fn explicit_identity_routes_reply() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut dealer = DealerSocket::connect_with_identity(router.local_addr(), b"CLIENT_A")
            .await
            .unwrap();

        dealer.send(msg(&[b"", b"Hello"])).await.unwrap();
        let received = router.recv().await.unwrap().unwrap();
        assert_eq!(received, msg(&[b"CLIENT_A", b"", b"Hello"]));

        router.send(msg(&[b"CLIENT_A", b"", b"World"])).await.unwrap();
        let reply = dealer.recv().await.unwrap().unwrap();
        assert_eq!(reply, msg(&[b"", b"World"]));
    });
}

#[test]
fn generated_identities_are_distinct_and_routable() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut a = DealerSocket::connect(router.local_addr()).await.unwrap();
        let mut b = DealerSocket::connect(router.local_addr()).await.unwrap();

        a.send(msg(&[b"", b"from-a"])).await.unwrap();
        b.send(msg(&[b"", b"from-b"])).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let m = router.recv().await.unwrap().unwrap();
            assert_eq!(m[0].len(), 5);
            assert_eq!(m[0][0], 0);
            ids.push(m[0].clone());
            // Echo the body back so each client can check it got its own.
            router.send(vec![m[0].clone(), Bytes::new(), m[2].clone()]).await.unwrap();
        }
        assert_ne!(ids[0], ids[1]);

        assert_eq!(a.recv().await.unwrap().unwrap()[1], Bytes::from("from-a"));
        assert_eq!(b.recv().await.unwrap().unwrap()[1], Bytes::from("from-b"));
    });
}

#[test]
fn long_frames_cross_the_wire() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut dealer = DealerSocket::connect(router.local_addr()).await.unwrap();

        let payload = Bytes::from(vec![0x5Au8; 300 * 1024]);
        dealer
            .send(vec![Bytes::new(), Bytes::from("320"), Bytes::from("320"), payload.clone()])
            .await
            .unwrap();

        let received = router.recv().await.unwrap().unwrap();
        assert_eq!(received.len(), 5);
        assert_eq!(received[4], payload);
    });
}

#[test]
fn unknown_identity_is_dropped_and_router_keeps_serving() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut dealer = DealerSocket::connect_with_identity(router.local_addr(), b"known")
            .await
            .unwrap();

        dealer.send(msg(&[b"", b"ping"])).await.unwrap();
        let m = router.recv().await.unwrap().unwrap();

        router.send(msg(&[b"ghost", b"", b"lost"])).await.unwrap();
        router.send(vec![m[0].clone(), Bytes::new(), Bytes::from("pong")]).await.unwrap();

        assert_eq!(dealer.recv().await.unwrap().unwrap(), msg(&[b"", b"pong"]));
    });
}

#[test]
fn duplicate_identity_is_refused() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut first = DealerSocket::connect_with_identity(router.local_addr(), b"dup")
            .await
            .unwrap();
        first.send(msg(&[b"", b"1"])).await.unwrap();
        router.recv().await.unwrap().unwrap();

        let mut second = DealerSocket::connect_with_identity(router.local_addr(), b"dup")
            .await
            .unwrap();
        let refused = second.recv().await;
        assert!(!matches!(refused, Ok(Some(_))), "duplicate got a message");

        // Whatever the refused client writes never reaches the socket, and
        // its close is not reported against the owner's identity.
        let _ = second.send(msg(&[b"", b"intruder"])).await;
        drop(second);
        let leaked = compio::time::timeout(Duration::from_millis(300), router.recv_event()).await;
        assert!(leaked.is_err(), "refused connection produced {leaked:?}");

        router.send(msg(&[b"dup", b"", b"still yours"])).await.unwrap();
        assert_eq!(
            first.recv().await.unwrap().unwrap(),
            msg(&[b"", b"still yours"])
        );
        first.send(msg(&[b"", b"2"])).await.unwrap();
        assert_eq!(router.recv().await.unwrap().unwrap(), msg(&[b"dup", b"", b"2"]));
    });
}

#[test]
fn closed_connection_is_reported_after_its_messages() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut dealer = DealerSocket::connect_with_identity(router.local_addr(), b"leaving")
            .await
            .unwrap();
        dealer.send(msg(&[b"", b"bye"])).await.unwrap();
        drop(dealer);

        assert_eq!(
            router.recv_event().await.unwrap(),
            Some(RouterEvent::Message(msg(&[b"leaving", b"", b"bye"])))
        );
        assert_eq!(
            router.recv_event().await.unwrap(),
            Some(RouterEvent::Disconnected(Bytes::from_static(b"leaving")))
        );
    });
}

#[test]
fn reserved_flag_bits_drop_the_connection() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut raw = TcpStream::connect(router.local_addr()).await.unwrap();
        perform_handshake(&mut raw, SocketType::Dealer, None).await.unwrap();

        let BufResult(res, _) = raw.write_all(vec![0x80u8, 0x00]).await;
        res.unwrap();
        assert!(read_to_close(&mut raw).await.is_empty());
    });
}

#[test]
fn incompatible_socket_type_is_rejected() {
    run(async {
        let router = RouterSocket::bind(any_port()).await.unwrap();
        let mut raw = TcpStream::connect(router.local_addr()).await.unwrap();

        let mut hello = build_greeting().to_vec();
        encode_frame(FLAG_COMMAND, &build_ready(SocketType::Pub, None), &mut hello);
        let BufResult(res, _) = raw.write_all(hello).await;
        res.unwrap();

        // Greeting + READY from the router, then close.
        let received = read_to_close(&mut raw).await;
        assert!(received.len() > 64);
        assert_eq!(received[0], 0xFF);
    });
}

#[test]
fn silent_client_hits_handshake_timeout() {
    run(async {
        let options = TransportOptions::default().with_handshake_timeout(Duration::from_millis(200));
        let router = RouterSocket::bind_with_options(any_port(), options).await.unwrap();
        let mut raw = TcpStream::connect(router.local_addr()).await.unwrap();

        let received = read_to_close(&mut raw).await;
        assert_eq!(received.len(), 64);
    });
}

#[test]
fn oversized_message_is_reported_and_connection_survives() {
    run(async {
        let options = TransportOptions::default().with_max_message_bytes(1024);
        let router = RouterSocket::bind_with_options(any_port(), options).await.unwrap();
        let mut dealer = DealerSocket::connect_with_identity(router.local_addr(), b"big")
            .await
            .unwrap();

        dealer
            .send(vec![Bytes::new(), Bytes::from(vec![0u8; 4096])])
            .await
            .unwrap();
        assert_eq!(
            router.recv_event().await.unwrap(),
            Some(RouterEvent::Oversized {
                identity: Bytes::from_static(b"big"),
                size: 4096,
            })
        );

        dealer.send(msg(&[b"", b"small"])).await.unwrap();
        assert_eq!(router.recv().await.unwrap().unwrap(), msg(&[b"big", b"", b"small"]));
        router.send(msg(&[b"big", b"", b"ok"])).await.unwrap();
        assert_eq!(dealer.recv().await.unwrap().unwrap(), msg(&[b"", b"ok"]));
    });
}

#[test]
fn too_many_frames_drops_the_connection() {
    run(async {
        let options = TransportOptions::default().with_max_message_frames(4);
        let router = RouterSocket::bind_with_options(any_port(), options).await.unwrap();
        let mut dealer = DealerSocket::connect(router.local_addr()).await.unwrap();

        dealer.send(msg(&[b"", b"1", b"2", b"3", b"4"])).await.unwrap();
        assert!(!matches!(dealer.recv().await, Ok(Some(_))));
        assert!(matches!(
            router.recv_event().await.unwrap(),
            Some(RouterEvent::Disconnected(_))
        ));
    });
}
