use async_trait::async_trait;
use bytes::Bytes;
use flume::{Receiver, Sender};
use framebroker::protocol::{encode_reply, ACK_OK};
use framebroker::{
    AcceptFrames, DispatchStats, Dispatcher, DispatcherFault, Frontend, FrameHandler, PoolConfig,
    Request, WorkerFault, WorkerId, WorkerPool,
};
use framebroker_core::inproc::bind_inproc;
use framebroker_zmtp::RouterEvent;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Frontend backed by channels, standing in for the ROUTER socket.
struct ChannelFrontend {
    inbound: Receiver<RouterEvent>,
    outbound: Sender<Vec<Bytes>>,
}

#[async_trait(?Send)]
impl Frontend for ChannelFrontend {
    async fn recv_event(&mut self) -> io::Result<Option<RouterEvent>> {
        Ok(self.inbound.recv_async().await.ok())
    }

    async fn send_multipart(&mut self, msg: Vec<Bytes>) -> io::Result<()> {
        self.outbound
            .send(msg)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test receiver gone"))
    }

    fn describe(&self) -> String {
        "channels".to_string()
    }
}

struct Rig {
    clients: Sender<RouterEvent>,
    replies: Receiver<Vec<Bytes>>,
    stop: Sender<()>,
    dispatcher: JoinHandle<Result<DispatchStats, DispatcherFault>>,
    pool: WorkerPool,
}

impl Rig {
    fn start(endpoint: &str, workers: usize, handler: Arc<dyn FrameHandler>) -> Self {
        let (clients, inbound) = flume::unbounded();
        let (outbound, replies) = flume::unbounded();
        let (stop, shutdown) = flume::unbounded();

        let backend = bind_inproc(endpoint).unwrap();
        let pool = WorkerPool::start(
            PoolConfig {
                workers,
                endpoint: endpoint.to_string(),
                respawn: true,
                max_frame_bytes: 1024,
            },
            handler,
        )
        .unwrap();

        let frontend = ChannelFrontend { inbound, outbound };
        let dispatcher = thread::spawn(move || {
            compio::runtime::Runtime::new()
                .unwrap()
                .block_on(Dispatcher::new(frontend, backend, shutdown).run())
        });

        Self {
            clients,
            replies,
            stop,
            dispatcher,
            pool,
        }
    }

    fn send(&self, client: &'static [u8], width: &'static [u8], payload_len: usize) {
        self.event(RouterEvent::Message(vec![
            Bytes::from_static(client),
            Bytes::new(),
            Bytes::from_static(width),
            Bytes::from_static(b"1"),
            Bytes::from(vec![0u8; payload_len]),
        ]));
    }

    fn event(&self, event: RouterEvent) {
        self.clients.send(event).unwrap();
    }

    fn reply(&self) -> Vec<Bytes> {
        self.replies
            .recv_timeout(Duration::from_secs(5))
            .expect("no reply from dispatcher")
    }
}

fn slow_handler() -> Arc<dyn FrameHandler> {
    Arc::new(|_: WorkerId, _: &Request| -> Result<(), WorkerFault> {
        thread::sleep(Duration::from_millis(20));
        Ok(())
    })
}

#[test]
fn flooding_client_cannot_starve_a_quiet_one() {
    let rig = Rig::start("inproc://dispatch-it-fair", 1, slow_handler());
    for _ in 0..12 {
        rig.send(b"flood", b"1", 3);
    }
    rig.send(b"quiet", b"1", 3);

    let order: Vec<Bytes> = (0..13).map(|_| rig.reply()[0].clone()).collect();
    let quiet_at = order
        .iter()
        .position(|id| &id[..] == b"quiet")
        .expect("quiet client never answered");
    assert!(quiet_at <= 2, "quiet client served at position {quiet_at}");

    rig.stop.send(()).unwrap();
    let stats = rig.dispatcher.join().unwrap().unwrap();
    assert_eq!(stats.received, 13);
    assert_eq!(stats.replied, 13);
    rig.pool.join().unwrap();
}

#[test]
fn replies_reach_the_frontend_unchanged() {
    let rig = Rig::start("inproc://dispatch-it-replies", 2, Arc::new(AcceptFrames));
    rig.send(b"A", b"2", 6);
    rig.send(b"B", b"1", 3);

    let mut replies = vec![rig.reply(), rig.reply()];
    replies.sort();
    assert_eq!(
        replies,
        vec![
            encode_reply(Bytes::from_static(b"A"), ACK_OK),
            encode_reply(Bytes::from_static(b"B"), ACK_OK),
        ]
    );

    drop(rig.stop);
    assert!(rig.dispatcher.join().unwrap().is_ok());
    rig.pool.join().unwrap();
}

#[test]
fn departed_client_requests_are_never_handled() {
    let (gate, wait) = flume::bounded::<()>(1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let handler = move |_: WorkerId, req: &Request| -> Result<(), WorkerFault> {
        if &req.identity[..] == b"blocker" {
            wait.recv_timeout(Duration::from_secs(5))
                .map_err(|e| WorkerFault::Handler(e.to_string()))?;
        }
        record.lock().unwrap().push(req.identity.clone());
        Ok(())
    };
    let rig = Rig::start("inproc://dispatch-it-departed", 1, Arc::new(handler));

    rig.send(b"blocker", b"1", 3);
    for _ in 0..3 {
        rig.send(b"gone", b"1", 3);
    }
    rig.event(RouterEvent::Disconnected(Bytes::from_static(b"gone")));
    rig.send(b"after", b"1", 3);
    // Answered on arrival, so its reply proves the events before it were applied.
    rig.event(RouterEvent::Oversized {
        identity: Bytes::from_static(b"marker"),
        size: 1 << 20,
    });
    assert_eq!(&rig.reply()[0][..], b"marker");

    gate.send(()).unwrap();
    let mut answered: Vec<Bytes> = vec![rig.reply()[0].clone(), rig.reply()[0].clone()];
    answered.sort();
    assert_eq!(answered, vec![Bytes::from_static(b"after"), Bytes::from_static(b"blocker")]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Bytes::from_static(b"blocker"), Bytes::from_static(b"after")]
    );

    rig.stop.send(()).unwrap();
    let stats = rig.dispatcher.join().unwrap().unwrap();
    assert_eq!(stats.abandoned, 3);
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.rejected_oversized, 1);
    rig.pool.join().unwrap();
}

#[test]
fn closed_frontend_is_a_fault() {
    let rig = Rig::start("inproc://dispatch-it-closed", 1, Arc::new(AcceptFrames));
    let Rig {
        clients,
        stop: _stop,
        dispatcher,
        pool,
        ..
    } = rig;

    drop(clients);
    assert!(matches!(
        dispatcher.join().unwrap(),
        Err(DispatcherFault::FrontendClosed)
    ));
    pool.join().unwrap();
}
