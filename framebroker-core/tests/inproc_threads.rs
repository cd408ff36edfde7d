//! In-process endpoints shared across threads.

use bytes::Bytes;
use framebroker_core::inproc::is_bound;
use framebroker_core::prelude::*;
use hashbrown::HashMap;
use std::thread;
use std::time::Duration;

#[test]
fn connections_from_many_threads_are_told_apart() {
    let listener = bind_inproc("inproc://it-fan-in").unwrap();

    let handles: Vec<_> = (0..4u8)
        .map(|n| {
            thread::spawn(move || {
                let conn = connect_inproc("inproc://it-fan-in").unwrap();
                conn.send(vec![Bytes::from(vec![n])]).unwrap();
                // Wait for the echo so the connection outlives its message.
                let echo = conn.recv_timeout(Duration::from_secs(5)).unwrap();
                assert_eq!(echo, vec![Bytes::from(vec![n])]);
            })
        })
        .collect();

    let mut inboxes = HashMap::new();
    let mut echoed = 0;
    while echoed < 4 {
        match listener.recv_timeout(Duration::from_secs(5)).expect("event") {
            InprocEvent::Connected { peer, tx } => {
                inboxes.insert(peer, tx);
            }
            InprocEvent::Message { peer, parts } => {
                inboxes[&peer].send(parts).unwrap();
                echoed += 1;
            }
            InprocEvent::Disconnected { .. } => {}
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(inboxes.len(), 4);
}

#[test]
fn fair_queue_drains_inproc_traffic_round_robin() {
    let listener = bind_inproc("inproc://it-fair").unwrap();
    let busy = connect_inproc("inproc://it-fair").unwrap();
    let calm = connect_inproc("inproc://it-fair").unwrap();

    for n in 0..3u8 {
        busy.send(vec![Bytes::from(vec![n])]).unwrap();
    }
    calm.send(vec![Bytes::from_static(b"c")]).unwrap();

    let mut queue: FairQueue<PeerId, InprocMessage> = FairQueue::new();
    while let Some(event) = listener.try_recv() {
        if let InprocEvent::Message { peer, parts } = event {
            queue.push(peer, parts);
        }
    }

    let order: Vec<PeerId> = std::iter::from_fn(|| queue.pop().map(|(peer, _)| peer)).collect();
    assert_eq!(
        order,
        vec![busy.peer_id(), calm.peer_id(), busy.peer_id(), busy.peer_id()]
    );
}

#[test]
fn name_is_free_again_after_listener_drop() {
    let first = bind_inproc("inproc://it-rebind").unwrap();
    let conn = connect_inproc("inproc://it-rebind").unwrap();
    drop(first);

    assert!(!is_bound("inproc://it-rebind"));
    assert_eq!(
        conn.recv_timeout(Duration::from_secs(1)).unwrap_err().kind(),
        std::io::ErrorKind::ConnectionAborted
    );

    let _second = bind_inproc("inproc://it-rebind").unwrap();
    assert!(connect_inproc("inproc://it-rebind").is_ok());
}
