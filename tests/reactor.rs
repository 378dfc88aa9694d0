use multiconn::cli::CLIENT_MESSAGES;
use multiconn::{ConnectionState, Dialer, Reactor, ReactorBuilder, ReactorConfig, Role};

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const TICK: Option<Duration> = Some(Duration::from_millis(10));
const DEADLINE: Duration = Duration::from_secs(5);

fn reactor() -> Reactor {
    ReactorBuilder::new()
        .poll_timeout(Some(Duration::from_millis(20)))
        .build()
        .expect("reactor")
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// An address nothing listens on.
fn closed_port() -> SocketAddr {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind listener");
    listener.local_addr().unwrap()
}

/// Alternates single polls on every reactor until `done` holds or the
/// deadline passes.
fn pump_until(reactors: &mut [&mut Reactor], mut done: impl FnMut(&[&mut Reactor]) -> bool) {
    let started = Instant::now();
    while !done(reactors) {
        assert!(started.elapsed() < DEADLINE, "reactors did not settle in time");
        for reactor in reactors.iter_mut() {
            reactor.run_once(TICK).expect("run_once");
        }
    }
}

#[test]
fn three_clients_get_their_messages_echoed() {
    let mut server = reactor();
    let address = server.listen(loopback()).expect("listen");
    assert_eq!(server.len(), 1);

    let mut client = reactor();
    let dialer = Dialer::new(address, CLIENT_MESSAGES);
    let tokens = client.dial(&dialer, 3);
    assert_eq!(tokens.len(), 3);
    assert_eq!(dialer.expected_total(), 44);
    assert_eq!(dialer.target(), address);
    assert_eq!(
        dialer.messages(),
        [CLIENT_MESSAGES[0].to_vec(), CLIENT_MESSAGES[1].to_vec()]
    );

    let ids: Vec<Option<usize>> = tokens
        .iter()
        .map(|token| client.connection(*token).and_then(|c| c.id()))
        .collect();
    assert_eq!(ids, [Some(1), Some(2), Some(3)]);

    pump_until(&mut [&mut server, &mut client], |reactors| {
        reactors[1].is_empty()
    });

    let client_stats = client.stats();
    assert_eq!(client_stats.dialed, 3);
    assert_eq!(client_stats.closed, 3);
    assert_eq!(client_stats.errors, 0);
    assert_eq!(client_stats.bytes_sent, 132);
    assert_eq!(client_stats.bytes_received, 132);

    // The server notices each client going away and keeps only its listener.
    pump_until(&mut [&mut server], |reactors| reactors[0].len() == 1);

    let server_stats = server.stats();
    assert_eq!(server_stats.accepted, 3);
    assert_eq!(server_stats.closed, 3);
    assert_eq!(server_stats.bytes_received, 132);
    assert_eq!(server_stats.bytes_sent, 132);

    let remaining = server.handles();
    assert_eq!(server.role_of(remaining[0]), Some(Role::Listener));
}

#[test]
fn server_narrows_interest_once_echo_is_flushed() {
    let mut server = reactor();
    let address = server.listen(loopback()).expect("listen");

    let mut peer = StdTcpStream::connect(address).expect("connect");
    pump_until(&mut [&mut server], |reactors| reactors[0].len() == 2);

    peer.write_all(b"hello").expect("write");
    peer.set_read_timeout(Some(DEADLINE)).unwrap();

    let started = Instant::now();
    let mut echoed = [0u8; 5];
    while server.stats().bytes_sent < 5 {
        assert!(started.elapsed() < DEADLINE, "echo never flushed");
        server.run_once(TICK).expect("run_once");
    }
    peer.read_exact(&mut echoed).expect("read echo");
    assert_eq!(&echoed, b"hello");

    let connection = server.connections()[0];
    assert_eq!(connection.role(), Role::ServerPeer);
    assert_eq!(connection.state(), ConnectionState::Established);
    assert!(connection.outbound().is_empty());

    let handle = server
        .handles()
        .into_iter()
        .find(|handle| server.role_of(*handle) == Some(Role::ServerPeer))
        .expect("peer handle");
    assert_eq!(server.interest_of(handle), Some(multiconn::Interest::READABLE));
}

#[test]
fn refused_connect_only_closes_that_connection() {
    let mut server = reactor();
    let address = server.listen(loopback()).expect("listen");
    let mut client = reactor();

    // Some kernels refuse a loopback connect synchronously, in which case the
    // attempt is never registered.
    let refused = client.dial(&Dialer::new(closed_port(), CLIENT_MESSAGES), 1);
    let live = client.dial(&Dialer::new(address, CLIENT_MESSAGES), 1);
    assert_eq!(live.len(), 1);

    pump_until(&mut [&mut server, &mut client], |reactors| {
        reactors[1].is_empty()
    });

    let stats = client.stats();
    assert_eq!(stats.errors, refused.len() as u64);
    assert_eq!(stats.bytes_received, 44);
    assert_eq!(stats.closed, 1 + refused.len() as u64);
}

#[test]
fn dropped_peer_does_not_disturb_its_neighbour() {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind listener");
    let mut client = reactor();
    let tokens = client.dial(&Dialer::new(listener.local_addr().unwrap(), CLIENT_MESSAGES), 2);
    assert_eq!(tokens.len(), 2);

    let (dropped, _) = listener.accept().expect("accept first");
    let (mut kept, _) = listener.accept().expect("accept second");
    drop(dropped);

    pump_until(&mut [&mut client], |reactors| {
        let connections = reactors[0].connections();
        connections.len() == 1
            && connections[0].pending_messages() == 0
            && connections[0].outbound().is_empty()
    });

    let survivor = client.connections()[0];
    assert_eq!(survivor.state(), ConnectionState::Established);
    assert_eq!(client.stats().closed, 1);

    kept.set_read_timeout(Some(DEADLINE)).unwrap();
    let mut received = vec![0u8; 44];
    kept.read_exact(&mut received).expect("read messages");
    assert_eq!(received, CLIENT_MESSAGES.concat());
    kept.write_all(&received).expect("echo");

    pump_until(&mut [&mut client], |reactors| reactors[0].is_empty());
    assert_eq!(client.stats().closed, 2);
}

#[test]
fn cancellation_drains_every_handle() {
    let mut server = reactor();
    let address = server.listen(loopback()).expect("listen");
    let _peer = StdTcpStream::connect(address).expect("connect");

    let canceller = server.canceller();
    let cancel_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });

    let stats = server.run().expect("run");
    cancel_thread.join().unwrap();

    assert!(server.is_empty());
    assert!(server.canceller().is_cancelled());
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.closed, 1);
}

#[test]
fn cancellation_wakes_a_reactor_polling_without_timeout() {
    let (started_tx, started_rx) = mpsc::channel();
    let (stopped_tx, stopped_rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        let mut server = ReactorBuilder::new()
            .poll_timeout(None)
            .build()
            .expect("reactor");
        server.listen(loopback()).expect("listen");
        started_tx.send(server.canceller()).unwrap();

        let result = server.run();
        stopped_tx.send((result.is_ok(), server.is_empty())).unwrap();
    });

    let canceller = started_rx.recv().expect("reactor started");
    thread::sleep(Duration::from_millis(50));
    canceller.cancel();

    let (finished_cleanly, drained) = stopped_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("reactor kept blocking after cancel");
    worker.join().unwrap();

    assert!(finished_cleanly);
    assert!(drained);
}

#[test]
fn run_returns_once_the_registry_is_empty() {
    let mut idle = Reactor::new(ReactorConfig::default()).expect("reactor");
    let stats = idle.run().expect("run");
    assert_eq!(stats, Default::default());

    let mut client = reactor();
    client.dial(&Dialer::new(closed_port(), CLIENT_MESSAGES), 2);
    let stats = client.run().expect("run");

    assert!(client.is_empty());
    assert_eq!(stats.closed, stats.dialed);
    assert_eq!(stats.errors, stats.dialed);
}

#[test]
fn client_without_messages_closes_after_connecting() {
    let mut server = reactor();
    let address = server.listen(loopback()).expect("listen");

    let mut client = reactor();
    let tokens = client.dial(&Dialer::new(address, Vec::<Vec<u8>>::new()), 1);
    assert_eq!(tokens.len(), 1);

    pump_until(&mut [&mut server, &mut client], |reactors| {
        reactors[1].is_empty()
    });

    let stats = client.stats();
    assert_eq!(stats.closed, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.bytes_sent, 0);
}
