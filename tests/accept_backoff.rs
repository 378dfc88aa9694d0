//! Runs alone in its own test binary: it lowers the process descriptor limit.
#![cfg(target_os = "linux")]

use multiconn::{Interest, ReactorBuilder};
use std::fs::{self, File};
use std::net::TcpStream as StdTcpStream;
use std::time::{Duration, Instant};

const TICK: Option<Duration> = Some(Duration::from_millis(10));

fn highest_open_descriptor() -> i32 {
    fs::read_dir("/proc/self/fd")
        .expect("list descriptors")
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<i32>().ok())
        .max()
        .unwrap_or(2)
}

fn set_descriptor_limit(limit: &libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) }, 0);
}

#[test]
fn listener_pauses_while_out_of_descriptors() {
    let mut server = ReactorBuilder::new().build().expect("reactor");
    let address = server.listen("127.0.0.1:0".parse().unwrap()).expect("listen");
    let listener = server.handles()[0];
    let _client = StdTcpStream::connect(address).expect("connect");

    let mut original = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    assert_eq!(
        unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut original) },
        0
    );
    set_descriptor_limit(&libc::rlimit {
        rlim_cur: (highest_open_descriptor() + 1) as libc::rlim_t,
        rlim_max: original.rlim_max,
    });

    // Take whatever numbers are still free below the limit.
    let mut fillers = Vec::new();
    while let Ok(file) = File::open("/dev/null") {
        fillers.push(file);
    }

    server.run_once(TICK).expect("run_once");
    assert_eq!(server.stats().accepted, 0);
    assert_eq!(server.interest_of(listener), Some(Interest::NONE));

    // The pending connection no longer wakes the loop.
    assert_eq!(server.run_once(TICK).expect("run_once"), 0);

    drop(fillers);
    set_descriptor_limit(&original);

    let started = Instant::now();
    while server.stats().accepted == 0 {
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "accepting never resumed"
        );
        server.run_once(TICK).expect("run_once");
    }
    assert_eq!(server.interest_of(listener), Some(Interest::READABLE));
}
