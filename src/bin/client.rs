//! Multi-connection client for the echo server.
//!
//! Usage:
//!     multiconn-client <host> <port> <num_connections>
//!
//! Every connection sends the same two messages and closes itself once the
//! server has echoed all of their bytes back.

use multiconn::cli::{CLIENT_MESSAGES, ClientArgs, init_tracing};
use multiconn::{Dialer, Reactor, ReactorBuilder, ReactorStats};

use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = match ClientArgs::parse(std::env::args()) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    init_tracing();

    match connect(&args) {
        Ok(stats) => {
            info!(
                dialed = stats.dialed,
                closed = stats.closed,
                bytes_received = stats.bytes_received,
                "client exiting"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "client failed");
            ExitCode::from(2)
        }
    }
}

fn connect(args: &ClientArgs) -> multiconn::Result<ReactorStats> {
    let mut reactor: Reactor = ReactorBuilder::from_env().build()?;

    let canceller = reactor.canceller();
    if let Err(err) = ctrlc::set_handler(move || canceller.cancel()) {
        warn!(%err, "could not install Ctrl+C handler");
    }

    let dialer = Dialer::new(args.address, CLIENT_MESSAGES);
    reactor.dial(&dialer, args.connections);

    reactor.run()
}
