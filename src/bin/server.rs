//! Multi-connection echo server.
//!
//! Usage:
//!     multiconn-server <host> <port>
//!
//! Test with:
//!     multiconn-client 127.0.0.1 65432 3

use multiconn::cli::{ServerArgs, init_tracing};
use multiconn::{Reactor, ReactorBuilder, ReactorStats};

use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = match ServerArgs::parse(std::env::args()) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    init_tracing();

    match serve(&args) {
        Ok(stats) => {
            info!(
                accepted = stats.accepted,
                closed = stats.closed,
                bytes_echoed = stats.bytes_sent,
                "server exiting"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "server failed");
            ExitCode::from(2)
        }
    }
}

fn serve(args: &ServerArgs) -> multiconn::Result<ReactorStats> {
    let mut reactor: Reactor = ReactorBuilder::from_env().build()?;
    reactor.listen(args.address)?;

    let canceller = reactor.canceller();
    if let Err(err) = ctrlc::set_handler(move || canceller.cancel()) {
        warn!(%err, "could not install Ctrl+C handler");
    }

    reactor.run()
}
