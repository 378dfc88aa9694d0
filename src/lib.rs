//! Single-threaded, readiness-driven TCP multiplexer.
//!
//! One polling loop drives many non-blocking TCP connections, both accepted
//! (server role, echoing every byte back) and dialed (client role, sending a
//! list of messages and waiting for them to come back).
//!
//! # Architecture
//!
//! - **Poller**: registry of watched handles on top of epoll/kqueue
//! - **Connection**: per-socket buffers, counters and lifecycle state
//! - **Acceptor**: accepts one pending connection per readable event
//! - **Dialer**: issues non-blocking connects for the client role
//! - **Reactor**: the dispatcher routing readiness to the handlers
//! - **ReactorBuilder**: fluent builder over [`ReactorConfig`]
//! - **Canceller**: cooperative shutdown flag checked once per batch
//!
//! # Example
//!
//! ```no_run
//! use multiconn::{Dialer, Reactor, ReactorConfig};
//!
//! let mut server = Reactor::new(ReactorConfig::default())?;
//! let address = server.listen("127.0.0.1:0".parse().unwrap())?;
//!
//! let mut client = Reactor::new(ReactorConfig::default())?;
//! client.dial(&Dialer::new(address, [b"ping".to_vec()]), 3);
//! # Ok::<(), multiconn::ReactorError>(())
//! ```

mod builder;
mod cancel;
pub mod cli;
mod config;
mod error;
pub mod net;
pub mod reactor;

pub use builder::ReactorBuilder;
pub use cancel::Canceller;
pub use config::ReactorConfig;
pub use error::{ReactorError, Result};
pub use reactor::connection::{CloseReason, Connection, ConnectionState, Outcome, Role};
pub use reactor::core::{Entry, Reactor, ReactorStats};
pub use reactor::dialer::Dialer;
pub use reactor::interest::Interest;
pub use reactor::poller::{Poller, Readiness, Token};
