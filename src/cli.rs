//! Argument parsing and process setup shared by the two binaries.

use std::net::{SocketAddr, ToSocketAddrs};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Messages every client connection sends, in order.
pub const CLIENT_MESSAGES: [&[u8]; 2] = [b"Message 1 from client.", b"Message 2 from client."];

/// Invalid command line. The binaries print it and exit with status 1.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("Usage: {program} {arguments}")]
    WrongArgumentCount {
        program: String,
        arguments: &'static str,
    },

    #[error("invalid port `{0}`")]
    InvalidPort(String),

    #[error("invalid number of connections `{0}`")]
    InvalidConnectionCount(String),

    #[error("cannot resolve `{0}`")]
    UnresolvableHost(String),
}

/// `multiconn-server <host> <port>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    pub address: SocketAddr,
}

impl ServerArgs {
    /// Parses the full argument list, program name included.
    pub fn parse<I>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let program = args.next().unwrap_or_else(|| "multiconn-server".to_string());
        let rest: Vec<String> = args.collect();

        let [host, port] = rest.as_slice() else {
            return Err(UsageError::WrongArgumentCount {
                program,
                arguments: "<host> <port>",
            });
        };

        Ok(Self {
            address: resolve(host, port)?,
        })
    }
}

/// `multiconn-client <host> <port> <num_connections>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientArgs {
    pub address: SocketAddr,
    pub connections: usize,
}

impl ClientArgs {
    /// Parses the full argument list, program name included.
    pub fn parse<I>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let program = args.next().unwrap_or_else(|| "multiconn-client".to_string());
        let rest: Vec<String> = args.collect();

        let [host, port, connections] = rest.as_slice() else {
            return Err(UsageError::WrongArgumentCount {
                program,
                arguments: "<host> <port> <num_connections>",
            });
        };

        let connections = connections
            .parse::<usize>()
            .map_err(|_| UsageError::InvalidConnectionCount(connections.clone()))?;

        Ok(Self {
            address: resolve(host, port)?,
            connections,
        })
    }
}

fn resolve(host: &str, port: &str) -> Result<SocketAddr, UsageError> {
    let port: u16 = port
        .parse()
        .map_err(|_| UsageError::InvalidPort(port.to_string()))?;

    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addresses| addresses.next())
        .ok_or_else(|| UsageError::UnresolvableHost(host.to_string()))
}

/// Installs the `tracing` subscriber used by the binaries. The level comes
/// from `RUST_LOG` and defaults to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
