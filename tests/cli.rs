use multiconn::cli::{CLIENT_MESSAGES, ClientArgs, ServerArgs, UsageError};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|arg| arg.to_string()).collect()
}

#[test]
fn server_accepts_host_and_port() {
    let parsed = ServerArgs::parse(args(&["multiconn-server", "127.0.0.1", "65432"])).unwrap();
    assert_eq!(parsed.address, "127.0.0.1:65432".parse().unwrap());
}

#[test]
fn server_rejects_wrong_argument_count() {
    let err = ServerArgs::parse(args(&["server", "127.0.0.1"])).unwrap_err();
    assert_eq!(err.to_string(), "Usage: server <host> <port>");

    let err = ServerArgs::parse(args(&["server", "127.0.0.1", "1", "extra"])).unwrap_err();
    assert!(matches!(err, UsageError::WrongArgumentCount { .. }));
}

#[test]
fn client_accepts_connection_count() {
    let parsed = ClientArgs::parse(args(&["client", "127.0.0.1", "65432", "3"])).unwrap();
    assert_eq!(parsed.address, "127.0.0.1:65432".parse().unwrap());
    assert_eq!(parsed.connections, 3);
}

#[test]
fn client_rejects_wrong_argument_count() {
    let err = ClientArgs::parse(args(&["client", "127.0.0.1", "65432"])).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Usage: client <host> <port> <num_connections>"
    );
}

#[test]
fn malformed_numbers_are_usage_errors() {
    assert_eq!(
        ServerArgs::parse(args(&["server", "127.0.0.1", "port"])).unwrap_err(),
        UsageError::InvalidPort("port".to_string())
    );
    assert_eq!(
        ServerArgs::parse(args(&["server", "127.0.0.1", "70000"])).unwrap_err(),
        UsageError::InvalidPort("70000".to_string())
    );
    assert_eq!(
        ClientArgs::parse(args(&["client", "127.0.0.1", "1", "-2"])).unwrap_err(),
        UsageError::InvalidConnectionCount("-2".to_string())
    );
}

#[test]
fn ipv6_literal_is_accepted() {
    let parsed = ServerArgs::parse(args(&["server", "::1", "8080"])).unwrap();
    assert!(parsed.address.is_ipv6());
    assert_eq!(parsed.address.port(), 8080);
}

#[test]
fn client_messages_match_the_demo() {
    assert_eq!(CLIENT_MESSAGES[0], b"Message 1 from client.");
    assert_eq!(CLIENT_MESSAGES[1], b"Message 2 from client.");
    assert_eq!(CLIENT_MESSAGES.iter().map(|m| m.len()).sum::<usize>(), 44);
}
