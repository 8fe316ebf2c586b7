mod config;
mod connection;
mod frame;
mod identity;
mod room;
mod server;
mod session;
mod user;

use server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates tracing, loads configuration, spawns the lost-connection
/// drain task and the defensive stale-room sweep, then runs the accept
/// loop on the configured bind address and port.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config = config::load().await.unwrap_or_else(|err| {
        tracing::error!(%err, "Initial config load error.");
        panic!("Initial config load error: {err}");
    });

    let (server, lost_rx) = Server::new(config);

    let drain_state = server.clone();
    tokio::spawn(async move {
        drain_state.drain_lost_connections(lost_rx).await;
    });

    let sweep_state = server.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1200));
        loop {
            interval.tick().await;
            sweep_state.sweep_stale_rooms().await;
        }
    });

    if let Err(err) = server.listen().await {
        tracing::error!(%err, "server exited with an error");
    }
}

#[cfg(test)]
mod wire_tests {
    use std::time::Duration;

    use protocol::{ClientCommand, Decode, Encode, PROTOCOL_VERSION, ServerCommand};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::config::Config;
    use crate::frame::{read_frame, write_frame};
    use crate::server::Server;

    async fn spawned_server() -> std::net::SocketAddr {
        spawned_server_with_config(Config::default()).await
    }

    async fn spawned_server_with_config(config: Config) -> std::net::SocketAddr {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (server, lost_rx) = Server::new(config);
        let drain = server.clone();
        tokio::spawn(async move { drain.drain_lost_connections(lost_rx).await });
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let server = server.clone();
                tokio::spawn(async move { crate::connection::run(stream, server).await });
            }
        });
        addr
    }

    const TOKEN_ALICE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TOKEN_BOB: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    /// A minimal raw-socket HTTP/1.1 responder standing in for the external
    /// identity service: no mocking crate appears anywhere in the example
    /// corpus this workspace is built from, so `/me` is answered by hand,
    /// mapping each test token to a fixed user.
    async fn spawn_identity_stub() -> std::net::SocketAddr {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = stream.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        request.extend_from_slice(&buf[..n]);
                        if request.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let text = String::from_utf8_lossy(&request);
                    let token = text
                        .lines()
                        .find(|line| line.to_ascii_lowercase().starts_with("authorization:"))
                        .and_then(|line| line.split("Bearer ").nth(1))
                        .unwrap_or("")
                        .trim();
                    let (id, name) = match token {
                        TOKEN_ALICE => (1, "alice"),
                        TOKEN_BOB => (2, "bob"),
                        _ => (0, "unknown"),
                    };
                    let body = format!("{{\"id\":{id},\"name\":\"{name}\",\"language\":\"en\"}}");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    async fn handshake(stream: &mut TcpStream) {
        stream.write_u8(PROTOCOL_VERSION).await.unwrap();
        stream.flush().await.unwrap();
        let mut peer_version = [0u8; 1];
        stream.read_exact(&mut peer_version).await.unwrap();
        assert_eq!(peer_version[0], PROTOCOL_VERSION);
    }

    async fn send_command(stream: &mut TcpStream, command: &ClientCommand) {
        let mut buf = bytes::BytesMut::new();
        command.encode(&mut buf);
        write_frame(stream, &buf).await.unwrap();
    }

    async fn recv_command(stream: &mut TcpStream) -> ServerCommand {
        let payload = read_frame(stream).await.unwrap();
        let mut cursor = payload.as_ref();
        ServerCommand::decode(&mut cursor).unwrap()
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong_over_a_real_socket() {
        let addr = spawned_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        handshake(&mut stream).await;

        send_command(&mut stream, &ClientCommand::Ping).await;
        let response = recv_command(&mut stream).await;
        assert!(matches!(response, ServerCommand::Pong));
    }

    #[tokio::test]
    async fn oversized_frame_closes_the_connection() {
        let addr = spawned_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        handshake(&mut stream).await;

        let mut len_buf = bytes::BytesMut::new();
        protocol::encode_varint(&mut len_buf, 3 * 1024 * 1024);
        stream.write_all(&len_buf).await.unwrap();
        stream.flush().await.unwrap();

        let mut byte = [0u8; 1];
        let result = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut byte)).await;
        match result {
            Ok(Ok(0)) => {}
            Ok(Ok(_)) => panic!("expected connection to close, got data"),
            Ok(Err(_)) => {}
            Err(_) => panic!("server did not close the connection in time"),
        }
    }

    #[tokio::test]
    async fn unauthenticated_commands_are_dropped_without_a_response() {
        let addr = spawned_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        handshake(&mut stream).await;

        send_command(
            &mut stream,
            &ClientCommand::Chat {
                message: "hello".to_owned(),
            },
        )
        .await;
        // Follow up with a Ping, which is always answered; if the Chat had
        // produced a reply it would show up first.
        send_command(&mut stream, &ClientCommand::Ping).await;
        let response = recv_command(&mut stream).await;
        assert!(matches!(response, ServerCommand::Pong));
    }

    #[tokio::test]
    async fn create_join_and_chat_scenario() {
        let identity_addr = spawn_identity_stub().await;
        let mut config = Config::default();
        config.identity_base_url = format!("http://{identity_addr}");
        let addr = spawned_server_with_config(config).await;

        let mut alice = TcpStream::connect(addr).await.unwrap();
        handshake(&mut alice).await;
        let mut bob = TcpStream::connect(addr).await.unwrap();
        handshake(&mut bob).await;

        send_command(
            &mut alice,
            &ClientCommand::Authenticate {
                token: TOKEN_ALICE.to_owned(),
            },
        )
        .await;
        let ServerCommand::Authenticate(result) = recv_command(&mut alice).await else {
            panic!("expected an Authenticate response");
        };
        assert!(result.is_ok());

        send_command(
            &mut bob,
            &ClientCommand::Authenticate {
                token: TOKEN_BOB.to_owned(),
            },
        )
        .await;
        let ServerCommand::Authenticate(result) = recv_command(&mut bob).await else {
            panic!("expected an Authenticate response");
        };
        assert!(result.is_ok());

        let room_id = protocol::RoomId::new("testroom").unwrap();
        send_command(&mut alice, &ClientCommand::CreateRoom { id: room_id.clone() }).await;
        // The room's own creation announcement arrives before the direct
        // CreateRoom response, since Room::announce_create runs first.
        let announce = recv_command(&mut alice).await;
        assert!(matches!(announce, ServerCommand::Message(_)));
        let ServerCommand::CreateRoom(result) = recv_command(&mut alice).await else {
            panic!("expected a CreateRoom response");
        };
        assert!(result.is_ok());

        send_command(
            &mut bob,
            &ClientCommand::JoinRoom {
                id: room_id,
                monitor: false,
            },
        )
        .await;
        let ServerCommand::JoinRoom(result) = recv_command(&mut bob).await else {
            panic!("expected a JoinRoom response");
        };
        assert!(result.is_ok());

        // Alice sees Bob's join as a broadcast Message, then the direct
        // OnJoinRoom notice Room::join sends after the broadcast.
        let alice_sees_join = recv_command(&mut alice).await;
        assert!(matches!(alice_sees_join, ServerCommand::Message(_)));
        let alice_sees_on_join = recv_command(&mut alice).await;
        assert!(matches!(alice_sees_on_join, ServerCommand::OnJoinRoom(_)));

        send_command(
            &mut alice,
            &ClientCommand::Chat {
                message: "hello room".to_owned(),
            },
        )
        .await;
        let alice_chat_echo = recv_command(&mut alice).await;
        assert!(matches!(alice_chat_echo, ServerCommand::Message(_)));
        let ServerCommand::Chat(result) = recv_command(&mut alice).await else {
            panic!("expected a Chat response");
        };
        assert!(result.is_ok());

        let bob_sees_chat = recv_command(&mut bob).await;
        assert!(matches!(bob_sees_chat, ServerCommand::Message(_)));
    }
}
