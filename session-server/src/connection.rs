//! Per-socket duplex: version handshake, then a receive task decoding
//! [`protocol::ClientCommand`]s and a send task draining an unbounded
//! outbound queue, exactly the "two cooperative tasks sharing the socket"
//! shape of the teacher's `processing_module.rs` — generalized from a
//! WebSocket split sink/stream to a raw `TcpStream` split into
//! `OwnedReadHalf`/`OwnedWriteHalf`, and from passthrough relaying to
//! decode-dispatch-encode.

use std::sync::Arc;

use protocol::{ClientCommand, Decode, Encode, PROTOCOL_VERSION, ServerCommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::frame::{FrameError, read_frame, write_frame};
use crate::server::Server;
use crate::session::Session;

/// Runs one accepted connection to completion: handshake, spawn send +
/// receive + heartbeat tasks, and clean up on whichever finishes first.
pub async fn run(stream: TcpStream, server: Arc<Server>) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::warn!(?err, "failed to set TCP_NODELAY");
    }

    let (mut reader, mut writer) = stream.into_split();
    if let Err(err) = handshake(&mut reader, &mut writer).await {
        tracing::debug!(?err, "handshake failed");
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerCommand>();
    let session = Arc::new(Session::new(server.clone(), outbound_tx.clone()));
    server.sessions.insert(session.id, session.clone());
    tracing::debug!(session_id = %session.id, "connection established");

    let mut send_task = tokio::spawn(send_loop(writer, outbound_rx));
    let mut receive_task = tokio::spawn(receive_loop(reader, session.clone(), outbound_tx));
    let mut heartbeat_task = tokio::spawn(heartbeat_loop(session.clone()));

    let reason = tokio::select! {
        res = &mut send_task => { receive_task.abort(); heartbeat_task.abort(); join_reason(res) }
        res = &mut receive_task => { send_task.abort(); heartbeat_task.abort(); join_reason(res) }
        res = &mut heartbeat_task => { send_task.abort(); receive_task.abort(); join_reason(res) }
    };
    tracing::debug!(session_id = %session.id, reason, "connection closed");

    server.report_lost(session.id);
}

fn join_reason(res: Result<&'static str, tokio::task::JoinError>) -> &'static str {
    res.unwrap_or_else(|err| {
        tracing::error!(?err, "connection task panicked");
        "internal panic in connection task"
    })
}

/// Exchanges protocol versions: each side writes its own byte without
/// waiting on the other's (spec.md §4.1). A mismatch is logged only; there
/// is no version-dependent behaviour yet.
async fn handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
) -> std::io::Result<()> {
    let write_fut = writer.write_u8(PROTOCOL_VERSION);
    let mut peer_version = [0u8; 1];
    let read_fut = reader.read_exact(&mut peer_version);
    let (write_res, read_res) = tokio::join!(write_fut, read_fut);
    write_res?;
    read_res?;
    writer.flush().await?;
    if peer_version[0] != PROTOCOL_VERSION {
        tracing::debug!(peer_version = peer_version[0], "client protocol version mismatch");
    }
    Ok(())
}

/// Reads frames, decodes [`ClientCommand`]s, and either answers `Ping`
/// inline or hands the command to the session for dispatch. Decode errors
/// are logged and skipped; transport errors end the connection.
async fn receive_loop(
    mut reader: OwnedReadHalf,
    session: Arc<Session>,
    outbound: mpsc::UnboundedSender<ServerCommand>,
) -> &'static str {
    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(FrameError::Eof) => return "peer closed the connection",
            Err(FrameError::Oversized(len)) => {
                tracing::warn!(len, "oversized frame, closing connection");
                return "oversized frame";
            }
            Err(FrameError::MalformedLength) => {
                tracing::warn!("malformed varint length, closing connection");
                return "malformed frame length";
            }
            Err(FrameError::Io(err)) => {
                tracing::debug!(?err, "i/o error reading frame");
                return "i/o error";
            }
        };

        session.touch();

        let mut buf = payload.as_ref();
        let command = match ClientCommand::decode(&mut buf) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(?err, "dropping frame with malformed command");
                continue;
            }
        };

        if matches!(command, ClientCommand::Ping) {
            let _ = outbound.send(ServerCommand::Pong);
            continue;
        }

        if let Some(response) = session.dispatch(command).await {
            let _ = outbound.send(response);
        }
    }
}

/// Drains the outbound queue and writes frames. Unbounded by design
/// (spec.md §4.2): the server must never drop a state change to a slow
/// client.
async fn send_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ServerCommand>,
) -> &'static str {
    let mut buf = bytes::BytesMut::new();
    while let Some(command) = outbound.recv().await {
        buf.clear();
        command.encode(&mut buf);
        if let Err(err) = write_frame(&mut writer, &buf).await {
            tracing::debug!(?err, "i/o error writing frame");
            return "i/o error writing frame";
        }
    }
    "outbound channel closed"
}

/// Polls once a second; if the peer has been silent longer than the
/// configured timeout, the connection is declared lost.
async fn heartbeat_loop(session: Arc<Session>) -> &'static str {
    let poll = session.server.config().heartbeat_poll_secs.max(1);
    let timeout = session.server.config().heartbeat_timeout_secs;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll));
    loop {
        interval.tick().await;
        if session.idle_for().as_secs() > timeout {
            tracing::debug!(session_id = %session.id, "heartbeat timeout");
            return "heartbeat timeout";
        }
    }
}
