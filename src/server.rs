use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::forwarding::{forward, Upstream};
use crate::net_util::send_udp_bytes_to;
use crate::protocol::wire_types::*;
use crate::response::{self, StaticAnswer};

/// How queries get answered.
#[derive(Debug, Clone)]
pub enum Mode<U> {
    /// Every question is answered with the same address.
    Local(StaticAnswer),

    /// Every question is forwarded upstream.
    Forward(U),
}

/// Parse a datagram and build the response to send back, if any.
///
/// A datagram which cannot be parsed gets a `FormatError` response if
/// the ID could be read, and no response otherwise.  A datagram which
/// is itself a response is dropped: replying to it could start an
/// endless exchange of errors with another server.
pub async fn handle_raw_message<U: Upstream>(mode: &Mode<U>, buf: &[u8]) -> Option<Message> {
    let query = match Message::from_octets(buf) {
        Ok(query) => query,
        Err(error) => {
            tracing::warn!(%error, "could not parse message");
            return error.id().map(Message::make_format_error_response);
        }
    };

    tracing::debug!(
        id = %query.header.id,
        opcode = ?query.header.opcode,
        questions = %query.questions.len(),
        "parsed message"
    );

    if query.header.is_response {
        tracing::warn!(id = %query.header.id, "got a response instead of a query, dropping");
        return None;
    }

    let response = match mode {
        Mode::Local(answer) => response::build(&query, answer),
        Mode::Forward(upstream) => forward(upstream, &query).await,
    };

    Some(response)
}

/// Serve queries from a UDP socket, one datagram at a time.  Problems
/// with a single datagram are logged and the datagram dropped.  Only a
/// receive error which is not transient ends the loop, and is returned.
pub async fn listen_udp<U: Upstream>(mode: Mode<U>, socket: UdpSocket) -> io::Error {
    let mut buf = vec![0u8; UDP_MAX_SIZE];

    loop {
        let (size, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) if is_transient(&error) => {
                tracing::warn!(%error, "udp receive error");
                continue;
            }
            Err(error) => {
                tracing::error!(%error, "udp receive error, giving up");
                return error;
            }
        };

        tracing::debug!(%peer, %size, "udp request");

        if let Some(message) = handle_raw_message(&mode, &buf[..size]).await {
            send_message(&socket, peer, &message).await;
        }
    }
}

/// Receive errors which say nothing about the socket itself.  A
/// connection reset or refusal is an ICMP error from an earlier send.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

async fn send_message(socket: &UdpSocket, peer: SocketAddr, message: &Message) {
    match message.to_octets() {
        Ok(mut serialised) => {
            if let Err(error) = send_udp_bytes_to(socket, peer, &mut serialised).await {
                tracing::error!(%peer, %error, "udp send error");
            }
        }
        Err(error) => {
            tracing::error!(?message, %error, "could not serialise message");
        }
    }
}
