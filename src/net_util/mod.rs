use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::protocol::wire_types::{HEADER_SIZE, UDP_MAX_SIZE};

/// The TC flag, in the third octet of a serialised message.
const OCTET_MASK_TC: u8 = 0b0000_0010;

/// Write a serialised message to a UDP peer.  A message over 512
/// octets is cut short and has the TC flag set; otherwise the TC flag
/// is cleared.
///
/// # Errors
///
/// If the message is shorter than a header, or sending fails.
pub async fn send_udp_bytes_to(
    sock: &UdpSocket,
    target: SocketAddr,
    bytes: &mut [u8],
) -> Result<(), io::Error> {
    let bytes = fit_udp_bytes(bytes)?;
    sock.send_to(bytes, target).await?;

    Ok(())
}

/// Set or clear the TC flag and return the part of the message which
/// fits in a datagram.
fn fit_udp_bytes(bytes: &mut [u8]) -> Result<&[u8], io::Error> {
    if bytes.len() < HEADER_SIZE {
        tracing::error!(length = %bytes.len(), "message too short");
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "message shorter than a header",
        ));
    }

    if bytes.len() > UDP_MAX_SIZE {
        bytes[2] |= OCTET_MASK_TC;
        Ok(&bytes[..UDP_MAX_SIZE])
    } else {
        bytes[2] &= !OCTET_MASK_TC;
        Ok(bytes)
    }
}
