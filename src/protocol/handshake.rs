//! RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Only the simple (plain) handshake is implemented. A digest/complex C0 is
//! rejected rather than downgraded: C0 must be exactly 0x03.
//!
//! S1 layout: bytes 0..4 carry our UNIX time in seconds (big-endian) and
//! bytes 4..8 echo the client's time field from C1, then randoms. S2 is a
//! verbatim copy of C1; C2 content is not validated.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Serve the handshake as the listener side.
pub async fn serve<R, W>(reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // C0 + C1
    let mut c0 = [0u8; 1];
    reader.read_exact(&mut c0).await?;
    if c0[0] != RTMP_VERSION {
        return Err(Error::UnsupportedHandshake(c0[0]));
    }

    let mut c1 = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut c1).await?;

    // S0 || S1 || S2
    let s1 = server_packet(&c1);
    let mut response = Vec::with_capacity(1 + HANDSHAKE_SIZE * 2);
    response.push(RTMP_VERSION);
    response.extend_from_slice(&s1);
    response.extend_from_slice(&c1);
    writer.write_all(&response).await?;
    writer.flush().await?;

    // C2: read and discard, no content validation
    let mut c2 = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut c2).await?;

    Ok(())
}

/// Run the handshake as the connecting side, for pull clients and the test
/// harness.
pub async fn connect<R, W>(reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let c1 = client_packet();
    let mut first = Vec::with_capacity(1 + HANDSHAKE_SIZE);
    first.push(RTMP_VERSION);
    first.extend_from_slice(&c1);
    writer.write_all(&first).await?;
    writer.flush().await?;

    let mut s0 = [0u8; 1];
    reader.read_exact(&mut s0).await?;
    if s0[0] != RTMP_VERSION {
        return Err(Error::UnsupportedHandshake(s0[0]));
    }

    let mut s1 = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut s1).await?;
    let mut s2 = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut s2).await?;

    // C2 echoes S1
    writer.write_all(&s1).await?;
    writer.flush().await?;

    Ok(())
}

/// Build S1: our time, the peer's time echoed, random tail.
fn server_packet(c1: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut packet);

    packet[0..4].copy_from_slice(&unix_seconds().to_be_bytes());
    packet[4..8].copy_from_slice(&c1[0..4]);

    packet
}

/// Build C1: our time, zero version field, random tail.
fn client_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut packet);

    packet[0..4].copy_from_slice(&unix_seconds().to_be_bytes());
    packet[4..8].copy_from_slice(&[0, 0, 0, 0]);

    packet
}

fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_server_roundtrip() {
        let (client, server) = tokio::io::duplex(8192);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let server_task = tokio::spawn(async move {
            serve(&mut server_read, &mut server_write).await.unwrap();
        });
        connect(&mut client_read, &mut client_write).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_wrong_version() {
        let (client, server) = tokio::io::duplex(8192);
        let (mut server_read, mut server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        let server_task =
            tokio::spawn(async move { serve(&mut server_read, &mut server_write).await });

        let mut bad = vec![0x06u8];
        bad.extend_from_slice(&[0u8; HANDSHAKE_SIZE]);
        client_write.write_all(&bad).await.unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::UnsupportedHandshake(0x06)));
    }

    #[tokio::test]
    async fn test_s1_echoes_client_time_and_s2_copies_c1() {
        let (client, server) = tokio::io::duplex(8192);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let server_task =
            tokio::spawn(async move { serve(&mut server_read, &mut server_write).await });

        let mut c1 = [0u8; HANDSHAKE_SIZE];
        c1[0..4].copy_from_slice(&0xAABBCCDDu32.to_be_bytes());
        for (i, b) in c1[8..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        client_write.write_all(&[RTMP_VERSION]).await.unwrap();
        client_write.write_all(&c1).await.unwrap();

        let mut s0 = [0u8; 1];
        client_read.read_exact(&mut s0).await.unwrap();
        assert_eq!(s0[0], RTMP_VERSION);

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        client_read.read_exact(&mut s1).await.unwrap();
        // time2 slot of S1 carries C1's time field
        assert_eq!(&s1[4..8], &0xAABBCCDDu32.to_be_bytes());

        let mut s2 = [0u8; HANDSHAKE_SIZE];
        client_read.read_exact(&mut s2).await.unwrap();
        assert_eq!(s2, c1);

        client_write.write_all(&s1).await.unwrap();
        server_task.await.unwrap().unwrap();
    }
}
