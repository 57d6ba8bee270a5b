//! The relay state machine and the connection pair it drives.
//!
//! Each accepted connection becomes one task. The task owns its client
//! socket, its (once connected) upstream socket, both direction buffers,
//! and both cipher contexts exclusively; nothing here is shared with, or
//! locked against, any other connection's task.
//!
//! The stage sequence `Handshaking -> Connecting -> Streaming -> Closed` is
//! realized as a straight-line sequence of `.await`s rather than a dispatch
//! loop switching on an explicit `Stage` value: each stage has exactly one
//! way forward (or a teardown), so there's nothing for a separate
//! dispatcher to pick between. `Stage` still exists as a plain enum for
//! logging and tests.

use crate::cipher::{self, CipherConfig, CipherContext};
use crate::config::Config;
use crate::errors::Error;
use crate::handshake;
use crate::stats::{ClientGuard, UpstreamGuard};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// Buffer capacity shared by both directions.
pub const BUF_SIZE: usize = 16 * 1024;

/// The relay lifecycle position of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshaking,
    Connecting,
    Streaming,
    Closed,
}

/// Drives one accepted client connection through the full relay lifecycle:
/// handshake, upstream connect, bidirectional streaming, teardown. Never
/// panics on remote input or a closed peer; every such condition resolves
/// into a logged, early return.
pub async fn run(client: TcpStream, peer_addr: SocketAddr, config: Arc<Config>, cipher_config: Arc<CipherConfig>) {
    let _client_guard = ClientGuard::new();

    if let Err(e) = run_inner(client, peer_addr, &config, &cipher_config).await {
        if e.is_routine() {
            log::debug!("{}: {}", peer_addr, e);
        } else {
            log::error!("{}: {}", peer_addr, e);
        }
    }
    log::debug!("{}: pair closed", peer_addr);
}

async fn run_inner(
    client: TcpStream,
    peer_addr: SocketAddr,
    config: &Config,
    cipher_config: &CipherConfig,
) -> Result<(), Error> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut enc_ctx, mut dec_ctx) = cipher_config.new_context_pair();

    // Handshaking: the header is expected in full in the first read.
    let mut to_upstream = BytesMut::with_capacity(BUF_SIZE);
    let n = fill(&mut to_upstream, &mut client_read).await?;
    if n == 0 {
        return Err(Error::PeerClosed);
    }
    cipher::decrypt(&mut to_upstream[..n], dec_ctx.as_mut());

    let (destination, header_len) = handshake::parse(&to_upstream[..n])?;
    to_upstream.advance(header_len);
    log::debug!("{}: connecting to {:?}", peer_addr, destination);

    // Connecting: resolve and dial the destination under the configured
    // connect timeout. The `connect().await` result tells us directly
    // whether the dial succeeded, so there's no separate writability probe
    // needed afterward.
    let addr = resolve(&destination).await?;
    let upstream = timeout(Duration::from_secs(config.timeout), TcpStream::connect(addr))
        .await
        .map_err(|_| Error::ConnectTimeout)??;
    let _upstream_guard = UpstreamGuard::new();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    // Streaming: bidirectional relay with per-direction backpressure.
    stream(
        &mut client_read,
        &mut client_write,
        &mut upstream_read,
        &mut upstream_write,
        to_upstream,
        &mut enc_ctx,
        &mut dec_ctx,
    )
    .await
}

async fn resolve(destination: &handshake::Destination) -> Result<SocketAddr, Error> {
    lookup_host(destination.host_port())
        .await?
        .next()
        .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")))
}

/// The `Streaming` stage: one loop, four `tokio::select!` arms, each gated
/// by exactly the buffer-occupancy precondition it needs to run safely.
/// Because the guard on each arm is recomputed from buffer state every
/// iteration rather than toggled as separate flags, a direction can never
/// end up both reading and writing its own buffer at once.
#[allow(clippy::too_many_arguments)]
async fn stream(
    client_read: &mut OwnedReadHalf,
    client_write: &mut OwnedWriteHalf,
    upstream_read: &mut OwnedReadHalf,
    upstream_write: &mut OwnedWriteHalf,
    mut to_upstream: BytesMut,
    enc_ctx: &mut Option<CipherContext>,
    dec_ctx: &mut Option<CipherContext>,
) -> Result<(), Error> {
    let mut to_client = BytesMut::with_capacity(BUF_SIZE);

    loop {
        tokio::select! {
            // Client readable, armed only while the upstream buffer has
            // nothing left to flush.
            result = fill(&mut to_upstream, client_read), if to_upstream.is_empty() => {
                let n = result?;
                if n == 0 {
                    return Err(Error::PeerClosed);
                }
                cipher::decrypt(&mut to_upstream[..n], dec_ctx.as_mut());
            }

            // Upstream writable, armed only while there's something pending.
            result = drain(&mut to_upstream, upstream_write), if !to_upstream.is_empty() => {
                result?;
            }

            // Upstream readable, armed only while the client buffer is empty.
            result = fill(&mut to_client, upstream_read), if to_client.is_empty() => {
                let n = result?;
                if n == 0 {
                    return Err(Error::PeerClosed);
                }
                cipher::encrypt(&mut to_client[..n], enc_ctx.as_mut());
            }

            // Client writable, armed only while there's something pending.
            result = drain(&mut to_client, client_write), if !to_client.is_empty() => {
                result?;
            }
        }
    }
}

/// Reads into `buf`, reserving `BUF_SIZE` of capacity first so a drained
/// `BytesMut` reclaims its original window instead of reporting spurious
/// EOF (the same reserve-then-read pattern a bidirectional Tokio copy
/// implementation uses for its resizable buffer).
async fn fill<R: AsyncRead + Unpin>(buf: &mut BytesMut, reader: &mut R) -> Result<usize, Error> {
    buf.reserve(BUF_SIZE);
    Ok(reader.read_buf(buf).await?)
}

/// Writes as much of `buf` as the sink accepts in one call, advancing `buf`
/// by however much was written. That `Buf::advance` is the "compact the
/// residual bytes to the front" step, done for us by `bytes` instead of a
/// manual `memmove`.
async fn drain<W: AsyncWrite + Unpin>(buf: &mut BytesMut, writer: &mut W) -> Result<usize, Error> {
    let n = writer.write_buf(buf).await?;
    if n == 0 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::WriteZero,
            "write returned zero bytes",
        )));
    }
    Ok(n)
}
