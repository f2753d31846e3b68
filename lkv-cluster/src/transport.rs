//! # Transport Adapter
//!
//! Pluggable byte transport for the wire protocol. The in-tree
//! implementation speaks length-prefixed JSON frames over TCP with a small
//! per-address connection pool; implementations must preserve the
//! request/response shapes, enforce frame limits, and surface timeouts
//! distinctly from remote failures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use lkv_common::proto::{Request, Response, DEFAULT_MAX_FRAME_BYTES};
use lkv_common::{LatticeError, LatticeResult};

/// Boxed future used by the dyn-compatible transport trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte transport between cluster nodes.
///
/// `send` resolves with the peer's response, [`LatticeError::Timeout`] when
/// the deadline expired, or an IO error for transport failures.
pub trait Transport: Send + Sync {
    /// Sends one request to `addr` and awaits its response.
    fn send<'a>(&'a self, addr: &'a str, request: Request) -> BoxFuture<'a, LatticeResult<Response>>;
}

/// Writes a length-prefixed frame, enforcing the size limit.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame: usize) -> LatticeResult<()>
where
    W: AsyncWriteExt + Unpin,
{
    if payload.len() > max_frame {
        return Err(LatticeError::PayloadTooLarge {
            size: payload.len(),
            limit: max_frame,
        });
    }
    let mut header = BytesMut::with_capacity(4);
    header.put_u32(payload.len() as u32);
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a length-prefixed frame, enforcing the size limit.
///
/// Returns `Ok(None)` on a clean EOF before the header.
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> LatticeResult<Option<Vec<u8>>>
where
    R: AsyncReadExt + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = (&header[..]).get_u32() as usize;
    if len > max_frame {
        return Err(LatticeError::PayloadTooLarge {
            size: len,
            limit: max_frame,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// TCP transport with per-address connection reuse.
///
/// Connections are returned to the pool only after a clean round trip; any
/// IO or framing error discards the connection so a poisoned stream never
/// serves another request.
pub struct TcpTransport {
    pools: Mutex<hashbrown::HashMap<String, Vec<TcpStream>>>,
    max_idle_per_addr: usize,
    max_frame: usize,
    timeout: Duration,
}

impl TcpTransport {
    /// Creates a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self::with_limits(timeout, DEFAULT_MAX_FRAME_BYTES, 4)
    }

    /// Creates a transport with explicit frame and pool limits.
    pub fn with_limits(timeout: Duration, max_frame: usize, max_idle_per_addr: usize) -> Self {
        TcpTransport {
            pools: Mutex::new(hashbrown::HashMap::new()),
            max_idle_per_addr,
            max_frame,
            timeout,
        }
    }

    fn checkout(&self, addr: &str) -> Option<TcpStream> {
        self.pools.lock().get_mut(addr).and_then(Vec::pop)
    }

    fn checkin(&self, addr: &str, stream: TcpStream) {
        let mut pools = self.pools.lock();
        let pool = pools.entry(addr.to_string()).or_default();
        if pool.len() < self.max_idle_per_addr {
            pool.push(stream);
        }
    }

    async fn round_trip(&self, addr: &str, request: &Request) -> LatticeResult<Response> {
        let mut stream = match self.checkout(addr) {
            Some(stream) => stream,
            None => TcpStream::connect(addr).await?,
        };

        let payload = serde_json::to_vec(request)?;
        let outcome: LatticeResult<Response> = async {
            write_frame(&mut stream, &payload, self.max_frame).await?;
            match read_frame(&mut stream, self.max_frame).await? {
                Some(frame) => Ok(serde_json::from_slice(&frame)?),
                None => Err(LatticeError::Io(Arc::from("connection closed mid-request"))),
            }
        }
        .await;

        if outcome.is_ok() {
            self.checkin(addr, stream);
        }
        outcome
    }
}

impl Transport for TcpTransport {
    fn send<'a>(&'a self, addr: &'a str, request: Request) -> BoxFuture<'a, LatticeResult<Response>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.round_trip(addr, &request)).await {
                Ok(result) => result,
                Err(_) => Err(LatticeError::Timeout),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lkv_common::proto::{Op, Status};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frame_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut read_half, mut write_half) = (server, client);

        write_frame(&mut write_half, b"hello", 64).await.unwrap();
        let frame = read_frame(&mut read_half, 64).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn oversize_frames_are_refused_on_both_sides() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let err = write_frame(&mut client, &[0u8; 100], 10).await.unwrap_err();
        assert!(matches!(err, LatticeError::PayloadTooLarge { .. }));

        // A peer that advertises an oversize frame is rejected at the header.
        client.write_all(&(1_000_000u32).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut server, 10).await.unwrap_err();
        assert!(matches!(err, LatticeError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn eof_before_header_is_clean() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tcp_transport_round_trips_against_an_echo_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES)
                .await
                .unwrap()
                .unwrap();
            let request: Request = serde_json::from_slice(&frame).unwrap();
            assert_eq!(request.op, Op::Get);
            let response = Response::status(request.op_id, Status::NotFound);
            let payload = serde_json::to_vec(&response).unwrap();
            write_frame(&mut stream, &payload, DEFAULT_MAX_FRAME_BYTES)
                .await
                .unwrap();
        });

        let transport = TcpTransport::new(Duration::from_secs(2));
        let response = transport
            .send(&addr, Request::get(9, 1, b"k".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.op_id, 9);
        assert_eq!(response.status, Status::NotFound);
    }

    #[tokio::test]
    async fn unreachable_peer_surfaces_io_error() {
        let transport = TcpTransport::new(Duration::from_millis(500));
        let outcome = transport
            .send("127.0.0.1:1", Request::get(1, 1, b"k".to_vec()))
            .await;
        assert!(matches!(
            outcome,
            Err(LatticeError::Io(_)) | Err(LatticeError::Timeout)
        ));
    }
}
