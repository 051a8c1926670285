// crates/deskrelay-stabilizer/src/relay.rs
// ============================================================================
// Module: Byte Relay
// Description: TCP listener that pipes each connection to a fixed target.
// Purpose: Carry guest traffic from a logical address to the real service.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`ByteRelay`] accepts connections on its listen address and copies bytes
//! in both directions to the target. A connection whose target is
//! unreachable, or does not answer within the connect timeout, is dropped;
//! the listener keeps serving. Pipes belong to the relay that accepted them
//! and are aborted when [`ByteRelay::serve`] returns, so a stopped relay
//! leaves no open connections behind. The accept loop ends with an error only
//! when the listener itself fails, which the supervisor treats as a crash.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::StabilizerError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default bound on connecting to the target.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Relay
// ============================================================================

/// Bound relay listener.
#[derive(Debug)]
pub struct ByteRelay {
    /// Listening socket.
    listener: TcpListener,
    /// Forwarding target.
    target: SocketAddr,
    /// Bound on each connect to the target.
    connect_timeout: Duration,
}

impl ByteRelay {
    /// Binds a relay on `listen` forwarding to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError::Relay`] when the address cannot be bound.
    pub async fn bind(listen: SocketAddr, target: SocketAddr) -> Result<Self, StabilizerError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|err| StabilizerError::Relay(format!("bind {listen} failed: {err}")))?;
        Ok(Self {
            listener,
            target,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Replaces the target connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError::Relay`] when the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr, StabilizerError> {
        self.listener.local_addr().map_err(|err| StabilizerError::Relay(err.to_string()))
    }

    /// Serves until `shutdown` flips to true or the listener fails.
    ///
    /// Open pipes are aborted before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError::Relay`] when accepting fails.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StabilizerError> {
        let mut pipes = JoinSet::new();
        let outcome = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                Some(_) = pipes.join_next(), if !pipes.is_empty() => {}
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((inbound, _)) => {
                            pipes.spawn(pipe(inbound, self.target, self.connect_timeout));
                        }
                        Err(err) => break Err(StabilizerError::Relay(format!("accept failed: {err}"))),
                    }
                }
            }
        };
        pipes.shutdown().await;
        outcome
    }
}

/// Copies bytes between a client and the target until either side closes.
async fn pipe(mut inbound: TcpStream, target: SocketAddr, connect_timeout: Duration) {
    let Ok(Ok(mut outbound)) = tokio::time::timeout(connect_timeout, TcpStream::connect(target)).await else {
        return;
    };
    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn relays_bytes_both_ways() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut buf = [0_u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let relay = ByteRelay::bind("127.0.0.1:0".parse().unwrap(), target).await.unwrap();
        let listen = relay.local_addr().unwrap();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(relay.serve(shutdown));

        let mut client = TcpStream::connect(listen).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut echoed = [0_u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");

        stop.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_closes_open_connections() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut buf = [0_u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
            let _ = socket.read(&mut buf).await;
        });

        let relay = ByteRelay::bind("127.0.0.1:0".parse().unwrap(), target)
            .await
            .unwrap()
            .with_connect_timeout(Duration::from_secs(1));
        let listen = relay.local_addr().unwrap();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(relay.serve(shutdown));

        let mut client = TcpStream::connect(listen).await.unwrap();
        client.write_all(b"hi").await.unwrap();
        let mut echoed = [0_u8; 2];
        client.read_exact(&mut echoed).await.unwrap();

        stop.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
        let mut rest = [0_u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut rest)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn unreachable_target_drops_only_that_connection() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = closed.local_addr().unwrap();
        drop(closed);

        let relay = ByteRelay::bind("127.0.0.1:0".parse().unwrap(), target).await.unwrap();
        let listen = relay.local_addr().unwrap();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(relay.serve(shutdown));

        for _ in 0..2 {
            let mut client = TcpStream::connect(listen).await.unwrap();
            let mut rest = [0_u8; 1];
            let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut rest)).await.unwrap();
            assert!(matches!(read, Ok(0) | Err(_)));
        }

        stop.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
