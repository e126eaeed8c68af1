//! RelayServer -- TCP accept loop in front of the dispatcher.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dvap_core::error::{Error, Result};
use dvap_core::transport::Transport;
use dvap_transport::TcpTransport;

use crate::config::RelayConfig;
use crate::dispatcher::{ClientInfo, Command, Dispatcher, open_log};

/// Depth of the dispatcher's inbox.
const INBOX_DEPTH: usize = 1024;

/// Cloneable handle for talking to a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl RelayHandle {
    /// Add a connected peer. The relay owns the transport from here on.
    pub async fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        self.commands
            .send(Command::Join(transport))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// The connected clients, sorted by id.
    pub async fn roster(&self) -> Result<Vec<ClientInfo>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Roster(reply))
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    /// The id of the client that last announced `callsign` in a voice
    /// header. Trailing padding is ignored.
    pub async fn resolve_callsign(&self, callsign: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Resolve {
                callsign: callsign.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    /// Stop accepting, disconnect every client and stop the dispatcher.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// A bound relay.
///
/// The dispatcher starts at [`bind`](RelayServer::bind), so peers can be
/// attached through the [`handle`](RelayServer::handle) before or without
/// [`run`](RelayServer::run).
pub struct RelayServer {
    listener: TcpListener,
    handle: RelayHandle,
    dispatcher: JoinHandle<()>,
}

impl RelayServer {
    /// Validate `config`, open the frame log if one is configured, bind the
    /// listener and start the dispatcher.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;

        let log = match &config.log_file {
            Some(path) => {
                let file = open_log(path).await.map_err(|e| {
                    Error::Transport(format!("failed to open frame log {}: {}", path.display(), e))
                })?;
                info!(path = %path.display(), "logging relayed frames");
                Some(file)
            }
            None => None,
        };

        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            Error::Transport(format!("failed to bind {}: {}", config.listen_addr, e))
        })?;

        let shutdown = CancellationToken::new();
        let (commands, inbox) = mpsc::channel(INBOX_DEPTH);
        let dispatcher = Dispatcher::new(&config, commands.clone(), log, shutdown.clone());
        let dispatcher = tokio::spawn(dispatcher.run(inbox));

        Ok(RelayServer {
            listener,
            handle: RelayHandle { commands, shutdown },
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Io)
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Accept connections until [`RelayHandle::shutdown`] is called.
    ///
    /// Accept errors are logged and the loop continues.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.handle.shutdown.clone();
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "relay listening");
        }

        loop {
            let accepted = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                a = self.listener.accept() => a,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let transport = TcpTransport::from_stream(stream, addr.to_string());
                    if self.handle.attach(Box::new(transport)).await.is_err() {
                        warn!("dispatcher stopped, closing listener");
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }

        shutdown.cancel();
        let _ = self.dispatcher.await;
        info!("relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvap_core::transport::send_all;
    use dvap_protocol::codes::marker;
    use dvap_protocol::frame::read_frame;
    use dvap_test_harness::TestPeer;
    use std::time::Duration;

    const QUIET: Duration = Duration::from_millis(100);
    const WAIT: Duration = Duration::from_secs(2);

    fn local_config() -> RelayConfig {
        RelayConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..RelayConfig::default()
        }
    }

    fn voice_header(mycall: &[u8; 8]) -> Vec<u8> {
        let mut raw = vec![0u8; 47];
        raw[..2].copy_from_slice(&marker::GMSK_HEADER.to_le_bytes());
        raw[25..33].copy_from_slice(b"CQCQCQ  ");
        raw[33..41].copy_from_slice(mycall);
        raw
    }

    fn voice_data(seq: u8) -> Vec<u8> {
        let mut raw = vec![0u8; 18];
        raw[..2].copy_from_slice(&marker::GMSK_DATA.to_le_bytes());
        raw[5] = seq;
        raw
    }

    async fn wait_for_clients(handle: &RelayHandle, n: usize) -> Vec<ClientInfo> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let roster = handle.roster().await.unwrap();
            if roster.len() == n || tokio::time::Instant::now() > deadline {
                return roster;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn attach(handle: &RelayHandle, name: &str) -> TestPeer {
        let (transport, peer) = TestPeer::pair(name);
        handle.attach(transport).await.unwrap();
        peer
    }

    #[tokio::test]
    async fn frames_reach_everyone_but_the_sender() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let handle = server.handle();
        let mut a = attach(&handle, "A").await;
        let mut b = attach(&handle, "B").await;
        let mut c = attach(&handle, "C").await;

        let frame = voice_data(1);
        a.send(&frame).await.unwrap();

        assert_eq!(b.recv().await.unwrap().as_bytes(), &frame[..]);
        assert_eq!(c.recv().await.unwrap().as_bytes(), &frame[..]);
        assert!(a.recv_timeout(QUIET).await.is_none());
        handle.shutdown();
    }

    #[tokio::test]
    async fn frames_from_one_client_keep_their_order() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let handle = server.handle();
        let mut a = attach(&handle, "A").await;
        let mut b = attach(&handle, "B").await;

        for seq in 0..10 {
            a.send(&voice_data(seq)).await.unwrap();
        }
        for seq in 0..10 {
            assert_eq!(b.recv().await.unwrap().as_bytes()[5], seq);
        }
        handle.shutdown();
    }

    #[tokio::test]
    async fn disconnect_removes_client_and_callsign() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let handle = server.handle();
        let mut a = attach(&handle, "A").await;
        let mut b = attach(&handle, "B").await;
        a.send(&voice_header(b"N0CALL  ")).await.unwrap();
        // B seeing the header means the dispatcher has processed it.
        b.recv().await.unwrap();

        assert_eq!(
            handle.resolve_callsign("N0CALL  ").await.unwrap().as_deref(),
            Some("A")
        );
        assert_eq!(
            handle.resolve_callsign("N0CALL").await.unwrap().as_deref(),
            Some("A")
        );
        let roster = handle.roster().await.unwrap();
        assert!(roster.iter().any(|c| c.id == "A" && c.callsign.as_deref() == Some("N0CALL  ")));

        a.close().await;
        let roster = wait_for_clients(&handle, 1).await;
        assert!(roster.iter().all(|c| c.id != "A"));
        assert_eq!(handle.resolve_callsign("N0CALL  ").await.unwrap(), None);
        handle.shutdown();
    }

    #[tokio::test]
    async fn half_closed_client_still_receives_queued_frames() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let handle = server.handle();
        let mut a = attach(&handle, "A").await;
        let mut b = attach(&handle, "B").await;
        let mut c = attach(&handle, "C").await;

        for seq in 0..5 {
            b.send(&voice_data(seq)).await.unwrap();
        }
        for _ in 0..5 {
            c.recv().await.unwrap();
        }
        a.shutdown_send().await.unwrap();

        for seq in 0..5 {
            assert_eq!(a.recv().await.unwrap().as_bytes()[5], seq);
        }
        a.expect_closed(WAIT).await.unwrap();
        let roster = wait_for_clients(&handle, 2).await;
        assert!(roster.iter().all(|c| c.id != "A"));
        handle.shutdown();
    }

    #[tokio::test]
    async fn oversized_frame_disconnects_only_its_sender() {
        let config = RelayConfig {
            max_frame_len: 64,
            ..local_config()
        };
        let server = RelayServer::bind(config).await.unwrap();
        let handle = server.handle();
        let mut a = attach(&handle, "A").await;
        let mut b = attach(&handle, "B").await;
        let mut c = attach(&handle, "C").await;

        // Header declaring 200 bytes.
        a.send(&[0xC8, 0x80]).await.unwrap();
        a.expect_closed(WAIT).await.unwrap();

        let roster = wait_for_clients(&handle, 2).await;
        assert_eq!(
            roster.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["B", "C"]
        );

        let frame = voice_data(7);
        c.send(&frame).await.unwrap();
        assert_eq!(b.recv().await.unwrap().as_bytes(), &frame[..]);
        handle.shutdown();
    }

    #[tokio::test]
    async fn log_file_collects_relayed_frames() {
        let path = std::env::temp_dir().join(format!("dvap-relay-server-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let config = RelayConfig {
            log_file: Some(path.clone()),
            ..local_config()
        };
        let server = RelayServer::bind(config).await.unwrap();
        let handle = server.handle();
        let mut a = attach(&handle, "A").await;
        let mut b = attach(&handle, "B").await;

        let frame = voice_data(3);
        a.send(&frame).await.unwrap();
        b.recv().await.unwrap();
        // The log write follows the fan-out; a roster round trip orders after it.
        handle.roster().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), frame);
        handle.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = RelayConfig {
            queue_capacity: 0,
            ..local_config()
        };
        assert!(matches!(
            RelayServer::bind(config).await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn relays_between_tcp_clients() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let handle = server.handle();
        let run = tokio::spawn(server.run());

        let first: Box<dyn Transport> = Box::new(TcpTransport::connect(&addr).await.unwrap());
        let second: Box<dyn Transport> = Box::new(TcpTransport::connect(&addr).await.unwrap());
        assert_eq!(wait_for_clients(&handle, 2).await.len(), 2);

        let (_r1, mut w1) = first.split();
        let (mut r2, _w2) = second.split();
        let frame = voice_header(b"W1AW    ");
        send_all(w1.as_mut(), &frame).await.unwrap();
        let got = read_frame(r2.as_mut()).await.unwrap();
        assert_eq!(got.as_bytes(), &frame[..]);

        handle.shutdown();
        run.await.unwrap().unwrap();
        assert!(matches!(
            read_frame(r2.as_mut()).await,
            Err(Error::Disconnected) | Err(Error::ConnectionLost)
        ));
    }
}
