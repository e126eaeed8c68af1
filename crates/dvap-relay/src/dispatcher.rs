//! The dispatcher: sole owner of the client registry.
//!
//! Every other task talks to it through [`Command`] messages, so registry
//! reads and writes are strictly sequential and need no locks. The
//! dispatcher never awaits a client's queue: fan-out uses `try_send` and a
//! full queue is resolved by the configured [`OverflowPolicy`].

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use dvap_core::transport::Transport;
use dvap_protocol::frame::Frame;
use dvap_protocol::gmsk::{self, FrameKind};

use crate::client;
use crate::config::{OverflowPolicy, RelayConfig};

/// A connected client as reported by [`RelayHandle::roster`](crate::RelayHandle::roster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Connection identity, normally the remote address.
    pub id: String,
    /// `mycall` from the client's last voice header, space padding included.
    pub callsign: Option<String>,
}

/// Messages handled by the dispatcher.
pub(crate) enum Command {
    Join(Box<dyn Transport>),
    Data { id: String, frame: Frame },
    Disconnect { id: String },
    Roster(oneshot::Sender<Vec<ClientInfo>>),
    Resolve {
        callsign: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

struct Client {
    callsign: Option<String>,
    queue: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

pub(crate) struct Dispatcher {
    clients: HashMap<String, Client>,
    /// Reverse map: callsign -> client id.
    callsigns: HashMap<String, String>,
    commands: mpsc::Sender<Command>,
    log: Option<File>,
    queue_capacity: usize,
    overflow: OverflowPolicy,
    max_frame_len: usize,
    debug: bool,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// `commands` is the sender half of the dispatcher's own inbox; client
    /// read tasks get clones of it.
    pub(crate) fn new(
        config: &RelayConfig,
        commands: mpsc::Sender<Command>,
        log: Option<File>,
        shutdown: CancellationToken,
    ) -> Self {
        Dispatcher {
            clients: HashMap::new(),
            callsigns: HashMap::new(),
            commands,
            log,
            queue_capacity: config.queue_capacity,
            overflow: config.overflow,
            max_frame_len: config.max_frame_len,
            debug: config.debug,
            shutdown,
        }
    }

    /// Process commands until shutdown.
    pub(crate) async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        loop {
            let command = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                c = inbox.recv() => match c {
                    Some(c) => c,
                    None => break,
                },
            };

            match command {
                Command::Join(transport) => self.join(transport),
                Command::Data { id, frame } => self.handle_data(&id, frame).await,
                Command::Disconnect { id } => self.disconnect(&id),
                Command::Roster(reply) => {
                    let _ = reply.send(self.roster());
                }
                Command::Resolve { callsign, reply } => {
                    let _ = reply.send(self.resolve(&callsign));
                }
            }
        }

        for client in self.clients.values() {
            client.cancel.cancel();
        }
        if let Some(log) = self.log.as_mut() {
            let _ = log.flush().await;
        }
        info!(clients = self.clients.len(), "dispatcher stopped");
    }

    fn join(&mut self, transport: Box<dyn Transport>) {
        let id = self.unique_id(transport.peer());
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let cancel = self.shutdown.child_token();
        let (reader, writer) = transport.split();

        tokio::spawn(client::read_loop(
            id.clone(),
            reader,
            self.max_frame_len,
            self.commands.clone(),
            cancel.clone(),
        ));
        tokio::spawn(client::write_loop(id.clone(), writer, queue_rx, cancel.clone()));

        self.register(id.clone(), queue_tx, cancel);
        info!(peer = %id, "client connected");
        self.log_roster();
    }

    fn register(&mut self, id: String, queue: mpsc::Sender<Bytes>, cancel: CancellationToken) {
        self.clients.insert(
            id,
            Client {
                callsign: None,
                queue,
                cancel,
            },
        );
    }

    /// Ids are remote addresses; an in-memory transport may reuse a label.
    fn unique_id(&self, peer: &str) -> String {
        if !self.clients.contains_key(peer) {
            return peer.to_string();
        }
        (2..)
            .map(|n| format!("{peer}#{n}"))
            .find(|candidate| !self.clients.contains_key(candidate))
            .unwrap_or_else(|| peer.to_string())
    }

    fn disconnect(&mut self, id: &str) {
        // Dropping the queue sender lets the write task drain what is queued.
        let Some(client) = self.clients.remove(id) else {
            debug!(peer = %id, "disconnect for unknown client ignored");
            return;
        };
        if let Some(callsign) = client.callsign {
            if self.callsigns.get(&callsign).is_some_and(|owner| owner == id) {
                self.callsigns.remove(&callsign);
            }
        }
        info!(peer = %id, "client disconnected");
        self.log_roster();
    }

    async fn handle_data(&mut self, id: &str, frame: Frame) {
        trace!(peer = %id, data = ?frame.as_bytes(), "relaying frame");
        match gmsk::classify(frame.as_bytes()) {
            FrameKind::VoiceHeader(header) => {
                debug!(
                    peer = %id,
                    stream_id = header.stream_id,
                    frame_pos = header.frame_pos,
                    seq = header.seq,
                    rpt1 = %header.rpt1,
                    rpt2 = %header.rpt2,
                    urcall = %header.urcall,
                    mycall = %header.mycall,
                    "voice header"
                );
                self.learn_callsign(id, &header.mycall);
                if self.debug && !header.is_general_call() {
                    info!(
                        peer = %id,
                        mycall = %header.mycall,
                        urcall = %header.urcall,
                        "non-CQ voice header"
                    );
                }
            }
            FrameKind::DataFrame(data) => {
                trace!(peer = %id, stream_id = data.stream_id, seq = data.seq, "voice data");
            }
            FrameKind::Unknown(marker) => {
                trace!(peer = %id, marker = ?marker, "unclassified frame");
            }
        }

        let bytes = frame.into_bytes();
        self.broadcast(id, &bytes);
        self.append_to_log(&bytes).await;
    }

    /// Record `mycall` verbatim as the sender's callsign.
    fn learn_callsign(&mut self, id: &str, mycall: &str) {
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };
        if client.callsign.as_deref() == Some(mycall) {
            return;
        }
        if let Some(previous) = client.callsign.replace(mycall.to_string()) {
            if self.callsigns.get(&previous).is_some_and(|owner| owner == id) {
                self.callsigns.remove(&previous);
            }
        }
        self.callsigns.insert(mycall.to_string(), id.to_string());
        info!(peer = %id, callsign = %mycall.trim_end(), "callsign learned");
    }

    /// Exact match first, then ignoring trailing padding on both sides.
    fn resolve(&self, callsign: &str) -> Option<String> {
        if let Some(id) = self.callsigns.get(callsign) {
            return Some(id.clone());
        }
        let wanted = callsign.trim_end();
        self.callsigns
            .iter()
            .find(|(known, _)| known.trim_end() == wanted)
            .map(|(_, id)| id.clone())
    }

    /// Queue `bytes` for every client except `sender`. Returns how many
    /// clients accepted the frame.
    fn broadcast(&self, sender: &str, bytes: &Bytes) -> usize {
        let mut delivered = 0;
        for (id, client) in &self.clients {
            if id == sender || client.cancel.is_cancelled() {
                continue;
            }
            match client.queue.try_send(bytes.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => match self.overflow {
                    OverflowPolicy::Drop => {
                        warn!(peer = %id, "client queue full, frame dropped");
                    }
                    OverflowPolicy::Disconnect => {
                        warn!(peer = %id, "client queue full, disconnecting slow client");
                        client.cancel.cancel();
                    }
                },
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(peer = %id, "client queue closed");
                }
            }
        }
        delivered
    }

    async fn append_to_log(&mut self, bytes: &[u8]) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let result = async {
            log.write_all(bytes).await?;
            log.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "frame log write failed");
        }
    }

    fn roster(&self) -> Vec<ClientInfo> {
        let mut roster: Vec<ClientInfo> = self
            .clients
            .iter()
            .map(|(id, client)| ClientInfo {
                id: id.clone(),
                callsign: client.callsign.clone(),
            })
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        roster
    }

    fn log_roster(&self) {
        let roster = self.roster();
        if roster.is_empty() {
            info!("clients: none");
            return;
        }
        for entry in roster {
            match entry.callsign {
                Some(callsign) => {
                    info!(peer = %entry.id, callsign = %callsign.trim_end(), "client")
                }
                None => info!(peer = %entry.id, "client"),
            }
        }
    }
}

/// Open the frame log for appending, creating it if needed.
pub(crate) async fn open_log(path: &Path) -> std::io::Result<File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}
