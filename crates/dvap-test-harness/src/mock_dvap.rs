//! Scripted DVAP simulator for testing device sessions without hardware.
//!
//! [`MockDvap`] sits on the far end of an in-memory pipe. It reads the
//! frames a session writes, answers each expected request with a scripted
//! response (optionally after a delay), counts keepalives, and can inject
//! unsolicited frames at any time.
//!
//! # Example
//!
//! ```
//! use dvap_test_harness::MockDvap;
//!
//! let mut mock = MockDvap::new();
//! // Name request -> name response.
//! mock.expect(&[0x04, 0x20, 0x01, 0x00], &[0x08, 0x00, 0x01, 0x00, b'D', b'V', b'A', b'P']);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dvap_core::transport::{Transport, TransportReader, TransportWriter};
use dvap_protocol::frame::{read_frame, write_frame};
use dvap_transport::StreamTransport;

/// The 3-byte link keepalive a session writes when idle.
const KEEPALIVE: [u8; 3] = [0x03, 0x60, 0x00];

/// One scripted exchange.
#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    /// `None` leaves the request unanswered.
    response: Option<Vec<u8>>,
    delay: Duration,
}

/// Something the mock observed or did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A non-keepalive frame written by the session.
    Received(Bytes),
    /// A frame the mock wrote to the session.
    Sent(Bytes),
    /// A frame that did not match the next expectation.
    Unexpected(Bytes),
}

/// Builder for a scripted DVAP.
#[derive(Debug, Default)]
pub struct MockDvap {
    expectations: VecDeque<Expectation>,
}

impl MockDvap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `request` with `response` immediately.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) -> &mut Self {
        self.expect_delayed(request, response, Duration::ZERO)
    }

    /// Answer `request` with `response` after `delay`.
    ///
    /// The mock keeps reading while the answer is pending, so a request
    /// that arrives early is still observed at its true arrival time.
    pub fn expect_delayed(&mut self, request: &[u8], response: &[u8], delay: Duration) -> &mut Self {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: Some(response.to_vec()),
            delay,
        });
        self
    }

    /// Accept `request` but never answer it.
    pub fn expect_no_response(&mut self, request: &[u8]) -> &mut Self {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: None,
            delay: Duration::ZERO,
        });
        self
    }

    /// Start the simulator. Returns the session-side transport and a handle.
    pub fn spawn(self) -> (Box<dyn Transport>, MockDvapHandle) {
        let (ours, theirs) = tokio::io::duplex(16 * 1024);
        let (reader, writer) = Box::new(StreamTransport::new(ours, "mock-dvap")).split();
        let (inject_tx, inject_rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(MockState::default()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            reader,
            writer,
            self.expectations,
            inject_tx.clone(),
            inject_rx,
            Arc::clone(&state),
            cancel.clone(),
        ));

        let handle = MockDvapHandle {
            inject_tx,
            state,
            cancel,
            task,
        };
        (Box::new(StreamTransport::new(theirs, "dvap-under-test")), handle)
    }
}

#[derive(Debug, Default)]
struct MockState {
    log: Vec<MockEvent>,
    keepalives: usize,
    remaining: usize,
}

/// Handle to a running [`MockDvap`].
pub struct MockDvapHandle {
    inject_tx: mpsc::Sender<Bytes>,
    state: Arc<Mutex<MockState>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MockDvapHandle {
    /// Write an arbitrary frame (e.g. unsolicited or data) to the session.
    pub async fn inject(&self, frame: &[u8]) {
        let _ = self.inject_tx.send(Bytes::copy_from_slice(frame)).await;
    }

    /// Everything observed so far, in order.
    pub fn log(&self) -> Vec<MockEvent> {
        self.lock().log.clone()
    }

    /// Frames received from the session, keepalives excluded.
    pub fn received(&self) -> Vec<Bytes> {
        self.lock()
            .log
            .iter()
            .filter_map(|e| match e {
                MockEvent::Received(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of keepalives received.
    pub fn keepalives(&self) -> usize {
        self.lock().keepalives
    }

    /// Number of scripted exchanges not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().remaining
    }

    /// Whether any received frame failed to match the script.
    pub fn has_unexpected(&self) -> bool {
        self.lock()
            .log
            .iter()
            .any(|e| matches!(e, MockEvent::Unexpected(_)))
    }

    /// Drop the simulator's end of the link; the session sees EOF.
    pub async fn disconnect(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn run(
    mut reader: Box<dyn TransportReader>,
    mut writer: Box<dyn TransportWriter>,
    mut expectations: VecDeque<Expectation>,
    inject_tx: mpsc::Sender<Bytes>,
    mut inject_rx: mpsc::Receiver<Bytes>,
    state: Arc<Mutex<MockState>>,
    cancel: CancellationToken,
) {
    let total = expectations.len();
    with_state(&state, |s| s.remaining = total);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(out) = inject_rx.recv() => {
                if write_frame(writer.as_mut(), &out).await.is_err() {
                    break;
                }
                with_state(&state, |s| s.log.push(MockEvent::Sent(out.clone())));
            }

            frame = read_frame(reader.as_mut()) => {
                let Ok(frame) = frame else { break };
                let bytes = frame.into_bytes();
                if bytes[..] == KEEPALIVE {
                    with_state(&state, |s| s.keepalives += 1);
                    continue;
                }
                with_state(&state, |s| s.log.push(MockEvent::Received(bytes.clone())));

                let matches = expectations
                    .front()
                    .is_some_and(|exp| exp.request[..] == bytes[..]);
                if !matches {
                    tracing::warn!(data = ?&bytes[..], "mock DVAP: unexpected frame");
                    with_state(&state, |s| s.log.push(MockEvent::Unexpected(bytes.clone())));
                    continue;
                }
                let Some(exp) = expectations.pop_front() else { continue };
                let remaining = expectations.len();
                with_state(&state, |s| s.remaining = remaining);

                if let Some(response) = exp.response {
                    let response = Bytes::from(response);
                    if exp.delay.is_zero() {
                        let _ = inject_tx.send(response).await;
                    } else {
                        let tx = inject_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(exp.delay).await;
                            let _ = tx.send(response).await;
                        });
                    }
                }
            }
        }
    }

    let _ = writer.close().await;
}

fn with_state(state: &Mutex<MockState>, f: impl FnOnce(&mut MockState)) {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvap_core::transport::send_all;

    #[tokio::test]
    async fn answers_scripted_request() {
        let mut mock = MockDvap::new();
        mock.expect(&[0x04, 0x20, 0x05, 0x00], &[0x05, 0x00, 0x05, 0x00, 0x01]);
        let (transport, handle) = mock.spawn();
        let (mut reader, mut writer) = transport.split();

        send_all(writer.as_mut(), &[0x04, 0x20, 0x05, 0x00]).await.unwrap();
        let frame = read_frame(reader.as_mut()).await.unwrap();
        assert_eq!(frame.as_bytes(), &[0x05, 0x00, 0x05, 0x00, 0x01]);
        assert_eq!(handle.remaining_expectations(), 0);
        assert!(!handle.has_unexpected());
    }

    #[tokio::test]
    async fn counts_keepalives_and_flags_unexpected() {
        let (transport, handle) = MockDvap::new().spawn();
        let (_reader, mut writer) = transport.split();

        send_all(writer.as_mut(), &KEEPALIVE).await.unwrap();
        send_all(writer.as_mut(), &[0x02, 0x60]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.keepalives(), 1);
        assert!(handle.has_unexpected());
    }

    #[tokio::test]
    async fn inject_and_disconnect() {
        let (transport, handle) = MockDvap::new().spawn();
        let (mut reader, _writer) = transport.split();

        handle.inject(&[0x05, 0x20, 0x18, 0x01, 0x01]).await;
        let frame = read_frame(reader.as_mut()).await.unwrap();
        assert_eq!(frame.frame_type(), 1);

        handle.disconnect().await;
        assert!(read_frame(reader.as_mut()).await.is_err());
    }
}
