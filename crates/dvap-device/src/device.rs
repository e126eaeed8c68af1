//! DvapDevice -- control API of a DVAP session.
//!
//! The DVAP protocol carries no request id: a control response is matched
//! to its request only by position. [`DvapDevice`] therefore serializes all
//! control operations behind one async mutex that owns the single-slot
//! response channel for the whole send-then-await exchange. Data frames
//! ([`DvapDevice::transmit`]) bypass the mutex.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use dvap_core::error::{Error, Result};
use dvap_core::transport::Transport;
use dvap_protocol::codes::item;
use dvap_protocol::frame::Frame;

use crate::commands::{
    self, BandScan, DeviceStatus, LedControl, Modulation, OperationMode, RunState,
    VersionSelector,
};
use crate::events::DeviceEvent;
use crate::io::{DeviceIo, IoConfig, spawn_io_tasks};

/// An open session with a DVAP.
///
/// Created by [`DvapBuilder`](crate::builder::DvapBuilder). Dropping the
/// device cancels its IO tasks; [`close()`](DvapDevice::close) does the same
/// and waits for them to finish.
pub struct DvapDevice {
    io: DeviceIo,
    responses: Mutex<mpsc::Receiver<Frame>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    response_timeout: Duration,
    peer: String,
}

impl Drop for DvapDevice {
    fn drop(&mut self) {
        self.io.cancel.cancel();
        // A serial read stuck below the cancellation point still ends here.
        self.io.recv_task.abort();
    }
}

impl DvapDevice {
    /// Start a session on `transport`.
    ///
    /// Called by the builder; callers should use the builder API instead.
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        keepalive_interval: Duration,
        response_timeout: Duration,
        event_capacity: usize,
    ) -> Self {
        let peer = transport.peer().to_string();
        let (event_tx, _) = broadcast::channel(event_capacity);
        let (response_tx, response_rx) = mpsc::channel(1);
        let io = spawn_io_tasks(
            transport,
            IoConfig {
                keepalive_interval,
                queue_depth: 32,
            },
            event_tx.clone(),
            response_tx,
        );
        info!(peer = %peer, "DVAP session started");
        DvapDevice {
            io,
            responses: Mutex::new(response_rx),
            event_tx,
            response_timeout,
            peer,
        }
    }

    /// The port or address this session is attached to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether the IO tasks are still running.
    pub fn is_open(&self) -> bool {
        !self.io.cancel.is_cancelled()
    }

    /// Subscribe to unsolicited events and received data frames.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Write a control request and wait for the next control response.
    async fn exchange(&self, request: Bytes) -> Result<Frame> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        let mut responses = self.responses.lock().await;

        // A response that arrived after its caller timed out must not be
        // taken as the answer to this request.
        while let Ok(stale) = responses.try_recv() {
            warn!(
                peer = %self.peer,
                item = ?stale.control_item(),
                "discarding stale control response"
            );
        }

        // Every request is built by encode_control: header, then item code.
        let requested = u16::from_le_bytes([request[2], request[3]]);
        debug!(peer = %self.peer, item = requested, bytes = request.len(), "control request");
        self.io.write(request).await?;

        let frame = match tokio::time::timeout(self.response_timeout, responses.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(Error::NotConnected),
            Err(_) => {
                warn!(peer = %self.peer, item = requested, "control response timed out");
                return Err(Error::Timeout);
            }
        };

        if frame.control_item() != Some(requested) {
            warn!(
                peer = %self.peer,
                requested,
                received = ?frame.control_item(),
                "response item does not match request"
            );
        }
        Ok(frame)
    }

    // -----------------------------------------------------------------
    // Identification and status
    // -----------------------------------------------------------------

    pub async fn name(&self) -> Result<String> {
        let frame = self.exchange(commands::request_item(item::TARGET_NAME)?).await?;
        commands::parse_text(&frame)
    }

    pub async fn serial(&self) -> Result<String> {
        let frame = self.exchange(commands::request_item(item::TARGET_SERIAL)?).await?;
        commands::parse_text(&frame)
    }

    pub async fn interface_version(&self) -> Result<f32> {
        let frame = self.exchange(commands::request_item(item::IFACE_VERSION)?).await?;
        commands::parse_interface_version(&frame)
    }

    pub async fn hardware_version(&self, selector: VersionSelector) -> Result<f32> {
        let frame = self
            .exchange(commands::request_hardware_version(selector)?)
            .await?;
        commands::parse_hardware_version(&frame)
    }

    /// Bootcode and firmware versions, queried one after the other.
    pub async fn firmware_versions(&self) -> Result<(f32, f32)> {
        let bootcode = self.hardware_version(VersionSelector::Bootcode).await?;
        let firmware = self.hardware_version(VersionSelector::Firmware).await?;
        Ok((bootcode, firmware))
    }

    pub async fn status(&self) -> Result<DeviceStatus> {
        let frame = self.exchange(commands::request_item(item::STATUS)?).await?;
        commands::parse_status(&frame)
    }

    // -----------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------

    pub async fn set_run_state(&self, state: RunState) -> Result<()> {
        self.exchange(commands::set_run_state(state)?).await?;
        Ok(())
    }

    /// Put the receiver in the run state.
    pub async fn start(&self) -> Result<()> {
        self.set_run_state(RunState::Run).await?;
        info!(peer = %self.peer, "DVAP running");
        Ok(())
    }

    /// Stop the receiver. The session stays open.
    pub async fn stop(&self) -> Result<()> {
        self.set_run_state(RunState::Stop).await?;
        info!(peer = %self.peer, "DVAP stopped");
        Ok(())
    }

    /// Select FM or GMSK. The DVAP accepts this only while stopped.
    pub async fn set_modulation(&self, modulation: Modulation) -> Result<()> {
        self.exchange(commands::set_modulation(modulation)?).await?;
        Ok(())
    }

    pub async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.exchange(commands::set_operation_mode(mode)?).await?;
        Ok(())
    }

    pub async fn set_external_tr_control(&self, mode: u8) -> Result<()> {
        self.exchange(commands::set_external_tr_control(mode)?).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // RF settings
    // -----------------------------------------------------------------

    /// Set the squelch threshold, clamped to -128..=-45 dBm.
    pub async fn set_squelch_threshold(&self, dbm: i32) -> Result<()> {
        warn_if_clamped(&self.peer, "squelch threshold", dbm, commands::clamp_squelch(dbm).into());
        self.exchange(commands::set_squelch_threshold(dbm)?).await?;
        Ok(())
    }

    /// Let the DVAP drive its own LEDs.
    pub async fn set_led_control_dvap(&self) -> Result<()> {
        self.exchange(commands::set_led_control(LedControl::Dvap)?)
            .await?;
        Ok(())
    }

    /// Drive the LEDs from the host; each intensity is clamped to 0..=100.
    pub async fn set_led_control_host(&self, yellow: i32, red: i32, green: i32) -> Result<()> {
        let led = LedControl::host(yellow, red, green);
        if let LedControl::Host { yellow: y, red: r, green: g } = led {
            warn_if_clamped(&self.peer, "yellow LED", yellow, y.into());
            warn_if_clamped(&self.peer, "red LED", red, r.into());
            warn_if_clamped(&self.peer, "green LED", green, g.into());
        }
        self.exchange(commands::set_led_control(led)?).await?;
        Ok(())
    }

    pub async fn set_rx_frequency(&self, hz: u32) -> Result<()> {
        self.exchange(commands::set_rx_frequency(hz)?).await?;
        Ok(())
    }

    pub async fn set_tx_frequency(&self, hz: u32) -> Result<()> {
        self.exchange(commands::set_tx_frequency(hz)?).await?;
        Ok(())
    }

    pub async fn set_rx_tx_frequency(&self, hz: u32) -> Result<()> {
        self.exchange(commands::set_rx_tx_frequency(hz)?).await?;
        Ok(())
    }

    /// The TX frequency range the DVAP accepts, as `(lower_hz, upper_hz)`.
    pub async fn tx_frequency_limits(&self) -> Result<(u32, u32)> {
        let frame = self.exchange(commands::request_item(item::TX_FREQ_LIMITS)?).await?;
        commands::parse_tx_frequency_limits(&frame)
    }

    /// Set the TX power, clamped to -12..=10 dBm.
    pub async fn set_tx_power(&self, dbm: i32) -> Result<()> {
        warn_if_clamped(&self.peer, "TX power", dbm, commands::clamp_tx_power(dbm).into());
        self.exchange(commands::set_tx_power(dbm)?).await?;
        Ok(())
    }

    /// Run a band scan and return one raw RSSI byte per step.
    ///
    /// Parameters are clamped; see [`BandScan::new`].
    pub async fn band_scan(&self, steps: u16, stride: u8, start_hz: u32) -> Result<Vec<u8>> {
        let scan = BandScan::new(steps, stride, start_hz);
        warn_if_clamped(&self.peer, "scan steps", steps.into(), scan.steps.into());
        warn_if_clamped(&self.peer, "scan stride", stride.into(), scan.stride.into());
        if scan.start_hz != start_hz {
            warn!(
                peer = %self.peer,
                requested = start_hz,
                applied = scan.start_hz,
                "scan start clamped"
            );
        }
        let frame = self.exchange(commands::request_band_scan(&scan)?).await?;
        commands::parse_band_scan(&frame)
    }

    // -----------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------

    /// Queue an already-encoded data frame (e.g. GMSK voice) for transmit.
    ///
    /// Returns once the frame has been written to the link.
    pub async fn transmit(&self, frame: &Frame) -> Result<()> {
        self.io.write(frame.clone().into_bytes()).await
    }

    /// Cancel the IO tasks and wait for them to exit.
    pub async fn close(mut self) -> Result<()> {
        self.io.cancel.cancel();
        let _ = (&mut self.io.send_task).await;
        let _ = (&mut self.io.recv_task).await;
        info!(peer = %self.peer, "DVAP session closed");
        Ok(())
    }
}

/// Log a setting that was moved into range. Returns whether it was.
fn warn_if_clamped(peer: &str, setting: &str, requested: i32, applied: i32) -> bool {
    if requested == applied {
        return false;
    }
    warn!(peer = %peer, setting, requested, applied, "out-of-range setting clamped");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DvapBuilder;
    use dvap_protocol::codes::{host, target};
    use dvap_protocol::frame::{encode, encode_control};
    use dvap_test_harness::{MockDvap, MockEvent};

    fn req(code: u16) -> Vec<u8> {
        commands::request_item(code).unwrap().to_vec()
    }

    fn resp(code: u16, data: &[u8]) -> Vec<u8> {
        encode_control(target::ITEM_RESPONSE, code, data).unwrap().to_vec()
    }

    /// Echo of a set request, as the DVAP acknowledges it.
    fn ack(request: &Bytes) -> Vec<u8> {
        request.to_vec()
    }

    async fn make_device(mock: MockDvap) -> (DvapDevice, dvap_test_harness::MockDvapHandle) {
        let (transport, handle) = mock.spawn();
        let device = DvapBuilder::new()
            .response_timeout(Duration::from_millis(200))
            .build_with_transport(transport)
            .await
            .unwrap();
        (device, handle)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_identification() {
        let mut mock = MockDvap::new();
        mock.expect(&req(item::TARGET_NAME), &resp(item::TARGET_NAME, b"DVAP Dongle\0"));
        mock.expect(&req(item::TARGET_SERIAL), &resp(item::TARGET_SERIAL, b"AP012345"));
        mock.expect(&req(item::IFACE_VERSION), &resp(item::IFACE_VERSION, &[0x64, 0x00]));

        let (device, handle) = make_device(mock).await;
        assert_eq!(device.name().await.unwrap(), "DVAP Dongle");
        assert_eq!(device.serial().await.unwrap(), "AP012345");
        assert!((device.interface_version().await.unwrap() - 1.0).abs() < f32::EPSILON);
        assert_eq!(handle.remaining_expectations(), 0);
        assert!(!handle.has_unexpected());
    }

    #[tokio::test]
    async fn test_firmware_versions() {
        let mut mock = MockDvap::new();
        let boot_req = commands::request_hardware_version(VersionSelector::Bootcode).unwrap();
        let fw_req = commands::request_hardware_version(VersionSelector::Firmware).unwrap();
        mock.expect(&boot_req, &resp(item::HW_VERSION, &[0x00, 0x64, 0x00]));
        mock.expect(&fw_req, &resp(item::HW_VERSION, &[0x01, 0x6A, 0x00]));

        let (device, _handle) = make_device(mock).await;
        let (boot, fw) = device.firmware_versions().await.unwrap();
        assert!((boot - 1.0).abs() < 1e-6);
        assert!((fw - 1.06).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_status_and_limits() {
        let mut limits = Vec::new();
        limits.extend_from_slice(&144_000_000u32.to_le_bytes());
        limits.extend_from_slice(&148_000_000u32.to_le_bytes());

        let mut mock = MockDvap::new();
        mock.expect(&req(item::STATUS), &resp(item::STATUS, &[0x00]));
        mock.expect(&req(item::TX_FREQ_LIMITS), &resp(item::TX_FREQ_LIMITS, &limits));

        let (device, _handle) = make_device(mock).await;
        assert_eq!(device.status().await.unwrap(), DeviceStatus::Stopped);
        assert_eq!(
            device.tx_frequency_limits().await.unwrap(),
            (144_000_000, 148_000_000)
        );
    }

    #[tokio::test]
    async fn test_band_scan() {
        let scan = BandScan::new(3, 10, 145_000_000);
        let mut mock = MockDvap::new();
        mock.expect(
            &commands::request_band_scan(&scan).unwrap(),
            &resp(item::BAND_SCAN, &[0x10, 0x20, 0x30]),
        );

        let (device, _handle) = make_device(mock).await;
        let rssi = device.band_scan(3, 10, 145_000_000).await.unwrap();
        assert_eq!(rssi, vec![0x10, 0x20, 0x30]);
    }

    // -----------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_start_sequence() {
        let stop = commands::set_run_state(RunState::Stop).unwrap();
        let gmsk = commands::set_modulation(Modulation::Gmsk).unwrap();
        let mode = commands::set_operation_mode(OperationMode::Normal).unwrap();
        let freq = commands::set_rx_tx_frequency(145_670_000).unwrap();
        let squelch = commands::set_squelch_threshold(-100).unwrap();
        let power = commands::set_tx_power(10).unwrap();
        let run = commands::set_run_state(RunState::Run).unwrap();

        let mut mock = MockDvap::new();
        for request in [&stop, &gmsk, &mode, &freq, &squelch, &power, &run] {
            mock.expect(request, &ack(request));
        }

        let (device, handle) = make_device(mock).await;
        device.stop().await.unwrap();
        device.set_modulation(Modulation::Gmsk).await.unwrap();
        device.set_operation_mode(OperationMode::Normal).await.unwrap();
        device.set_rx_tx_frequency(145_670_000).await.unwrap();
        device.set_squelch_threshold(-100).await.unwrap();
        device.set_tx_power(10).await.unwrap();
        device.start().await.unwrap();

        assert_eq!(handle.remaining_expectations(), 0);
        assert!(!handle.has_unexpected());
    }

    #[tokio::test]
    async fn test_clamped_settings_on_the_wire() {
        let squelch = commands::set_squelch_threshold(-200).unwrap();
        let led = commands::set_led_control(LedControl::host(150, 5, -3)).unwrap();

        let mut mock = MockDvap::new();
        mock.expect(&squelch, &ack(&squelch));
        mock.expect(&led, &ack(&led));

        let (device, handle) = make_device(mock).await;
        device.set_squelch_threshold(-200).await.unwrap();
        device.set_led_control_host(150, 5, -3).await.unwrap();

        let received = handle.received();
        assert_eq!(&received[0][..], &[0x05, 0x00, 0x80, 0x00, 0x80]);
        assert_eq!(&received[1][4..], &[0x01, 100, 5, 0]);
    }

    // -----------------------------------------------------------------
    // Exchange semantics
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_concurrent_requests_are_serialized() {
        let mut mock = MockDvap::new();
        mock.expect_delayed(
            &req(item::TARGET_NAME),
            &resp(item::TARGET_NAME, b"DVAP"),
            Duration::from_millis(50),
        );
        mock.expect(&req(item::TARGET_SERIAL), &resp(item::TARGET_SERIAL, b"AP1"));

        let (device, handle) = make_device(mock).await;
        let (name, serial) = tokio::join!(device.name(), device.serial());
        assert_eq!(name.unwrap(), "DVAP");
        assert_eq!(serial.unwrap(), "AP1");

        // The serial request went out only after the name response arrived.
        let log = handle.log();
        assert_eq!(log.len(), 4);
        assert!(matches!(&log[0], MockEvent::Received(b) if b[..] == req(item::TARGET_NAME)[..]));
        assert!(matches!(&log[1], MockEvent::Sent(_)));
        assert!(matches!(&log[2], MockEvent::Received(b) if b[..] == req(item::TARGET_SERIAL)[..]));
        assert!(matches!(&log[3], MockEvent::Sent(_)));
    }

    #[tokio::test]
    async fn test_timeout_then_stale_response_is_discarded() {
        let mut mock = MockDvap::new();
        mock.expect_no_response(&req(item::STATUS));
        mock.expect(&req(item::TARGET_NAME), &resp(item::TARGET_NAME, b"DVAP"));

        let (device, handle) = make_device(mock).await;
        assert!(matches!(device.status().await, Err(Error::Timeout)));

        // The late status answer lands in the response slot...
        handle.inject(&resp(item::STATUS, &[0x01])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // ...and is not mistaken for the name response.
        assert_eq!(device.name().await.unwrap(), "DVAP");
        assert!(device.is_open());
    }

    #[tokio::test]
    async fn test_mismatched_item_is_returned() {
        let mut mock = MockDvap::new();
        mock.expect(&req(item::TARGET_NAME), &resp(item::TARGET_SERIAL, b"AP1"));

        let (device, _handle) = make_device(mock).await;
        assert_eq!(device.name().await.unwrap(), "AP1");
    }

    #[tokio::test]
    async fn test_range_response_answers_request() {
        let mut mock = MockDvap::new();
        let range = encode_control(target::RANGE_RESPONSE, item::TARGET_NAME, b"DVAP").unwrap();
        mock.expect(&req(item::TARGET_NAME), &range);

        let (device, _handle) = make_device(mock).await;
        assert_eq!(device.name().await.unwrap(), "DVAP");
    }

    // -----------------------------------------------------------------
    // Events and data path
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_unsolicited_events() {
        let (device, handle) = make_device(MockDvap::new()).await;
        let mut events = device.subscribe();

        handle
            .inject(&encode_control(target::UNSOLICITED, item::PTT_STATE, &[0x01]).unwrap())
            .await;
        assert_eq!(
            events.recv().await.unwrap(),
            DeviceEvent::PttChanged { transmitting: true }
        );

        let data = encode(target::DATA_ITEM_2, &[0u8; 16]).unwrap();
        handle.inject(&data).await;
        match events.recv().await.unwrap() {
            DeviceEvent::Data(frame) => assert_eq!(frame.as_bytes(), &data[..]),
            other => panic!("expected data frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transmit_bypasses_response_slot() {
        let data = encode(host::DATA_ITEM_2, &[0x55; 16]).unwrap();
        let mut mock = MockDvap::new();
        mock.expect_no_response(&data);

        let (device, handle) = make_device(mock).await;
        let frame = Frame::from_bytes(data.clone()).unwrap();
        device.transmit(&frame).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handle.received(), vec![data]);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn test_link_loss() {
        let (device, handle) = make_device(MockDvap::new()).await;
        let mut events = device.subscribe();

        handle.disconnect().await;
        assert_eq!(events.recv().await.unwrap(), DeviceEvent::Disconnected);
        assert!(!device.is_open());
        assert!(matches!(device.name().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_close() {
        let (device, handle) = make_device(MockDvap::new()).await;
        assert_eq!(device.peer(), "dvap-under-test");
        device.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.has_unexpected());
    }

    // -----------------------------------------------------------------
    // Builder
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn test_builder_rejects_zero_timing() {
        let (transport, _handle) = MockDvap::new().spawn();
        let result = DvapBuilder::new()
            .response_timeout(Duration::ZERO)
            .build_with_transport(transport)
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        let (transport, _handle) = MockDvap::new().spawn();
        let result = DvapBuilder::new()
            .keepalive_interval(Duration::ZERO)
            .build_with_transport(transport)
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_builder_requires_serial_port() {
        let result = DvapBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_clamped_settings_are_reported() {
        assert!(warn_if_clamped("dvap", "squelch threshold", -200, -128));
        assert!(warn_if_clamped("dvap", "TX power", 30, 10));
        assert!(!warn_if_clamped("dvap", "squelch threshold", -60, -60));
    }
}
