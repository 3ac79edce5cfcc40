//! Device Session
//!
//! One `DeviceSession` per connected device: it owns the command queue and
//! the write gate, accepts logical operations from the caller, and receives
//! completion callbacks from the platform adapter. Every outcome leaves
//! through a single event channel.
//!
//! The platform adapter is expected to call the `on_*` entry points from its
//! own callback thread; the gate is the only synchronization between that
//! thread and the session's worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{ConnectionState, ConnectorEvent, OperationKind};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::dispatcher;
use crate::infrastructure::bluetooth::ota;
use crate::infrastructure::bluetooth::protocol::{self, FRAME_HEADER_LEN};
use crate::infrastructure::bluetooth::queue::{CommandQueue, WriteGate};
use crate::infrastructure::bluetooth::transport::{Channel, LinkError, Transport, WriteMode};

/// Session over one connected Glow device.
pub struct DeviceSession {
    inner: Arc<SessionInner>,
    queue: CommandQueue,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    gate: WriteGate,
    events: mpsc::UnboundedSender<ConnectorEvent>,
    settings: Settings,
    connection: Mutex<ConnectionState>,
    mtu: AtomicUsize,
}

impl DeviceSession {
    /// Create a session over an already-established transport. Events are
    /// delivered on `events` in the order outcomes settle.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Settings,
        events: mpsc::UnboundedSender<ConnectorEvent>,
    ) -> Self {
        let mtu = settings.mtu;
        info!(mtu, "device session created");
        Self {
            inner: Arc::new(SessionInner {
                transport,
                gate: WriteGate::new(),
                events,
                settings,
                connection: Mutex::new(ConnectionState::Disconnected),
                mtu: AtomicUsize::new(mtu),
            }),
            queue: CommandQueue::new(),
        }
    }

    // --- Logical operations ---

    /// Acknowledged command write.
    pub fn deliver(&self, payload: Vec<u8>) {
        let inner = Arc::clone(&self.inner);
        self.queue.post(move || {
            let result = inner.write_frames(
                OperationKind::Deliver,
                Channel::Command,
                &payload,
                WriteMode::Acknowledged,
                false,
            );
            if let Err(err) = result {
                inner.reject_write(OperationKind::Deliver, err);
            }
        });
    }

    /// Unacknowledged fire-and-forget command write. Preempts queued
    /// acknowledged operations.
    pub fn transmit(&self, payload: Vec<u8>) {
        let inner = Arc::clone(&self.inner);
        self.queue.post_front(move || {
            let result = inner.write_frames(
                OperationKind::Transmit,
                Channel::Command,
                &payload,
                WriteMode::Unacknowledged,
                false,
            );
            if let Err(err) = result {
                inner.reject_write(OperationKind::Transmit, err);
            }
        });
    }

    /// Write on the request channel, optionally following up with a read
    /// whose bytes carry the resolution.
    pub fn request(&self, payload: Vec<u8>, expect_response: bool) {
        let inner = Arc::clone(&self.inner);
        self.queue.post(move || {
            let result = inner.write_frames(
                OperationKind::Request,
                Channel::Request,
                &payload,
                WriteMode::Acknowledged,
                expect_response,
            );
            if let Err(err) = result {
                inner.reject_write(OperationKind::Request, err);
                return;
            }
            if !expect_response {
                return;
            }
            if let Err(err) = inner.read_raw(OperationKind::Request, Channel::Request) {
                inner.reject_read(OperationKind::Request, err);
            }
        });
    }

    /// Write the 4-byte device clock. The timestamp goes out raw, without a
    /// fragment header; the clock characteristic expects exactly four bytes.
    pub fn set_clock(&self, timestamp: [u8; 4]) {
        let inner = Arc::clone(&self.inner);
        self.queue.post(move || {
            let result = inner.write_raw(
                OperationKind::SetClock,
                Channel::Clock,
                &timestamp,
                WriteMode::Acknowledged,
            );
            if let Err(err) = result {
                inner.reject_write(OperationKind::SetClock, err);
            }
        });
    }

    /// Read the device clock.
    pub fn get_clock(&self) {
        let inner = Arc::clone(&self.inner);
        self.queue.post(move || {
            if let Err(err) = inner.read_raw(OperationKind::GetClock, Channel::Clock) {
                inner.reject_read(OperationKind::GetClock, err);
            }
        });
    }

    /// Push a firmware image: reset, begin, chunked writes with progress,
    /// end. Each phase is its own queued task; a failure in any phase skips
    /// the rest of the sequence.
    pub fn update_firmware(&self, image: Vec<u8>) {
        let image = Arc::new(image);
        info!(len = image.len(), "starting firmware update");

        self.inner.gate.start_ota();
        self.inner.emit(ConnectorEvent::Progress(ota::OTA_PROGRESS_STARTING));

        // Resetting
        let inner = Arc::clone(&self.inner);
        self.queue.post(move || {
            debug!(phase = ?ota::OtaPhase::Resetting, "ota phase");
            inner.ota_step(ota::reset_frame());
        });

        // Beginning
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.settings.ota_begin_delay_ms;
        let image_len = image.len() as u32;
        self.queue.post(move || {
            thread::sleep(Duration::from_millis(delay));
            if inner.gate.ota_failed() {
                return;
            }
            debug!(phase = ?ota::OtaPhase::Beginning, image_len, "ota phase");
            inner.ota_step(ota::begin_frame(image_len));
        });

        // Writing
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.settings.ota_write_delay_ms;
        let write_image = Arc::clone(&image);
        self.queue.post(move || {
            thread::sleep(Duration::from_millis(delay));
            debug!(phase = ?ota::OtaPhase::Writing, "ota phase");
            let total = write_image.len() as u32;
            for window in ota::chunk_windows(write_image.len()) {
                if inner.gate.ota_failed() {
                    return;
                }
                let frame = ota::chunk_frame(window.start as u32, &write_image[window.clone()]);
                let result = inner.write_frames(
                    OperationKind::UpdateFirmware,
                    Channel::Request,
                    &frame,
                    WriteMode::Acknowledged,
                    false,
                );
                if let Err(err) = result {
                    inner.ota_fail(err);
                    return;
                }
                let written = inner.gate.add_ota_written(window.len() as u32);
                let percent = ota::progress(written, total);
                debug!(written, percent, "ota: chunk written");
                inner.emit(ConnectorEvent::Progress(percent));
            }
        });

        // Ending
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.settings.ota_end_delay_ms;
        self.queue.post(move || {
            thread::sleep(Duration::from_millis(delay));
            // Let the last chunk's confirmation settle first; marking the
            // end while it is still pending would leak into its completion
            // snapshot and resolve the update before the end frame exists.
            inner.gate.wait_settled();
            if inner.gate.ota_failed() {
                return;
            }
            let written = inner.gate.ota_written();
            debug!(phase = ?ota::OtaPhase::Ending, written, "ota phase");
            // Mark before issuing so the completion handler can tell final
            // success from a mid-stream confirmation.
            inner.gate.mark_ota_ended();
            inner.ota_step(ota::end_frame(written));
        });
    }

    /// Tear the session down. Wakes a suspended worker, rejects the
    /// in-flight operation (the synthetic failure completion), and fails
    /// every still-queued task with `TransportUnavailable`.
    pub fn disconnect(&self) {
        info!("tearing down session");
        self.inner.tear_down();
        self.queue.shutdown();
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.lock().unwrap()
    }

    /// Characteristic UUID for a channel, for the platform adapter.
    pub fn characteristic_uuid(&self, channel: Channel) -> anyhow::Result<Uuid> {
        let settings = &self.inner.settings;
        let uuid_str = match channel {
            Channel::Command => &settings.ble_command_char_uuid,
            Channel::Clock => &settings.ble_clock_char_uuid,
            Channel::Request => &settings.ble_request_char_uuid,
        };
        protocol::parse_uuid(uuid_str)
    }

    pub fn service_uuid(&self) -> anyhow::Result<Uuid> {
        protocol::parse_uuid(&self.inner.settings.ble_service_uuid)
    }

    // --- Transport completion callbacks ---

    /// A characteristic write was confirmed or failed.
    pub fn on_write_completed(&self, channel: Channel, success: bool) {
        let snapshot = self.inner.gate.complete_write(success);
        if let Some(event) = dispatcher::dispatch_write_completion(channel, success, snapshot) {
            self.inner.emit(event);
        }
    }

    /// A characteristic read finished. `value` is `Some` with the read bytes
    /// on success, `None` on failure.
    pub fn on_read_completed(&self, channel: Channel, value: Option<Vec<u8>>) {
        let snapshot = self.inner.gate.complete_read();
        if let Some(event) = dispatcher::dispatch_read_completion(channel, value, snapshot) {
            self.inner.emit(event);
        }
    }

    /// Unsolicited notification from the device, forwarded verbatim without
    /// touching pending-operation bookkeeping.
    pub fn on_notification(&self, bytes: Vec<u8>) {
        self.inner.emit(ConnectorEvent::Notification(bytes));
    }

    /// The link negotiated a new MTU. Later frames use the new capacity.
    pub fn on_mtu_changed(&self, mtu: usize) {
        debug!(mtu, "mtu changed");
        self.inner.mtu.store(mtu, Ordering::Relaxed);
        self.inner.gate.complete_mtu_change();
    }

    /// The platform reported a connection state change.
    pub fn on_connection_state_changed(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                let mut connection = self.inner.connection.lock().unwrap();
                if *connection != ConnectionState::Connected {
                    *connection = ConnectionState::Connected;
                    drop(connection);
                    info!("connected");
                    self.inner
                        .emit(ConnectorEvent::ConnectionState(ConnectionState::Connected));
                }
            }
            ConnectionState::Disconnected => {
                self.inner.tear_down();
                self.queue.shutdown();
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        // The queue joins its worker on drop; unblock a suspended worker
        // first or the join never returns.
        self.inner.gate.shut();
    }
}

impl SessionInner {
    fn emit(&self, event: ConnectorEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.events.send(event);
    }

    fn frame_capacity(&self) -> usize {
        self.mtu
            .load(Ordering::Relaxed)
            .saturating_sub(FRAME_HEADER_LEN)
            .max(1)
    }

    /// Fragment `payload` and push each frame through the gate in offset
    /// order, each waiting for the previous frame's confirmation.
    fn write_frames(
        &self,
        kind: OperationKind,
        channel: Channel,
        payload: &[u8],
        mode: WriteMode,
        expects_response: bool,
    ) -> Result<(), LinkError> {
        let session_id = protocol::new_session_id();
        let frames = protocol::encode(payload, self.frame_capacity(), session_id);
        let count = frames.len();

        for (i, frame) in frames.iter().enumerate() {
            self.gate
                .begin_write(kind, expects_response, i == 0, i + 1 == count)?;
            debug!(
                session = session_id,
                offset = frame.offset,
                chunk = frame.chunk.len(),
                "writing frame"
            );
            if let Err(err) = self.transport.write(channel, &frame.to_bytes(), mode) {
                warn!(?err, "transport refused write");
                self.gate.release();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Single unfragmented write (the clock characteristic).
    fn write_raw(
        &self,
        kind: OperationKind,
        channel: Channel,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError> {
        self.gate.begin_write(kind, false, true, true)?;
        if let Err(err) = self.transport.write(channel, payload, mode) {
            warn!(?err, "transport refused write");
            self.gate.release();
            return Err(err);
        }
        Ok(())
    }

    /// Claim the gate for a read and issue it.
    fn read_raw(&self, kind: OperationKind, channel: Channel) -> Result<(), LinkError> {
        self.gate.begin_read(kind)?;
        debug!(?channel, "reading characteristic");
        if let Err(err) = self.transport.read(channel) {
            warn!(?err, "transport refused read");
            self.gate.release();
            return Err(err);
        }
        Ok(())
    }

    /// Emit the single rejection for a write path failure. A
    /// `SequenceAborted` error means the completion callback already
    /// rejected this operation.
    fn reject_write(&self, kind: OperationKind, err: LinkError) {
        if err == LinkError::SequenceAborted {
            return;
        }
        if let Some(event) = dispatcher::reject_for_write(kind) {
            self.emit(event);
        }
    }

    fn reject_read(&self, kind: OperationKind, err: LinkError) {
        if err == LinkError::SequenceAborted {
            return;
        }
        if let Some(event) = dispatcher::reject_for_read(kind) {
            self.emit(event);
        }
    }

    fn ota_step(&self, frame: Vec<u8>) {
        let result = self.write_frames(
            OperationKind::UpdateFirmware,
            Channel::Request,
            &frame,
            WriteMode::Acknowledged,
            false,
        );
        if let Err(err) = result {
            self.ota_fail(err);
        }
    }

    fn ota_fail(&self, err: LinkError) {
        if err == LinkError::SequenceAborted {
            // An earlier step already failed and rejected the update.
            return;
        }
        warn!(?err, "ota step failed");
        if self.gate.mark_ota_failed() {
            // Another phase already turned the failure into a rejection.
            return;
        }
        if let Some(event) = dispatcher::reject_for_write(OperationKind::UpdateFirmware) {
            self.emit(event);
        }
    }

    fn tear_down(&self) {
        if let Some(snapshot) = self.gate.shut_and_take_inflight() {
            // Synthetic failure completion for whatever was in flight.
            let event = if snapshot.reading {
                snapshot.kind.and_then(dispatcher::reject_for_read)
            } else {
                snapshot.kind.and_then(dispatcher::reject_for_write)
            };
            if let Some(event) = event {
                self.emit(event);
            }
        }

        let mut connection = self.connection.lock().unwrap();
        if *connection != ConnectionState::Disconnected {
            *connection = ConnectionState::Disconnected;
            drop(connection);
            info!("disconnected");
            self.emit(ConnectorEvent::ConnectionState(ConnectionState::Disconnected));
        }
    }
}
