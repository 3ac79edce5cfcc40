//! Command Queue / Serializer
//!
//! One dedicated worker thread per session drains a FIFO of posted tasks.
//! Before touching the transport, every task parks on the [`WriteGate`]
//! until the previous operation's completion callback has settled it, so at
//! most one transport operation is ever outstanding. Transmit traffic is
//! posted at the front of the queue to preempt queued acknowledged work.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::domain::models::OperationKind;
use crate::infrastructure::bluetooth::transport::LinkError;

type Task = Box<dyn FnOnce() + Send>;

struct TaskQueue {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

/// Single-worker task queue with front insertion.
pub struct CommandQueue {
    state: Arc<(Mutex<TaskQueue>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let state = Arc::new((
            Mutex::new(TaskQueue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("glowlink-writer".to_string())
            .spawn(move || Self::run(worker_state))
            .expect("failed to spawn writer thread");

        Self {
            state,
            worker: Some(worker),
        }
    }

    fn run(state: Arc<(Mutex<TaskQueue>, Condvar)>) {
        let (lock, available) = &*state;
        loop {
            let task = {
                let mut queue = lock.lock().unwrap();
                loop {
                    if let Some(task) = queue.tasks.pop_front() {
                        break Some(task);
                    }
                    if queue.shutdown {
                        break None;
                    }
                    queue = available.wait(queue).unwrap();
                }
            };

            match task {
                Some(task) => task(),
                None => {
                    debug!("writer thread exiting");
                    return;
                }
            }
        }
    }

    /// Queue a task behind everything already posted. After shutdown the
    /// worker may be gone, so the task runs inline instead; it fails fast at
    /// the shut gate and still emits its rejection.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let (lock, available) = &*self.state;
        let mut queue = lock.lock().unwrap();
        if queue.shutdown {
            drop(queue);
            task();
            return;
        }
        queue.tasks.push_back(Box::new(task));
        available.notify_one();
    }

    /// Queue a task ahead of everything already posted. Used for transmit
    /// traffic, which is latency-sensitive fire-and-forget.
    pub fn post_front(&self, task: impl FnOnce() + Send + 'static) {
        let (lock, available) = &*self.state;
        let mut queue = lock.lock().unwrap();
        if queue.shutdown {
            drop(queue);
            task();
            return;
        }
        queue.tasks.push_front(Box::new(task));
        available.notify_one();
    }

    /// Let the worker drain what is queued (each task fails fast once the
    /// gate is shut) and exit.
    pub fn shutdown(&self) {
        let (lock, available) = &*self.state;
        lock.lock().unwrap().shutdown = true;
        available.notify_all();
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// What the completion path needs to know about the operation it is
/// settling.
#[derive(Debug, Clone, Copy)]
pub struct PendingSnapshot {
    pub kind: Option<OperationKind>,
    pub expects_response: bool,
    pub final_frame: bool,
    pub ota_ended: bool,
    /// The pending initiation is a read rather than a write.
    pub reading: bool,
}

#[derive(Default)]
struct Pending {
    awaiting: bool,
    kind: Option<OperationKind>,
    expects_response: bool,
    final_frame: bool,
    /// An asynchronous write failure was already turned into a rejection;
    /// the worker must abandon the rest of that payload silently.
    write_failed: bool,
    reading: bool,
    ota_failed: bool,
    ota_ended: bool,
    ota_bytes_written: u32,
    shutdown: bool,
}

/// The monitor shared between the worker and the transport's completion
/// callback. The worker suspends here while a write or read is outstanding;
/// the completion callback settles it and wakes the worker. Shutting the
/// gate is the synthetic failure completion that unblocks a suspended
/// worker during teardown.
pub struct WriteGate {
    state: Mutex<Pending>,
    settled: Condvar,
}

impl WriteGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Pending::default()),
            settled: Condvar::new(),
        }
    }

    /// Block until the previous operation settles, then claim the gate for
    /// one frame write of `kind`.
    ///
    /// `first_frame` marks the start of a payload (resets the stale failure
    /// flag of the previous operation); `final_frame` marks its last frame,
    /// which is the only one whose confirmation resolves the operation.
    pub fn begin_write(
        &self,
        kind: OperationKind,
        expects_response: bool,
        first_frame: bool,
        final_frame: bool,
    ) -> Result<(), LinkError> {
        let mut pending = self.state.lock().unwrap();
        while pending.awaiting && !pending.shutdown {
            trace!("writer paused awaiting confirmation");
            pending = self.settled.wait(pending).unwrap();
        }
        if pending.shutdown {
            return Err(LinkError::TransportUnavailable);
        }
        if first_frame {
            pending.write_failed = false;
        } else if pending.write_failed {
            // The failure completion already rejected this operation.
            pending.write_failed = false;
            return Err(LinkError::SequenceAborted);
        }
        if kind == OperationKind::UpdateFirmware && pending.ota_failed {
            return Err(LinkError::SequenceAborted);
        }

        pending.kind = Some(kind);
        pending.expects_response = expects_response;
        pending.final_frame = final_frame;
        pending.reading = false;
        pending.awaiting = true;
        Ok(())
    }

    /// Block until the pending write settles, then claim the gate for a
    /// characteristic read.
    pub fn begin_read(&self, kind: OperationKind) -> Result<(), LinkError> {
        let mut pending = self.state.lock().unwrap();
        while pending.awaiting && !pending.shutdown {
            pending = self.settled.wait(pending).unwrap();
        }
        if pending.shutdown {
            return Err(LinkError::TransportUnavailable);
        }
        if pending.write_failed {
            pending.write_failed = false;
            return Err(LinkError::SequenceAborted);
        }

        pending.kind = Some(kind);
        pending.reading = true;
        pending.awaiting = true;
        Ok(())
    }

    /// Block until any outstanding confirmation settles, without claiming
    /// the gate. Lets a phase transition observe state only after the
    /// previous write's completion snapshot has been taken.
    pub fn wait_settled(&self) {
        let mut pending = self.state.lock().unwrap();
        while pending.awaiting && !pending.shutdown {
            pending = self.settled.wait(pending).unwrap();
        }
    }

    /// Release the gate after the transport refused an initiation
    /// synchronously (no completion callback will come).
    pub fn release(&self) {
        let mut pending = self.state.lock().unwrap();
        pending.awaiting = false;
        self.settled.notify_all();
    }

    /// Settle a write completion and wake the worker.
    pub fn complete_write(&self, success: bool) -> PendingSnapshot {
        let mut pending = self.state.lock().unwrap();
        pending.awaiting = false;
        let snapshot = PendingSnapshot {
            kind: pending.kind,
            expects_response: pending.expects_response,
            final_frame: pending.final_frame,
            ota_ended: pending.ota_ended,
            reading: pending.reading,
        };
        if !success {
            pending.write_failed = true;
            if pending.kind == Some(OperationKind::UpdateFirmware) {
                pending.ota_failed = true;
            }
        }
        self.settled.notify_all();
        snapshot
    }

    /// Settle a read completion and wake the worker.
    pub fn complete_read(&self) -> PendingSnapshot {
        let mut pending = self.state.lock().unwrap();
        pending.awaiting = false;
        let snapshot = PendingSnapshot {
            kind: pending.kind,
            expects_response: pending.expects_response,
            final_frame: pending.final_frame,
            ota_ended: pending.ota_ended,
            reading: pending.reading,
        };
        pending.expects_response = false;
        self.settled.notify_all();
        snapshot
    }

    /// An MTU change confirmation also settles the gate.
    pub fn complete_mtu_change(&self) {
        let mut pending = self.state.lock().unwrap();
        pending.awaiting = false;
        self.settled.notify_all();
    }

    /// Shut the gate: wake any suspended worker and fail every later claim
    /// with `TransportUnavailable`.
    pub fn shut(&self) {
        let mut pending = self.state.lock().unwrap();
        pending.shutdown = true;
        self.settled.notify_all();
    }

    /// Shut the gate and, if an initiation was outstanding, hand back its
    /// snapshot so the caller can issue the rejection it will never receive
    /// from the transport.
    pub fn shut_and_take_inflight(&self) -> Option<PendingSnapshot> {
        let mut pending = self.state.lock().unwrap();
        pending.shutdown = true;
        let inflight = pending.awaiting.then(|| PendingSnapshot {
            kind: pending.kind,
            expects_response: pending.expects_response,
            final_frame: pending.final_frame,
            ota_ended: pending.ota_ended,
            reading: pending.reading,
        });
        // Same bookkeeping as a failed write completion: later OTA phases
        // must see the sequence as failed, not reject it a second time.
        if pending.awaiting && pending.kind == Some(OperationKind::UpdateFirmware) {
            pending.ota_failed = true;
        }
        pending.awaiting = false;
        self.settled.notify_all();
        inflight
    }

    // --- OTA session bookkeeping ---

    pub fn start_ota(&self) {
        let mut pending = self.state.lock().unwrap();
        pending.ota_failed = false;
        pending.ota_ended = false;
        pending.ota_bytes_written = 0;
    }

    pub fn ota_failed(&self) -> bool {
        self.state.lock().unwrap().ota_failed
    }

    /// Mark the OTA session failed. Returns whether it was already marked,
    /// so exactly one phase turns the failure into a rejection.
    pub fn mark_ota_failed(&self) -> bool {
        let mut pending = self.state.lock().unwrap();
        std::mem::replace(&mut pending.ota_failed, true)
    }

    /// Set before the final OTA frame is issued, so its completion is
    /// distinguishable from a mid-stream confirmation.
    pub fn mark_ota_ended(&self) {
        self.state.lock().unwrap().ota_ended = true;
    }

    pub fn add_ota_written(&self, bytes: u32) -> u32 {
        let mut pending = self.state.lock().unwrap();
        pending.ota_bytes_written += bytes;
        pending.ota_bytes_written
    }

    pub fn ota_written(&self) -> u32 {
        self.state.lock().unwrap().ota_bytes_written
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn tasks_run_in_fifo_order() {
        let queue = CommandQueue::new();
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            queue.post(move || tx.send(i).unwrap());
        }

        let order: Vec<i32> = (0..5).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn front_post_preempts_queued_tasks() {
        let queue = CommandQueue::new();
        let (tx, rx) = mpsc::channel();

        // Hold the worker on the first task until everything is queued.
        let (hold_tx, hold_rx) = mpsc::channel();
        queue.post(move || {
            hold_rx.recv().unwrap();
        });

        let tx_a = tx.clone();
        queue.post(move || tx_a.send("deliver").unwrap());
        let tx_b = tx.clone();
        queue.post_front(move || tx_b.send("transmit").unwrap());

        hold_tx.send(()).unwrap();
        assert_eq!(rx.recv().unwrap(), "transmit");
        assert_eq!(rx.recv().unwrap(), "deliver");
    }

    #[test]
    fn gate_blocks_until_completion() {
        let gate = Arc::new(WriteGate::new());
        gate.begin_write(OperationKind::Deliver, false, true, true)
            .unwrap();

        let gate2 = Arc::clone(&gate);
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            gate2
                .begin_write(OperationKind::Deliver, false, true, true)
                .unwrap();
            tx.send(()).unwrap();
        });

        // Still awaiting: the second claim must not get through.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        gate.complete_write(true);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn shut_gate_unblocks_suspended_worker() {
        let gate = Arc::new(WriteGate::new());
        gate.begin_write(OperationKind::Deliver, false, true, true)
            .unwrap();

        let gate2 = Arc::clone(&gate);
        let waiter = thread::spawn(move || {
            gate2.begin_write(OperationKind::Deliver, false, true, true)
        });

        thread::sleep(Duration::from_millis(50));
        gate.shut();
        assert_eq!(
            waiter.join().unwrap(),
            Err(LinkError::TransportUnavailable)
        );
    }

    #[test]
    fn failed_write_aborts_remaining_frames_silently() {
        let gate = WriteGate::new();
        gate.begin_write(OperationKind::Deliver, false, true, false)
            .unwrap();
        gate.complete_write(false);

        // The next frame of the same payload is abandoned...
        assert_eq!(
            gate.begin_write(OperationKind::Deliver, false, false, true),
            Err(LinkError::SequenceAborted)
        );
        // ...but a fresh operation claims the gate normally.
        assert!(gate
            .begin_write(OperationKind::Deliver, false, true, true)
            .is_ok());
    }

    #[test]
    fn shutting_takes_the_inflight_snapshot() {
        let gate = WriteGate::new();
        gate.begin_write(OperationKind::Deliver, false, true, true)
            .unwrap();

        let inflight = gate.shut_and_take_inflight().unwrap();
        assert_eq!(inflight.kind, Some(OperationKind::Deliver));
        assert!(!inflight.reading);

        // Nothing pending anymore, and the gate stays shut.
        assert!(gate.shut_and_take_inflight().is_none());
        assert_eq!(
            gate.begin_write(OperationKind::Deliver, false, true, true),
            Err(LinkError::TransportUnavailable)
        );
    }

    #[test]
    fn marking_ota_failed_reports_prior_state() {
        let gate = WriteGate::new();
        gate.start_ota();
        assert!(!gate.mark_ota_failed());
        assert!(gate.mark_ota_failed());

        // A fresh session arms it again.
        gate.start_ota();
        assert!(!gate.mark_ota_failed());
    }

    #[test]
    fn shutting_mid_update_marks_the_ota_failed() {
        let gate = WriteGate::new();
        gate.start_ota();
        gate.begin_write(OperationKind::UpdateFirmware, false, true, true)
            .unwrap();

        let inflight = gate.shut_and_take_inflight().unwrap();
        assert_eq!(inflight.kind, Some(OperationKind::UpdateFirmware));
        assert!(gate.ota_failed());
    }

    #[test]
    fn wait_settled_blocks_until_completion() {
        let gate = Arc::new(WriteGate::new());
        gate.begin_write(OperationKind::UpdateFirmware, false, true, true)
            .unwrap();

        let gate2 = Arc::clone(&gate);
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            gate2.wait_settled();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        gate.complete_write(true);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn ota_failure_short_circuits_later_steps() {
        let gate = WriteGate::new();
        gate.start_ota();
        gate.mark_ota_failed();
        assert_eq!(
            gate.begin_write(OperationKind::UpdateFirmware, false, true, true),
            Err(LinkError::SequenceAborted)
        );

        // A fresh session clears the flag.
        gate.start_ota();
        assert!(gate
            .begin_write(OperationKind::UpdateFirmware, false, true, true)
            .is_ok());
    }
}
