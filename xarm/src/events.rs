/*!
Unsolicited report intake.

USB drivers may hand over input reports outside the request/response path.
Only the most recent one is kept: each delivery overwrites the slot and
raises a flag that a consumer can poll. Nothing here interrupts a
synchronous receive in progress.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

/// Latest-report slot shared between the delivery context and the controller
#[derive(Debug, Default)]
pub struct ReportSlot {
    report: Mutex<Vec<u8>>,
    fresh: AtomicBool,
}

impl ReportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored report and flag it as new
    pub fn store(&self, report: &[u8]) {
        let mut slot = self.report.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.clear();
        slot.extend_from_slice(report);
        self.fresh.store(true, Ordering::Release);
    }

    /// Take the stored report if it has not been seen yet
    pub fn take(&self) -> Option<Vec<u8>> {
        if !self.fresh.swap(false, Ordering::AcqRel) {
            return None;
        }
        let slot = self.report.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(slot.clone())
    }

    /// Whether a report arrived since the last `take` or `clear_flag`
    pub fn has_new(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    /// Mark the stored report as stale without discarding it
    pub fn clear_flag(&self) {
        self.fresh.store(false, Ordering::Release);
    }
}

/// Handle a driver callback uses to deliver unsolicited reports
#[derive(Debug, Clone)]
pub struct EventSink {
    slot: Arc<ReportSlot>,
    debug: bool,
}

impl EventSink {
    pub fn new(slot: Arc<ReportSlot>, debug: bool) -> Self {
        Self { slot, debug }
    }

    pub fn deliver(&self, report: &[u8]) {
        if self.debug {
            debug!("USB Recv Data: {}", hex::encode(report));
        }
        self.slot.store(report);
    }
}

/// Background thread draining a report channel into an [`EventSink`]
pub struct EventPump {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl EventPump {
    /// Start pumping `reports` into `sink` until stopped or the sender hangs up
    pub fn spawn(reports: Receiver<Vec<u8>>, sink: EventSink) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_pump = Arc::clone(&running);

        let handle = thread::spawn(move || {
            let mut delivered = 0u64;
            while running_pump.load(Ordering::SeqCst) {
                match reports.recv_timeout(Duration::from_millis(100)) {
                    Ok(report) => {
                        sink.deliver(&report);
                        delivered += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("Report channel disconnected - event pump stopping");
                        break;
                    }
                }
            }
            delivered
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Whether the pump thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the pump and return how many reports it delivered
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    #[test]
    fn test_slot_last_write_wins() {
        let slot = ReportSlot::new();
        assert!(!slot.has_new());
        assert_eq!(slot.take(), None);

        slot.store(&[1, 2, 3]);
        slot.store(&[4, 5]);
        assert!(slot.has_new());
        assert_eq!(slot.take(), Some(vec![4, 5]));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_clear_flag_keeps_report_stale() {
        let slot = ReportSlot::new();
        slot.store(&[9]);
        slot.clear_flag();
        assert!(!slot.has_new());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_delivery_from_other_thread() {
        let slot = Arc::new(ReportSlot::new());
        let sink = EventSink::new(Arc::clone(&slot), true);

        let writer = thread::spawn(move || {
            for i in 0..100u8 {
                sink.deliver(&[i, i]);
            }
        });
        writer.join().unwrap();

        assert_eq!(slot.take(), Some(vec![99, 99]));
    }

    #[test]
    fn test_pump_delivers_and_stops_on_disconnect() {
        let slot = Arc::new(ReportSlot::new());
        let (tx, rx) = unbounded();
        let pump = EventPump::spawn(rx, EventSink::new(Arc::clone(&slot), false));

        tx.send(vec![0x55, 0x55, 3, 0x1f, 0x01]).unwrap();
        tx.send(vec![0x55, 0x55, 3, 0x1f, 0x02]).unwrap();
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(2);
        while pump.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(!pump.is_running());
        assert_eq!(pump.stop(), 2);
        assert_eq!(slot.take(), Some(vec![0x55, 0x55, 3, 0x1f, 0x02]));
    }

    #[test]
    fn test_pump_stop_while_idle() {
        let (_tx, rx) = unbounded::<Vec<u8>>();
        let pump = EventPump::spawn(rx, EventSink::new(Arc::new(ReportSlot::new()), false));
        assert_eq!(pump.stop(), 0);
    }
}
