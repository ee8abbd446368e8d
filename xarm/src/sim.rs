/*!
In-process simulated arm.

[`SimulatedArm`] behaves like the controller board's HID interface: it
applies move and stop commands to six virtual servos and answers position
and battery requests. Every report written to it is recorded so callers can
inspect exactly what went over the wire. Clones share the same state.
*/

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::frame::{self, Command};
use crate::protocol::{HEADER_LEN, SERVO_COUNT};
use crate::transport::{Connector, HidDevice, HidTransport, Transport};

#[derive(Debug)]
struct SimState {
    positions: [u16; SERVO_COUNT as usize],
    torque: [bool; SERVO_COUNT as usize],
    battery_mv: u16,
    responsive: bool,
    outbox: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    reads: usize,
}

/// Simulated controller board; see the module docs
#[derive(Debug, Clone)]
pub struct SimulatedArm {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedArm {
    /// A board that answers every request, servos centred, 7.4 V battery
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                positions: [500; SERVO_COUNT as usize],
                torque: [false; SERVO_COUNT as usize],
                battery_mv: 7400,
                responsive: true,
                outbox: VecDeque::new(),
                writes: Vec::new(),
                reads: 0,
            })),
        }
    }

    /// A board that accepts commands but never replies
    pub fn silent() -> Self {
        let arm = Self::new();
        arm.lock().responsive = false;
        arm
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_position(&self, servo_id: u8, position: u16) {
        if let Some(slot) = index(servo_id) {
            self.lock().positions[slot] = position;
        }
    }

    pub fn position(&self, servo_id: u8) -> Option<u16> {
        index(servo_id).map(|slot| self.lock().positions[slot])
    }

    pub fn torque_enabled(&self, servo_id: u8) -> bool {
        index(servo_id).is_some_and(|slot| self.lock().torque[slot])
    }

    pub fn set_battery_millivolts(&self, millivolts: u16) {
        self.lock().battery_mv = millivolts;
    }

    /// Queue a raw inbound report, served before any generated reply
    pub fn push_reply(&self, report: &[u8]) {
        self.lock().outbox.push_front(report.to_vec());
    }

    /// Every report written so far, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Apply one outbound report and queue the board's answer, if any
    fn handle(state: &mut SimState, report: &[u8]) {
        let Some(command) = report.get(HEADER_LEN).copied().and_then(Command::from_u8) else {
            return;
        };
        let Some(payload) = frame::decode(report, command) else {
            return;
        };

        match command {
            Command::ServoMove => {
                // [count, durLo, durHi, (id, posLo, posHi)*]
                for entry in payload.get(3..).unwrap_or_default().chunks_exact(3) {
                    if let Some(slot) = index(entry[0]) {
                        state.positions[slot] = u16::from_le_bytes([entry[1], entry[2]]);
                        state.torque[slot] = true;
                    }
                }
            }
            Command::ServoStop => {
                for &id in payload.get(1..).unwrap_or_default() {
                    if let Some(slot) = index(id) {
                        state.torque[slot] = false;
                    }
                }
            }
            Command::GetServoPosition => {
                let ids = payload.get(1..).unwrap_or_default();
                let mut reply = vec![ids.len() as u8];
                for &id in ids {
                    let position = index(id).map_or(0, |slot| state.positions[slot]);
                    reply.push(id);
                    reply.extend_from_slice(&position.to_le_bytes());
                }
                Self::answer(state, command, &reply);
            }
            Command::GetBatteryVoltage => {
                let reply = state.battery_mv.to_le_bytes();
                Self::answer(state, command, &reply);
            }
        }
    }

    fn answer(state: &mut SimState, command: Command, payload: &[u8]) {
        if !state.responsive {
            return;
        }
        if let Ok(report) = frame::encode(command, payload) {
            // inbound reports carry no report id
            state.outbox.push_back(report[1..].to_vec());
        }
    }
}

impl Default for SimulatedArm {
    fn default() -> Self {
        Self::new()
    }
}

fn index(servo_id: u8) -> Option<usize> {
    (1..=SERVO_COUNT).contains(&servo_id).then(|| usize::from(servo_id - 1))
}

impl HidDevice for SimulatedArm {
    fn write(&mut self, report: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.writes.push(report.to_vec());
        Self::handle(&mut state, report);
        Ok(report.len())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        let mut state = self.lock();
        state.reads += 1;
        match state.outbox.pop_front() {
            Some(report) => {
                buf.fill(0);
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(buf.len())
            }
            None => Ok(0),
        }
    }

    fn serial_number(&self) -> Option<String> {
        Some("SIM-0001".to_string())
    }
}

/// Connector that binds the USB designator to a [`SimulatedArm`]
#[derive(Debug, Clone)]
pub struct SimConnector {
    arm: Option<SimulatedArm>,
}

impl SimConnector {
    pub fn new(arm: SimulatedArm) -> Self {
        Self { arm: Some(arm) }
    }

    /// A connector whose device is never present
    pub fn unplugged() -> Self {
        Self { arm: None }
    }
}

impl Connector for SimConnector {
    fn open_serial(&self, port: &str, _config: &ControllerConfig) -> Result<Box<dyn Transport>> {
        Err(Error::device_open(format!(
            "Failed to open serial port {}: simulated arm is USB only",
            port
        )))
    }

    fn open_usb(&self, config: &ControllerConfig) -> Result<Box<dyn Transport>> {
        match &self.arm {
            Some(arm) => Ok(Box::new(HidTransport::new(arm.clone(), config))),
            None => Err(Error::device_open(format!(
                "Failed to open USB HID device {:04x}:{:04x}",
                config.vendor_id, config.product_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(arm: &mut SimulatedArm, command: Command, payload: &[u8]) -> Option<Vec<u8>> {
        let report = frame::encode(command, payload).unwrap();
        arm.write(&report).unwrap();
        let mut buf = [0u8; 64];
        let n = arm.read_timeout(&mut buf, Duration::from_millis(50)).unwrap();
        (n > 0).then(|| frame::decode(&buf[..n], command).unwrap().to_vec())
    }

    #[test]
    fn test_move_then_read_back() {
        let mut arm = SimulatedArm::new();
        exchange(&mut arm, Command::ServoMove, &[2, 0xe8, 0x03, 1, 0x64, 0x00, 6, 0x84, 0x03]);
        assert_eq!(arm.position(1), Some(100));
        assert_eq!(arm.position(6), Some(900));
        assert!(arm.torque_enabled(1));

        let reply = exchange(&mut arm, Command::GetServoPosition, &[2, 6, 1]).unwrap();
        assert_eq!(reply, vec![2, 6, 0x84, 0x03, 1, 0x64, 0x00]);
    }

    #[test]
    fn test_stop_releases_torque() {
        let mut arm = SimulatedArm::new();
        exchange(&mut arm, Command::ServoMove, &[1, 0, 0, 3, 0xf4, 0x01]);
        assert!(arm.torque_enabled(3));
        exchange(&mut arm, Command::ServoStop, &[1, 3]);
        assert!(!arm.torque_enabled(3));
        assert_eq!(arm.write_count(), 2);
    }

    #[test]
    fn test_silent_arm_never_answers() {
        let mut arm = SimulatedArm::silent();
        assert_eq!(exchange(&mut arm, Command::GetBatteryVoltage, &[]), None);
        assert_eq!(arm.read_count(), 1);
    }

    #[test]
    fn test_unplugged_connector() {
        let err = SimConnector::unplugged()
            .open_usb(&ControllerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::DeviceOpen(_)));
    }
}
