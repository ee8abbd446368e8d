/*!
Controller command layer.

Every operation encodes one command, sends it and, for queries, waits once
for a reply carrying the same command code. Replies carry no request id, so
a controller must not be driven from several places at once; `&mut self`
on every operation enforces that within one process.
*/

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::events::{EventPump, EventSink, ReportSlot};
use crate::frame::{self, Command};
use crate::protocol::SERVO_COUNT;
use crate::transport::{Connector, Designator, SystemConnector, Transport, TransportKind};
use crate::units;

/// Every servo on the arm, in id order
pub const ALL_SERVOS: [u8; SERVO_COUNT as usize] = [1, 2, 3, 4, 5, 6];

/// A servo id paired with a raw position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Servo {
    pub id: u8,
    pub position: i32,
}

impl Servo {
    pub fn new(id: u8, position: i32) -> Self {
        Self { id, position }
    }

    /// Current position in degrees
    pub fn angle(&self) -> f32 {
        units::position_to_angle(self.position)
    }
}

/// Driver for one controller board
pub struct Controller {
    transport: Box<dyn Transport>,
    config: ControllerConfig,
    reports: Arc<ReportSlot>,
    pump: Option<EventPump>,
}

impl Controller {
    /// Open the board named by `designator` (`"USB"` or `"COM…"`) on real hardware
    pub fn open(designator: &str, config: ControllerConfig) -> Result<Self> {
        Self::open_with(designator, config, &SystemConnector)
    }

    /// Open the board named by `designator` through `connector`
    pub fn open_with(designator: &str, config: ControllerConfig, connector: &dyn Connector) -> Result<Self> {
        let designator: Designator = designator.parse()?;
        let transport = connector.open(&designator, &config)?;
        Ok(Self::with_transport(transport, config))
    }

    /// Wrap an already open transport
    pub fn with_transport(transport: Box<dyn Transport>, config: ControllerConfig) -> Self {
        info!("✅ Controller ready on {} transport", transport.kind());
        Self {
            transport,
            config,
            reports: Arc::new(ReportSlot::new()),
            pump: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Move one servo to a raw position over `duration_ms`.
    ///
    /// With `wait` set the call sleeps for the move duration before returning.
    pub fn set_position(&mut self, servo_id: u8, position: i32, duration_ms: u16, wait: bool) -> Result<()> {
        self.set_positions(&[(servo_id, position)], duration_ms, wait)
    }

    pub fn set_servo(&mut self, servo: &Servo, duration_ms: u16, wait: bool) -> Result<()> {
        self.set_position(servo.id, servo.position, duration_ms, wait)
    }

    /// Move one servo to an angle in degrees. NaN, infinities and angles
    /// beyond ±120° are rejected before anything is sent.
    pub fn set_angle(&mut self, servo_id: u8, degrees: f32, duration_ms: u16, wait: bool) -> Result<()> {
        let position = units::validate_angle(degrees)?;
        self.set_position(servo_id, i32::from(position), duration_ms, wait)
    }

    /// Move several servos in one command. Every entry is validated before
    /// anything is sent.
    pub fn set_positions(&mut self, servos: &[(u8, i32)], duration_ms: u16, wait: bool) -> Result<()> {
        if servos.is_empty() {
            return Ok(());
        }

        let mut payload = Vec::with_capacity(3 + servos.len() * 3);
        payload.push(batch_count(servos.len())?);
        payload.extend_from_slice(&duration_ms.to_le_bytes());
        for &(id, position) in servos {
            validate_servo_id(id)?;
            let position = units::validate_position(position)?;
            payload.push(id);
            payload.extend_from_slice(&position.to_le_bytes());
        }

        self.send(Command::ServoMove, &payload)?;

        if wait {
            thread::sleep(Duration::from_millis(duration_ms.into()));
        }
        Ok(())
    }

    /// Read one servo's raw position
    pub fn get_position(&mut self, servo_id: u8) -> Result<u16> {
        let positions = self.query_positions(&[servo_id])?;
        Ok(positions[0])
    }

    /// Read one servo's position in degrees
    pub fn get_angle(&mut self, servo_id: u8) -> Result<f32> {
        let position = self.get_position(servo_id)?;
        Ok(units::position_to_angle(position.into()))
    }

    /// Read several servos with one request, filling in `servos[i].position`
    /// in the order given.
    pub fn get_positions(&mut self, servos: &mut [Servo]) -> Result<()> {
        if servos.is_empty() {
            return Ok(());
        }

        let ids: Vec<u8> = servos.iter().map(|s| s.id).collect();
        let positions = self.query_positions(&ids)?;
        for (servo, position) in servos.iter_mut().zip(positions) {
            servo.position = position.into();
        }
        Ok(())
    }

    /// Read several servos in degrees, in the order given
    pub fn get_angles(&mut self, servo_ids: &[u8]) -> Result<Vec<f32>> {
        if servo_ids.is_empty() {
            return Ok(Vec::new());
        }

        let positions = self.query_positions(servo_ids)?;
        Ok(positions
            .into_iter()
            .map(|p| units::position_to_angle(p.into()))
            .collect())
    }

    /// Release holding torque on one servo
    pub fn servo_off(&mut self, servo_id: u8) -> Result<()> {
        self.servo_off_many(&[servo_id])
    }

    pub fn servo_off_servo(&mut self, servo: &Servo) -> Result<()> {
        self.servo_off(servo.id)
    }

    /// Release holding torque on the listed servos
    pub fn servo_off_many(&mut self, servo_ids: &[u8]) -> Result<()> {
        if servo_ids.is_empty() {
            return Ok(());
        }

        for &id in servo_ids {
            validate_servo_id(id)?;
        }
        let mut payload = Vec::with_capacity(1 + servo_ids.len());
        payload.push(batch_count(servo_ids.len())?);
        payload.extend_from_slice(servo_ids);

        self.send(Command::ServoStop, &payload)
    }

    /// Release holding torque on all six servos
    pub fn servo_off_all(&mut self) -> Result<()> {
        self.servo_off_many(&ALL_SERVOS)
    }

    /// Battery voltage in volts. A board that does not answer reads as 0.0.
    pub fn battery_voltage(&mut self) -> Result<f32> {
        self.send(Command::GetBatteryVoltage, &[])?;

        match self.recv(Command::GetBatteryVoltage)? {
            Some(reply) if reply.len() >= 2 => {
                let millivolts = u16::from_le_bytes([reply[0], reply[1]]);
                Ok(f32::from(millivolts) / 1000.0)
            }
            _ => Ok(0.0),
        }
    }

    /// Handle for delivering unsolicited reports from a driver callback
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(Arc::clone(&self.reports), self.config.debug)
    }

    /// Pump unsolicited reports from `reports` into the latest-report slot.
    /// Replaces (and stops) any previously attached source.
    pub fn attach_event_source(&mut self, reports: Receiver<Vec<u8>>) {
        self.pump = Some(EventPump::spawn(reports, self.event_sink()));
    }

    /// Take the latest unsolicited report if one arrived since the last call
    /// or the last command sent
    pub fn latest_report(&self) -> Option<Vec<u8>> {
        self.reports.take()
    }

    pub fn has_new_report(&self) -> bool {
        self.reports.has_new()
    }

    fn query_positions(&mut self, servo_ids: &[u8]) -> Result<Vec<u16>> {
        for &id in servo_ids {
            validate_servo_id(id)?;
        }
        let mut payload = Vec::with_capacity(1 + servo_ids.len());
        payload.push(batch_count(servo_ids.len())?);
        payload.extend_from_slice(servo_ids);

        self.send(Command::GetServoPosition, &payload)?;

        let reply = self
            .recv(Command::GetServoPosition)?
            .ok_or_else(|| Error::receive("Function 'get_position' recv error"))?;

        parse_positions(&reply, servo_ids.len()).ok_or_else(|| {
            Error::receive(format!(
                "position reply of {} bytes does not cover {} servos",
                reply.len(),
                servo_ids.len()
            ))
        })
    }

    fn send(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let report = frame::encode(command, payload)?;

        if self.config.debug {
            debug!("Send Data ({}): {}", payload.len(), hex::encode(payload));
        }

        self.reports.clear_flag();
        self.transport.send(&report)
    }

    /// One bounded wait for a reply to `command`; foreign frames count as no reply
    fn recv(&mut self, command: Command) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.transport.receive(self.config.recv_timeout())? else {
            return Ok(None);
        };

        match frame::decode(&raw, command) {
            Some(payload) => {
                if self.config.debug {
                    debug!("Recv Data: {}", hex::encode(payload));
                }
                Ok(Some(payload.to_vec()))
            }
            None => {
                if self.config.debug {
                    debug!("Ignoring report not addressed to {:?}: {}", command, hex::encode(&raw));
                }
                Ok(None)
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        info!("Controller on {} transport closed", self.transport.kind());
    }
}

fn validate_servo_id(servo_id: u8) -> Result<()> {
    if !(1..=SERVO_COUNT).contains(&servo_id) {
        return Err(Error::validation(format!(
            "Parameter 'servo' must be between 1 and {}, got {}",
            SERVO_COUNT, servo_id
        )));
    }
    Ok(())
}

fn batch_count(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| Error::validation(format!("{} servos do not fit one command", len)))
}

/// Reply layout: `[count, (id, posLo, posHi) * count]`
fn parse_positions(reply: &[u8], expected: usize) -> Option<Vec<u16>> {
    let (&count, entries) = reply.split_first()?;
    if usize::from(count) < expected {
        return None;
    }

    let positions: Vec<u16> = entries
        .chunks_exact(3)
        .take(expected)
        .map(|entry| u16::from_le_bytes([entry[1], entry[2]]))
        .collect();

    (positions.len() == expected).then_some(positions)
}
