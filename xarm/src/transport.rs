/*!
Serial and USB HID transports.

The controller only ever sees the [`Transport`] trait. Which variant sits
behind it is decided once, when the [`Designator`] is resolved by a
[`Connector`].
*/

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::frame;
use crate::protocol::{RESERVED, SIGNATURE};

/// Which physical link a transport drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Serial,
    UsbHid,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::UsbHid => write!(f, "usb-hid"),
        }
    }
}

/// Byte-level link to the controller board
pub trait Transport: Send {
    /// Which variant this is; used for logging only
    fn kind(&self) -> TransportKind;

    /// Send one outbound report (reserved byte + frame)
    fn send(&mut self, report: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one inbound frame. `None` means nothing arrived.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Parsed construction designator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Designator {
    /// `"COM…"`: serial port with this name
    Serial(String),
    /// `"USB…"`: the HID interface of the board
    Usb,
}

impl FromStr for Designator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("COM") {
            Ok(Self::Serial(s.to_string()))
        } else if s.starts_with("USB") {
            Ok(Self::Usb)
        } else {
            Err(Error::configuration(format!(
                "designator '{}' must start with \"COM\" or \"USB\"",
                s
            )))
        }
    }
}

/// Opens the transport a designator names
pub trait Connector {
    fn open_serial(&self, port: &str, config: &ControllerConfig) -> Result<Box<dyn Transport>>;

    fn open_usb(&self, config: &ControllerConfig) -> Result<Box<dyn Transport>>;

    fn open(&self, designator: &Designator, config: &ControllerConfig) -> Result<Box<dyn Transport>> {
        match designator {
            Designator::Serial(port) => self.open_serial(port, config),
            Designator::Usb => self.open_usb(config),
        }
    }
}

/// Connector for real hardware: `serialport` for COM ports, `hidapi` for USB
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn open_serial(&self, port: &str, config: &ControllerConfig) -> Result<Box<dyn Transport>> {
        let link = serialport::new(port, config.baud_rate)
            .timeout(SERIAL_POLL_INTERVAL)
            .open()
            .map_err(|e| Error::device_open(format!("Failed to open serial port {}: {}", port, e)))?;

        info!("🔌 Serial port {} opened at {} baud", port, config.baud_rate);
        Ok(Box::new(SerialTransport::new(link)))
    }

    #[cfg(feature = "hidapi")]
    fn open_usb(&self, config: &ControllerConfig) -> Result<Box<dyn Transport>> {
        let device = usb::HidApiDevice::open(config.vendor_id, config.product_id)?;
        info!(
            "🔌 USB HID device {:04x}:{:04x} opened",
            config.vendor_id, config.product_id
        );
        Ok(Box::new(HidTransport::new(device, config)))
    }

    #[cfg(not(feature = "hidapi"))]
    fn open_usb(&self, config: &ControllerConfig) -> Result<Box<dyn Transport>> {
        Err(Error::device_open(format!(
            "Failed to open USB HID device {:04x}:{:04x}: built without the `hidapi` feature",
            config.vendor_id, config.product_id
        )))
    }
}

/// Read timeout handed to the serial driver; receive() polls in slices of this
const SERIAL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Frame-oriented transport over a serial byte stream
pub struct SerialTransport<S> {
    link: S,
    pending: Vec<u8>,
}

impl<S: Read + Write + Send> SerialTransport<S> {
    pub fn new(link: S) -> Self {
        Self {
            link,
            pending: Vec::new(),
        }
    }

    /// Pop one complete frame off the reassembly buffer, dropping line noise
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.pending.windows(2).position(|w| w == [SIGNATURE, SIGNATURE]) {
                Some(start) => {
                    self.pending.drain(..start);
                }
                None => {
                    // a lone trailing signature byte may be the start of the next frame
                    let keep = usize::from(self.pending.last() == Some(&SIGNATURE));
                    let noise = self.pending.len() - keep;
                    self.pending.drain(..noise);
                    return None;
                }
            }

            if self.pending.len() < 3 {
                return None;
            }

            match frame::frame_size(&self.pending) {
                Some(size) if self.pending.len() >= size => {
                    return Some(self.pending.drain(..size).collect());
                }
                Some(_) => return None,
                None => {
                    // impossible length byte, resync past this signature
                    self.pending.drain(..1);
                }
            }
        }
    }
}

impl<S: Read + Write + Send> Transport for SerialTransport<S> {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn send(&mut self, report: &[u8]) -> Result<()> {
        // serial frames carry no HID report id
        let frame = report.strip_prefix(&[RESERVED]).unwrap_or(report);
        self.link.write_all(frame)?;
        self.link.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let mut chunk = [0u8; 64];

        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }
            if started.elapsed() >= timeout {
                return Ok(None);
            }

            match self.link.read(&mut chunk) {
                Ok(0) => thread::sleep(Duration::from_millis(1)),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Opaque USB HID device: report-sized writes and timed reads
pub trait HidDevice: Send {
    fn write(&mut self, report: &[u8]) -> io::Result<usize>;

    /// Read one input report; `Ok(0)` on timeout
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn serial_number(&self) -> Option<String> {
        None
    }
}

/// Transport over a USB HID device
pub struct HidTransport<D> {
    device: D,
    report_size: usize,
}

impl<D: HidDevice> HidTransport<D> {
    pub fn new(device: D, config: &ControllerConfig) -> Self {
        if config.debug {
            match device.serial_number() {
                Some(serial) => debug!("Serial number: {}", serial),
                None => debug!("Serial number: <unavailable>"),
            }
        }

        Self {
            device,
            report_size: config.report_size,
        }
    }
}

impl<D: HidDevice> Transport for HidTransport<D> {
    fn kind(&self) -> TransportKind {
        TransportKind::UsbHid
    }

    fn send(&mut self, report: &[u8]) -> Result<()> {
        let written = self.device.write(report)?;
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "HID write accepted no bytes").into());
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.report_size];
        let n = self.device.read_timeout(&mut buf, timeout)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

#[cfg(feature = "hidapi")]
mod usb {
    use std::io;
    use std::time::Duration;

    use super::HidDevice;
    use crate::error::{Error, Result};

    /// `hidapi`-backed handle; closed when dropped
    pub struct HidApiDevice {
        device: hidapi::HidDevice,
    }

    impl HidApiDevice {
        pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
            let api = hidapi::HidApi::new()
                .map_err(|e| Error::device_open(format!("Failed to initialise hidapi: {}", e)))?;
            let device = api.open(vendor_id, product_id).map_err(|e| {
                Error::device_open(format!(
                    "Failed to open USB HID device {:04x}:{:04x}: {}",
                    vendor_id, product_id, e
                ))
            })?;
            Ok(Self { device })
        }
    }

    fn to_io(e: hidapi::HidError) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e.to_string())
    }

    impl HidDevice for HidApiDevice {
        fn write(&mut self, report: &[u8]) -> io::Result<usize> {
            self.device.write(report).map_err(to_io)
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
            self.device.read_timeout(buf, millis).map_err(to_io)
        }

        fn serial_number(&self) -> Option<String> {
            self.device.get_serial_number_string().ok().flatten()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, encode, Command};
    use crate::sim::SimulatedArm;
    use std::collections::VecDeque;

    /// In-memory serial line: reads drain `rx`, writes land in `tx`
    #[derive(Default)]
    struct Loopback {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            // hand out at most three bytes per call to exercise reassembly
            let n = buf.len().min(self.rx.len()).min(3);
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_designator_parsing() {
        assert_eq!("USB".parse::<Designator>().unwrap(), Designator::Usb);
        assert_eq!("USB0".parse::<Designator>().unwrap(), Designator::Usb);
        assert_eq!(
            "COM3".parse::<Designator>().unwrap(),
            Designator::Serial("COM3".to_string())
        );
        let err = "/dev/ttyUSB0".parse::<Designator>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!("usb".parse::<Designator>().is_err());
    }

    #[test]
    fn test_serial_send_strips_report_id() {
        let mut transport = SerialTransport::new(Loopback::default());
        let report = encode(Command::GetBatteryVoltage, &[]).unwrap();
        transport.send(&report).unwrap();
        assert_eq!(transport.link.tx, vec![0x55, 0x55, 2, 15]);
        assert_eq!(transport.kind(), TransportKind::Serial);
    }

    #[test]
    fn test_serial_reassembles_split_frame_after_noise() {
        let mut link = Loopback::default();
        link.rx.extend([0x00, 0x13, 0x55, 0x55, 4, 15, 0x10, 0x27, 0x55]);
        let mut transport = SerialTransport::new(link);

        let frame = transport.receive(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(frame, vec![0x55, 0x55, 4, 15, 0x10, 0x27]);
        assert_eq!(decode(&frame, Command::GetBatteryVoltage), Some(&[0x10, 0x27][..]));

        // the trailing half signature never completes
        assert_eq!(transport.receive(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_serial_resyncs_past_impossible_length() {
        let mut link = Loopback::default();
        // length byte 1 cannot cover a command byte
        link.rx.extend([0x55, 0x55, 1, 0x55, 0x55, 4, 15, 0x10, 0x27]);
        let mut transport = SerialTransport::new(link);

        let frame = transport.receive(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(frame, vec![0x55, 0x55, 4, 15, 0x10, 0x27]);
        assert!(transport.pending.is_empty());
    }

    #[test]
    fn test_serial_huge_timeout_does_not_overflow() {
        let mut link = Loopback::default();
        link.rx.extend([0x55, 0x55, 2, 15]);
        let mut transport = SerialTransport::new(link);

        let frame = transport.receive(Duration::from_millis(u64::MAX)).unwrap();
        assert_eq!(frame, Some(vec![0x55, 0x55, 2, 15]));
    }

    #[test]
    fn test_serial_timeout_returns_none() {
        let mut transport = SerialTransport::new(Loopback::default());
        let started = Instant::now();
        assert_eq!(transport.receive(Duration::from_millis(20)).unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_hid_transport_round_trip() {
        let arm = SimulatedArm::new();
        arm.set_battery_millivolts(7400);
        let mut transport = HidTransport::new(arm.clone(), &ControllerConfig::default());

        transport.send(&encode(Command::GetBatteryVoltage, &[]).unwrap()).unwrap();
        let reply = transport.receive(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(reply.len(), 64);
        assert_eq!(decode(&reply, Command::GetBatteryVoltage), Some(&[0xe8, 0x1c][..]));

        assert_eq!(transport.receive(Duration::from_millis(5)).unwrap(), None);
    }
}
