/*!
# xArm Controller Driver

Host-side driver for the six-servo xArm controller board. The board speaks a
small framed command protocol over either a serial link or a USB HID
interface; this crate encodes the commands, correlates replies by command
code and converts raw servo units to degrees.

## Core Types

- [`Controller`] - Public command layer (move, read, stop, battery)
- [`Command`] - Protocol command codes
- [`Servo`] - Servo id / position pair
- [`ControllerConfig`] - Construction-time settings

## Modules

- [`frame`] - Frame encoding and reply decoding
- [`units`] - Raw position / angle conversion
- [`transport`] - Serial and USB HID transports
- [`events`] - Unsolicited report intake
- [`sim`] - In-process simulated arm
- [`error`] - Common error types
*/

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod frame;
pub mod sim;
pub mod transport;
pub mod units;

// Re-export commonly used types
pub use config::ControllerConfig;
pub use controller::{Controller, Servo};
pub use error::{Error, Result};
pub use events::{EventPump, EventSink, ReportSlot};
pub use frame::Command;
pub use transport::{Connector, Designator, SystemConnector, Transport, TransportKind};

/// Version information for the driver library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// HID report id prefixed to every outbound report
    pub const RESERVED: u8 = 0x00;

    /// Signature byte, sent twice at the start of every frame
    pub const SIGNATURE: u8 = 0x55;

    /// Bytes preceding the payload in an inbound frame (sig, sig, len, cmd)
    pub const HEADER_LEN: usize = 4;

    /// The length byte counts the payload plus itself and the command byte
    pub const LENGTH_OVERHEAD: usize = 2;

    /// Largest payload whose length still fits the single length byte
    pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - LENGTH_OVERHEAD;

    /// Number of servos on the arm, ids 1..=6
    pub const SERVO_COUNT: u8 = 6;

    /// Lowest and highest raw servo position
    pub const POSITION_MIN: i32 = 0;
    pub const POSITION_MAX: i32 = 1000;

    /// USB identifiers of the controller board
    pub const USB_VENDOR_ID: u16 = 0x0483;
    pub const USB_PRODUCT_ID: u16 = 0x5750;

    /// HID input report size in bytes
    pub const REPORT_SIZE: usize = 64;

    /// Default reply timeout in milliseconds
    pub const RECV_TIMEOUT_MS: u64 = 50;
}
