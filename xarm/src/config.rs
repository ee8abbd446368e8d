/*!
Construction-time controller settings.
*/

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{RECV_TIMEOUT_MS, REPORT_SIZE, USB_PRODUCT_ID, USB_VENDOR_ID};

/// Settings fixed when a [`Controller`](crate::Controller) is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Emit hex dumps of every sent and received payload
    pub debug: bool,

    /// How long a read waits for a reply, in milliseconds
    pub recv_timeout_ms: u64,

    /// HID input report size in bytes
    pub report_size: usize,

    /// USB vendor id of the controller board
    pub vendor_id: u16,

    /// USB product id of the controller board
    pub product_id: u16,

    /// Serial link baud rate
    pub baud_rate: u32,
}

impl ControllerConfig {
    /// Default settings with debug tracing switched on or off
    pub fn with_debug(debug: bool) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }

    /// Reply timeout as a `Duration`
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            recv_timeout_ms: RECV_TIMEOUT_MS,
            report_size: REPORT_SIZE,
            vendor_id: USB_VENDOR_ID,
            product_id: USB_PRODUCT_ID,
            baud_rate: 9600,
        }
    }
}
