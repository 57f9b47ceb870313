//! Link Protocol Constants

use std::time::Duration;

// Inbound framing
pub const LINE_TERMINATOR: u8 = 0x0A;
pub const READ_CHUNK_SIZE: usize = 2048;
pub const DEFAULT_FRAME_CAPACITY: usize = 2048;

// Data pump pacing
pub const MAX_PACE_INTERVAL: Duration = Duration::from_millis(100);

// Service records
pub const SECURE_SERVICE_NAME: &str = "TetherSecure";
pub const INSECURE_SERVICE_NAME: &str = "TetherInsecure";

/// Serial Port Profile UUID
pub const SECURE_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";
pub const INSECURE_SERVICE_UUID: &str = "8CE255C0-200A-11E0-AC64-0800200C9A66";

// Notices surfaced through the event sink
pub const NOTICE_DIAL_FAILED: &str = "Unable to connect device";
pub const NOTICE_CONNECTION_LOST: &str = "Device connection was lost";
pub const NOTICE_WRITE_FAILED: &str = "Unable to send data";
