//! Run configuration shared between the CLI and library consumers.

use std::time::Duration;

/// Default response timeout, in milliseconds, used when a caller doesn't
/// override it.
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_BLOCK_SIZE: u32 = 512;
const DEFAULT_BAUD: u32 = 115_200;

/// Tunables for a [`crate::transport::Transport`]/[`crate::file_transfer::FileTransfer`] run.
#[derive(Debug, Clone)]
pub struct Config {
    pub baud: u32,
    pub block_size: u32,
    pub response_timeout: Duration,
    pub simerr: f64,
    pub compression: bool,
    pub dummy: bool,
}

impl Config {
    /// Returns a config with the protocol's defaults.
    pub fn new() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            block_size: DEFAULT_BLOCK_SIZE,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            simerr: 0.0,
            compression: false,
            dummy: false,
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_response_timeout_ms(mut self, millis: u64) -> Self {
        self.response_timeout = Duration::from_millis(millis);
        self
    }

    /// Clamps to `[0, 1]`, matching the transport construction-time clamp.
    pub fn with_simerr(mut self, simerr: f64) -> Self {
        self.simerr = simerr.clamp(0.0, 1.0);
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_dummy(mut self, dummy: bool) -> Self {
        self.dummy = dummy;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
