//! Host-side driver for the `PFT` binary file-transfer protocol.
//!
//! A framed packet transport (checksummed header + payload, monotonic sync
//! ids, resend-on-timeout) carries a small file-transfer application to an
//! embedded peer that answers with line-delimited ASCII tokens.

pub mod checksum;
pub mod bytelink;
pub mod compression;
pub mod config;
pub mod dispatch;
pub mod echo;
pub mod error;
pub mod file_transfer;
pub mod frame;
pub mod timer;
pub mod transport;

pub use bytelink::{ByteLink, LoopbackByteLink, SerialByteLink};
pub use config::Config;
pub use echo::EchoApp;
pub use error::{Error, Result};
pub use file_transfer::FileTransfer;
pub use transport::Transport;
