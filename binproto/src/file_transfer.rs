//! File-transfer application: session open/close with busy-peer
//! recovery, optional compression negotiation, and chunked streaming on
//! top of [`crate::transport::Transport`].

use crate::dispatch::Handler;
use crate::error::{Error, Result};
use crate::timer::Timer;
use crate::transport::Transport;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

const PROTOCOL_ID: u8 = 1;

mod packet {
    pub const QUERY: u8 = 0;
    pub const OPEN: u8 = 1;
    pub const CLOSE: u8 = 2;
    pub const WRITE: u8 = 3;
    pub const ABORT: u8 = 4;
}

/// Compression terms negotiated with the peer during [`FileTransfer::connect`].
#[derive(Debug, Clone)]
pub struct CompressionInfo {
    pub algorithm: String,
    pub window: Option<u8>,
    pub lookahead: Option<u8>,
}

impl Default for CompressionInfo {
    fn default() -> Self {
        Self {
            algorithm: "none".to_string(),
            window: None,
            lookahead: None,
        }
    }
}

/// File-transfer application registered on a [`Transport`] for `PFT:*`
/// (and the wire-compatible `PTF:invalid`) tokens.
pub struct FileTransfer {
    version: String,
    compression: CompressionInfo,
    responses: Receiver<(String, String)>,
}

impl FileTransfer {
    /// Registers the file-transfer response tokens on `transport` and
    /// returns the application handle that owns their dedicated queue.
    pub fn new(transport: &mut Transport) -> Self {
        let (tx, rx) = mpsc::channel();
        transport.register(
            &[
                "PFT:success",
                "PFT:version:",
                "PFT:fail",
                "PFT:busy",
                "PFT:ioerror",
                "PTF:invalid",
            ],
            Handler::Queue(tx),
        );
        Self {
            version: String::new(),
            compression: CompressionInfo::default(),
            responses: rx,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn compression(&self) -> &CompressionInfo {
        &self.compression
    }

    fn await_response(&mut self, timeout: Duration) -> Result<(String, String)> {
        let deadline = Timer::new(timeout.as_millis() as u64);
        loop {
            match self.responses.recv_timeout(Duration::from_millis(1)) {
                Ok(pair) => return Ok(pair),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if deadline.timed_out() {
                        return Err(Error::ReadTimeout);
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(Error::ConnectionLost),
            }
        }
    }

    /// Queries the peer's protocol version and compression support.
    /// Returns `Ok(false)` if the peer answered with something other
    /// than a version handshake.
    pub fn connect(&mut self, transport: &mut Transport) -> Result<bool> {
        transport.send(PROTOCOL_ID, packet::QUERY, &[])?;
        let (token, tail) = self.await_response(transport.response_timeout())?;
        if token != "PFT:version:" {
            return Ok(false);
        }

        let mut parts = tail.splitn(2, ':');
        self.version = parts.next().unwrap_or_default().to_string();
        let compression_spec = parts.next().unwrap_or("none");

        self.compression = if compression_spec == "none" {
            CompressionInfo::default()
        } else {
            let fields: Vec<&str> = compression_spec.split(',').collect();
            match fields.as_slice() {
                [algorithm, window, lookahead] => CompressionInfo {
                    algorithm: algorithm.to_string(),
                    window: window.parse().ok(),
                    lookahead: lookahead.parse().ok(),
                },
                _ => CompressionInfo::default(),
            }
        };

        log::info!(
            "File transfer version: {}, compression: {}",
            self.version,
            self.compression.algorithm
        );
        Ok(true)
    }

    /// Opens `filename` on the peer. Retries on `PFT:busy` by aborting
    /// the stale transfer and resending, within a 5-second deadline.
    pub fn open(
        &mut self,
        transport: &mut Transport,
        filename: &str,
        compression_requested: bool,
        dummy: bool,
    ) -> Result<()> {
        let mut payload = vec![u8::from(dummy), u8::from(compression_requested)];
        payload.extend_from_slice(filename.as_bytes());
        payload.push(0);

        transport.send(PROTOCOL_ID, packet::OPEN, &payload)?;
        let mut deadline = Timer::new(5000);

        loop {
            if deadline.timed_out() {
                return Err(Error::ReadTimeout);
            }
            match self.await_response(Duration::from_millis(1000)) {
                Ok((token, _)) => match token.as_str() {
                    "PFT:success" => {
                        log::info!("Opened file: {filename}");
                        return Ok(());
                    }
                    "PFT:busy" => {
                        log::info!("Broken transfer detected, purging");
                        self.abort(transport)?;
                        std::thread::sleep(Duration::from_millis(100));
                        transport.send(PROTOCOL_ID, packet::OPEN, &payload)?;
                        deadline.reset();
                    }
                    "PFT:fail" => return Err(Error::OpenFailed),
                    _ => {}
                },
                Err(Error::ReadTimeout) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes one block as a single `WRITE` packet.
    pub fn write(&mut self, transport: &mut Transport, data: &[u8]) -> Result<()> {
        transport.send(PROTOCOL_ID, packet::WRITE, data)
    }

    /// Closes the open file on the peer.
    pub fn close(&mut self, transport: &mut Transport) -> Result<()> {
        transport.send(PROTOCOL_ID, packet::CLOSE, &[])?;
        let (token, _) = self.await_response(Duration::from_millis(1000))?;
        match token.as_str() {
            "PFT:success" => log::info!("File closed"),
            "PFT:ioerror" => log::warn!("client storage device I/O error"),
            "PTF:invalid" => log::warn!("no open file"),
            _ => {}
        }
        Ok(())
    }

    /// Aborts whatever transfer the peer currently has open.
    pub fn abort(&mut self, transport: &mut Transport) -> Result<()> {
        transport.send(PROTOCOL_ID, packet::ABORT, &[])?;
        let (token, _) = self.await_response(transport.response_timeout())?;
        if token == "PFT:success" {
            log::info!("Transfer aborted");
        }
        Ok(())
    }

    /// End-to-end transfer: connect, negotiate compression, read `src`,
    /// open `dst` on the peer, optionally compress, stream in
    /// `block_size`-sized chunks with progress logging, then close.
    pub fn copy(
        &mut self,
        transport: &mut Transport,
        src: &Path,
        dst: &str,
        compression_requested: bool,
        dummy: bool,
    ) -> Result<()> {
        if !self.connect(transport)? {
            return Err(Error::Protocol(
                "peer did not answer the version query".to_string(),
            ));
        }

        let use_compression = compression_requested && self.compression.algorithm == "heatshrink";
        if compression_requested && !use_compression {
            log::warn!("Compression not supported by peer");
        }

        let mut data = std::fs::read(src)?;
        let original_size = data.len();

        self.open(transport, dst, use_compression, dummy)?;

        if use_compression {
            if let Some(codec) = crate::compression::codec_for(&self.compression.algorithm) {
                let window = self.compression.window.unwrap_or(8);
                let lookahead = self.compression.lookahead.unwrap_or(4);
                data = codec.encode(&data, window, lookahead);
            }
        }

        let cratio = original_size as f64 / (data.len().max(1) as f64);
        let block_size = (transport.block_size() as usize).max(1);
        let blocks = (data.len() + block_size - 1) / block_size;
        let blocks = blocks.max(1);

        let start = Instant::now();
        for i in 0..blocks {
            let block_start = i * block_size;
            let block_end = (block_start + block_size).min(data.len());
            self.write(transport, &data[block_start..block_end])?;

            let elapsed_ms = start.elapsed().as_millis().max(1) as f64;
            let kibs = (((i + 1) * block_size) as f64 / 1024.0) / elapsed_ms * 1000.0;
            let effective = if use_compression {
                format!(" [{:.2}KiB/s]", kibs * cratio)
            } else {
                String::new()
            };
            log::info!(
                "PROGRESS: {:.2}% {:.2}KiB/s{} Errors: {}",
                (i as f64 / blocks as f64) * 100.0,
                kibs,
                effective,
                transport.errors()
            );
        }

        self.close(transport)?;
        log::info!("Transfer complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytelink::LoopbackByteLink;
    use crate::config::Config;
    use std::io::Write;

    /// Drives a simulated peer against a real `Transport` + `FileTransfer`
    /// pair over a `LoopbackByteLink`: answers QUERY with a version
    /// handshake, OPEN with success, each WRITE with `ok <sync>`, and
    /// CLOSE with success, recording the payload size of every WRITE.
    fn run_simulated_peer(
        handle: crate::bytelink::LoopbackHandle,
        version_line: &'static str,
    ) -> std::thread::JoinHandle<Vec<usize>> {
        std::thread::spawn(move || {
            let mut write_sizes = Vec::new();
            let mut sync: u8 = 0;
            loop {
                let bytes = loop {
                    let bytes = handle.take_written();
                    if !bytes.is_empty() {
                        break bytes;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                };
                let parsed = crate::frame::parse(&bytes).expect("valid frame from transport");
                handle.push_line(&format!("ok {sync}"));
                sync = sync.wrapping_add(1);

                match parsed.packet_type {
                    0 => handle.push_line(version_line),
                    1 => handle.push_line("PFT:success"),
                    3 => write_sizes.push(parsed.payload.len()),
                    2 => {
                        handle.push_line("PFT:success");
                        return write_sizes;
                    }
                    _ => {}
                }
            }
        })
    }

    /// S6: a 4097-byte file with `block_size=1024` transfers as exactly
    /// five WRITE packets sized 1024,1024,1024,1024,1, bracketed by one
    /// OPEN and one CLOSE.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn copy_chunks_file_into_expected_block_sizes() {
        let dir = std::env::temp_dir();
        let src_path = dir.join(format!("binproto-test-src-{}", std::process::id()));
        let mut f = std::fs::File::create(&src_path).unwrap();
        f.write_all(&vec![0x42u8; 4097]).unwrap();
        drop(f);

        let (link, handle) = LoopbackByteLink::pair();
        let mut transport = Transport::new(Box::new(link), Config::new().with_block_size(1024)).unwrap();
        transport.set_max_block_size_for_test(1024 * 1024);
        let mut ft = FileTransfer::new(&mut transport);

        let peer = run_simulated_peer(handle, "PFT:version:1.0:none");

        ft.copy(&mut transport, &src_path, "dest.bin", false, false)
            .unwrap();

        let write_sizes = peer.join().unwrap();
        assert_eq!(write_sizes, vec![1024, 1024, 1024, 1024, 1]);

        std::fs::remove_file(&src_path).ok();
    }

    /// Like `run_simulated_peer`, but corrupts every third frame it
    /// receives (flips one byte) instead of acking it, simulating line
    /// noise on the wire. A frame that fails both checksums is
    /// indistinguishable from one that never arrived, so the peer drops it
    /// and waits for `Transport`'s retransmit — it never acks a corrupted
    /// frame and never records a `WRITE`'s payload twice.
    fn run_simulated_peer_with_corruption(
        handle: crate::bytelink::LoopbackHandle,
        version_line: &'static str,
    ) -> std::thread::JoinHandle<Vec<usize>> {
        std::thread::spawn(move || {
            let mut write_sizes = Vec::new();
            let mut sync: u8 = 0;
            let mut attempt: u32 = 0;
            loop {
                let mut bytes = loop {
                    let bytes = handle.take_written();
                    if !bytes.is_empty() {
                        break bytes;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                };

                attempt += 1;
                if attempt % 3 == 0 {
                    let mid = bytes.len() / 2;
                    bytes[mid] ^= 0xAA;
                }

                let Ok(parsed) = crate::frame::parse(&bytes) else {
                    continue;
                };
                handle.push_line(&format!("ok {sync}"));
                sync = sync.wrapping_add(1);

                match parsed.packet_type {
                    0 => handle.push_line(version_line),
                    1 => handle.push_line("PFT:success"),
                    3 => write_sizes.push(parsed.payload.len()),
                    2 => {
                        handle.push_line("PFT:success");
                        return write_sizes;
                    }
                    _ => {}
                }
            }
        })
    }

    /// §4.3.3 / §8 item 5: under injected corruption (`p < 1`), `copy`
    /// still completes and the peer sees each block exactly once, in
    /// order — same 4097-byte / 1024-block-size shape as S6, but every
    /// third physical transmission (across QUERY/OPEN/WRITE/CLOSE) arrives
    /// corrupted and must be silently retried rather than acked or
    /// double-counted.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn copy_completes_despite_injected_corruption() {
        let dir = std::env::temp_dir();
        let src_path = dir.join(format!("binproto-test-src-corrupt-{}", std::process::id()));
        let mut f = std::fs::File::create(&src_path).unwrap();
        f.write_all(&vec![0x42u8; 4097]).unwrap();
        drop(f);

        let (link, handle) = LoopbackByteLink::pair();
        let config = Config::new()
            .with_block_size(1024)
            .with_response_timeout_ms(50)
            .with_simerr(0.3);
        let mut transport = Transport::new(Box::new(link), config).unwrap();
        transport.set_max_block_size_for_test(1024 * 1024);
        let mut ft = FileTransfer::new(&mut transport);

        let peer = run_simulated_peer_with_corruption(handle, "PFT:version:1.0:none");

        ft.copy(&mut transport, &src_path, "dest.bin", false, false)
            .unwrap();

        let write_sizes = peer.join().unwrap();
        assert_eq!(write_sizes, vec![1024, 1024, 1024, 1024, 1]);
        assert!(transport.errors() >= 1, "the injected corruption must register as at least one retransmit error");

        std::fs::remove_file(&src_path).ok();
    }
}
