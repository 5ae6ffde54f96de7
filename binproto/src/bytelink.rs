//! `ByteLink`: the bidirectional byte-channel abstraction [`crate::transport::Transport`]
//! is built on. A line-buffering [`SerialByteLink`] backs real hardware; a
//! [`LoopbackByteLink`] backs tests, in the spirit of the teacher crate's
//! `LoopbackTransport`.

use crate::error::{Error, Result};
use crate::timer::Timer;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A bidirectional byte channel with blocking read-with-timeout,
/// non-blocking write, input-buffer flush, and reopen.
///
/// The receive task is the sole reader; the send caller is the sole
/// writer. No implementation needs to support concurrent reads or
/// concurrent writes.
pub trait ByteLink: Send {
    /// Blocks up to `timeout` for a newline-terminated line, decoded as
    /// UTF-8 with the trailing newline and any carriage return trimmed.
    /// Returns `Ok(None)` on timeout with no data, `Err` on I/O failure.
    fn read_line_timeout(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Writes `buf` to the link. Expected to return promptly; the link is
    /// byte-paced by the firmware so this never blocks for long.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Discards any buffered, unread input.
    fn flush_input(&mut self) -> Result<()>;

    /// Closes and reopens the underlying channel.
    fn reopen(&mut self) -> Result<()>;

    /// Closes the underlying channel.
    fn close(&mut self);

    /// Returns an independent handle to the same underlying link, so the
    /// receive task can read from its own handle while the send caller
    /// writes through this one. Real serial hardware tolerates a reader
    /// and a writer on distinct handles to the same device; it does not
    /// tolerate two threads sharing one `&mut` handle.
    fn try_clone(&self) -> Result<Box<dyn ByteLink>>;
}

/// Serial-port-backed [`ByteLink`], built on the `serialport` crate.
pub struct SerialByteLink {
    path: String,
    baud: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
    line_buf: Vec<u8>,
}

impl SerialByteLink {
    /// Opens `path` at `baud`, configured 8-N-1 with a 1s read timeout and
    /// a non-blocking (zero) write timeout.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_secs(1))
            .open()?;
        Ok(Self {
            path: path.to_string(),
            baud,
            port: Some(port),
            line_buf: Vec::new(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Protocol("serial port not open".into()))
    }
}

impl ByteLink for SerialByteLink {
    fn read_line_timeout(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Timer::new(timeout.as_millis() as u64);
        let mut byte = [0u8; 1];
        loop {
            if let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.line_buf.drain(..=pos).collect();
                line.pop(); // trailing '\n'
                while line.last() == Some(&b'\r') {
                    line.pop();
                }
                return match String::from_utf8(line) {
                    Ok(s) => Ok(Some(s)),
                    Err(_) => {
                        self.flush_input()?;
                        Ok(None)
                    }
                };
            }
            if deadline.timed_out() {
                return Ok(None);
            }
            let port = self.port_mut()?;
            match port.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => self.line_buf.push(byte[0]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self.port_mut()?, buf)?;
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.line_buf.clear();
        self.port_mut()?.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        self.port = None;
        let port = serialport::new(&self.path, self.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_secs(1))
            .open()?;
        self.port = Some(port);
        self.line_buf.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn try_clone(&self) -> Result<Box<dyn ByteLink>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| Error::Protocol("serial port not open".into()))?
            .try_clone()?;
        Ok(Box::new(SerialByteLink {
            path: self.path.clone(),
            baud: self.baud,
            port: Some(port),
            line_buf: Vec::new(),
        }))
    }
}

type SharedQueue = Arc<Mutex<VecDeque<u8>>>;

/// In-memory [`ByteLink`] for tests. Paired with a [`LoopbackHandle`] that
/// a test uses to play the role of the firmware peer.
pub struct LoopbackByteLink {
    inbound: SharedQueue,
    outbound: SharedQueue,
    line_buf: Vec<u8>,
    open: Arc<Mutex<bool>>,
}

/// The test-side handle to a [`LoopbackByteLink`]'s peer.
#[derive(Clone)]
pub struct LoopbackHandle {
    inbound: SharedQueue,
    outbound: SharedQueue,
    open: Arc<Mutex<bool>>,
}

impl LoopbackByteLink {
    /// Creates a connected `(link, handle)` pair.
    pub fn pair() -> (Self, LoopbackHandle) {
        let inbound: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let outbound: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let open = Arc::new(Mutex::new(true));
        let link = Self {
            inbound: inbound.clone(),
            outbound: outbound.clone(),
            line_buf: Vec::new(),
            open: open.clone(),
        };
        let handle = LoopbackHandle {
            inbound,
            outbound,
            open,
        };
        (link, handle)
    }
}

impl LoopbackHandle {
    /// Queues `line` (without a trailing newline) for the link to read.
    pub fn push_line(&self, line: &str) {
        let mut q = self.inbound.lock().unwrap();
        q.extend(line.as_bytes());
        q.push_back(b'\n');
    }

    /// Drains and returns everything the link has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        let mut q = self.outbound.lock().unwrap();
        q.drain(..).collect()
    }

    /// Simulates the link going away (I/O errors until reopened).
    pub fn sever(&self) {
        *self.open.lock().unwrap() = false;
    }

    /// Simulates the link coming back.
    pub fn restore(&self) {
        *self.open.lock().unwrap() = true;
    }
}

impl ByteLink for LoopbackByteLink {
    fn read_line_timeout(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Timer::new(timeout.as_millis() as u64);
        loop {
            if !*self.open.lock().unwrap() {
                return Err(Error::Io(std::io::Error::new(ErrorKind::NotConnected, "link severed")));
            }
            if let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.line_buf.drain(..=pos).collect();
                line.pop();
                return Ok(Some(String::from_utf8(line).unwrap_or_default()));
            }
            let mut q = self.inbound.lock().unwrap();
            if q.is_empty() {
                drop(q);
                if deadline.timed_out() {
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_micros(50));
                continue;
            }
            self.line_buf.extend(q.drain(..));
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if !*self.open.lock().unwrap() {
            return Err(Error::Io(std::io::Error::new(ErrorKind::NotConnected, "link severed")));
        }
        self.outbound.lock().unwrap().extend(buf.iter().copied());
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.line_buf.clear();
        self.inbound.lock().unwrap().clear();
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        *self.open.lock().unwrap() = true;
        Ok(())
    }

    fn close(&mut self) {
        *self.open.lock().unwrap() = false;
    }

    fn try_clone(&self) -> Result<Box<dyn ByteLink>> {
        Ok(Box::new(LoopbackByteLink {
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
            line_buf: Vec::new(),
            open: self.open.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trips_a_line() {
        let (mut link, handle) = LoopbackByteLink::pair();
        handle.push_line("ok 0");
        let line = link.read_line_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(line, Some("ok 0".to_string()));
    }

    #[test]
    fn loopback_write_is_visible_to_handle() {
        let (mut link, handle) = LoopbackByteLink::pair();
        link.write_all(b"hello").unwrap();
        assert_eq!(handle.take_written(), b"hello");
    }

    #[test]
    fn loopback_read_times_out_with_no_data() {
        let (mut link, _handle) = LoopbackByteLink::pair();
        let line = link.read_line_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(line, None);
    }

    #[test]
    fn severed_link_errors_on_write() {
        let (mut link, handle) = LoopbackByteLink::pair();
        handle.sever();
        assert!(link.write_all(b"x").is_err());
    }

    #[test]
    fn cloned_link_shares_the_same_queues() {
        let (mut link, handle) = LoopbackByteLink::pair();
        let mut reader = link.try_clone().unwrap();
        link.write_all(b"written via original").unwrap();
        assert_eq!(handle.take_written(), b"written via original");

        handle.push_line("ss 7,512,2.0");
        let line = reader.read_line_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(line, Some("ss 7,512,2.0".to_string()));
    }
}
