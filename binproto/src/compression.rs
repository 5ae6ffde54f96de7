//! Optional payload compression, negotiated with the peer during
//! [`crate::file_transfer::FileTransfer::connect`].
//!
//! Modeled as a small trait so the actual codec stays a pluggable,
//! swappable dependency rather than something this crate implements
//! itself — the peer names an algorithm (`heatshrink`) and a window /
//! lookahead pair; this module's only job is to encode with whatever
//! backs that name, or fall back to raw transfer if it can't.

/// A payload encoder parameterized by the peer-advertised window and
/// lookahead exponents.
pub trait CompressionCodec: Send {
    /// Name as it appears on the wire in `PFT:version:<ver>:<name>,...`.
    fn name(&self) -> &'static str;

    /// Encodes `data` for transmission.
    fn encode(&self, data: &[u8], window: u8, lookahead: u8) -> Vec<u8>;
}

/// `heatshrink`-backed codec, available when the `compression` feature is
/// enabled (the default).
#[cfg(feature = "compression")]
pub struct HeatshrinkCodec;

#[cfg(feature = "compression")]
impl CompressionCodec for HeatshrinkCodec {
    fn name(&self) -> &'static str {
        "heatshrink"
    }

    fn encode(&self, data: &[u8], window: u8, lookahead: u8) -> Vec<u8> {
        heatshrink::encode(data, window, lookahead)
    }
}

/// Returns the codec to use for `algorithm`, or `None` if this build has
/// no encoder for it (the `compression` feature is off, or the peer
/// advertised something this build doesn't support).
pub fn codec_for(algorithm: &str) -> Option<Box<dyn CompressionCodec>> {
    #[cfg(feature = "compression")]
    if algorithm == "heatshrink" {
        return Some(Box::new(HeatshrinkCodec));
    }
    let _ = algorithm;
    None
}

#[cfg(all(test, feature = "compression"))]
mod tests {
    use super::*;

    #[test]
    fn heatshrink_is_available_by_name() {
        let codec = codec_for("heatshrink").expect("heatshrink codec should be available");
        assert_eq!(codec.name(), "heatshrink");
    }

    #[test]
    fn unknown_algorithm_has_no_codec() {
        assert!(codec_for("gzip").is_none());
    }
}
