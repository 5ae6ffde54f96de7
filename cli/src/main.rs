//! Thin CLI wrapper around [`binproto`]: opens a serial link, runs the
//! file-transfer handshake, and streams one file to the peer.

use binproto::{Config, Error, FileTransfer, SerialByteLink, Transport};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Transfer a file to an embedded peer over a framed serial protocol.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the file to send.
    source_path: PathBuf,

    /// Destination filename on the peer.
    dest_path: String,

    /// Serial device path, e.g. /dev/ttyUSB0.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// Baud rate.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Requested payload block size in bytes, clamped to the peer's
    /// advertised maximum once synchronized.
    #[arg(long = "block-size", default_value_t = 512)]
    block_size: u32,

    /// Request heatshrink compression if the peer supports it.
    #[arg(long)]
    compression: bool,

    /// Dummy transfer: peer consumes but discards payload bytes.
    #[arg(long)]
    dummy: bool,

    /// Per-attempt response timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout: u64,

    /// Fault-injection probability in [0, 1], for exercising the resend
    /// path against a real or simulated peer.
    #[arg(long, default_value_t = 0.0)]
    simerr: f64,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("transfer failed: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::ConnectionLost => 1,
        Error::FatalError => 2,
        Error::PayloadOverflow | Error::SynchronizationError | Error::Protocol(_) => 3,
        Error::ReadTimeout | Error::OpenFailed => 3,
        Error::Io(_) => 4,
    }
}

async fn run(args: Args) -> binproto::Result<()> {
    let config = Config::new()
        .with_baud(args.baud)
        .with_block_size(args.block_size)
        .with_response_timeout_ms(args.timeout)
        .with_simerr(args.simerr)
        .with_compression(args.compression)
        .with_dummy(args.dummy);

    let link = SerialByteLink::open(&args.device, config.baud)?;
    let mut transport = Transport::new(Box::new(link), config.clone())?;
    binproto::EchoApp::register(&mut transport);

    transport.connect()?;
    let mut file_transfer = FileTransfer::new(&mut transport);

    file_transfer.copy(
        &mut transport,
        &args.source_path,
        &args.dest_path,
        config.compression,
        config.dummy,
    )?;

    transport.disconnect()?;
    transport.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["binproto-cli", "src.bin", "dest.bin"]).unwrap();
        assert_eq!(args.device, "/dev/ttyUSB0");
        assert_eq!(args.baud, 115_200);
        assert_eq!(args.block_size, 512);
        assert_eq!(args.timeout, 1000);
        assert_eq!(args.simerr, 0.0);
        assert!(!args.compression);
        assert!(!args.dummy);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "binproto-cli",
            "src.bin",
            "dest.bin",
            "--device",
            "/dev/ttyACM0",
            "--baud",
            "250000",
            "--block-size",
            "1024",
            "--compression",
            "--dummy",
            "--timeout",
            "2000",
            "--simerr",
            "0.1",
        ])
        .unwrap();
        assert_eq!(args.device, "/dev/ttyACM0");
        assert_eq!(args.baud, 250_000);
        assert_eq!(args.block_size, 1024);
        assert!(args.compression);
        assert!(args.dummy);
        assert_eq!(args.timeout, 2000);
        assert_eq!(args.simerr, 0.1);
    }

    #[test]
    fn missing_required_positional_is_rejected() {
        assert!(Args::try_parse_from(["binproto-cli", "src.bin"]).is_err());
    }

    #[test]
    fn exit_codes_match_documented_mapping() {
        assert_eq!(exit_code_for(&Error::ConnectionLost), 1);
        assert_eq!(exit_code_for(&Error::FatalError), 2);
        assert_eq!(exit_code_for(&Error::PayloadOverflow), 3);
        assert_eq!(exit_code_for(&Error::SynchronizationError), 3);
        assert_eq!(exit_code_for(&Error::ReadTimeout), 3);
        assert_eq!(exit_code_for(&Error::OpenFailed), 3);
        assert_eq!(
            exit_code_for(&Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x"))),
            4
        );
    }
}
