//! `EchoProtocol` analogue: registers the `echo:` prefix and logs
//! whatever the peer echoed back. Used by callers to confirm a link is
//! alive and synchronized without going through file transfer.

use crate::dispatch::Handler;
use crate::transport::Transport;

/// Registers an inline `echo:` handler on `transport` that logs the
/// echoed text at info level.
pub struct EchoApp;

impl EchoApp {
    /// Installs the handler. Call once per `Transport`.
    pub fn register(transport: &mut Transport) {
        transport.register(
            &["echo:"],
            Handler::Inline(Box::new(|_prefix, rest| {
                log::info!("echo: {rest}");
            })),
        );
    }
}
