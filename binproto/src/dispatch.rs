//! Token-prefix dispatch table shared by the receive task.
//!
//! `applications` is an ordered list of `(prefixes, handler)`; the first
//! registration with a prefix that byte-wise matches the start of a line
//! wins. Longer, more specific prefixes must be registered ahead of
//! shorter ones that would otherwise shadow them (see the `PFT:` /
//! `PFT:version:` precedence scenario in the transport tests).

use std::sync::mpsc::Sender;

/// A registered response handler. Variant-tagged rather than a uniform
/// dynamically-typed callable so the receive task can tell at a glance
/// whether a match feeds the transport's own ack queue or an application.
pub enum Handler {
    /// Enqueues `(matched_prefix, remainder)` for a consumer elsewhere
    /// (the transport's send-task ack loop, or an application's own
    /// response queue).
    Queue(Sender<(String, String)>),

    /// Runs inline, on the receive task, with no queuing. Used by
    /// handlers like [`crate::echo::EchoApp`] that have no ack
    /// semantics to synchronize with a sender.
    Inline(Box<dyn FnMut(&str, &str) + Send>),
}

impl Handler {
    fn invoke(&mut self, prefix: &str, remainder: &str) {
        match self {
            Handler::Queue(tx) => {
                let _ = tx.send((prefix.to_string(), remainder.to_string()));
            }
            Handler::Inline(f) => f(prefix, remainder),
        }
    }
}

/// The ordered registration table the receive task dispatches against.
#[derive(Default)]
pub struct Dispatch {
    applications: Vec<(Vec<String>, Handler)>,
}

impl Dispatch {
    pub fn new() -> Self {
        Self {
            applications: Vec::new(),
        }
    }

    /// Appends `(prefixes, handler)`. Registration order is match
    /// precedence order: first match wins.
    pub fn register(&mut self, prefixes: &[&str], handler: Handler) {
        self.applications
            .push((prefixes.iter().map(|s| s.to_string()).collect(), handler));
    }

    /// Dispatches `line` to the first registration with a matching
    /// prefix. Returns `true` if something matched.
    pub fn dispatch(&mut self, line: &str) -> bool {
        for (prefixes, handler) in &mut self.applications {
            for prefix in prefixes.iter() {
                if line.as_bytes().starts_with(prefix.as_bytes()) {
                    handler.invoke(prefix, &line[prefix.len()..]);
                    return true;
                }
            }
        }
        false
    }
}
