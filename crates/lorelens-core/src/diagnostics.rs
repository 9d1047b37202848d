//! Diagnostic sink the vector store reports to.
//!
//! Persistence runs in the background, so its faults cannot reach the caller;
//! they are reported here instead.

/// Receives debug chatter and faults from the store and its background writer.
pub trait DiagnosticSink: Send + Sync {
    fn debug(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to `tracing` under the `lorelens` target. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "lorelens", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "lorelens", "{message}");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::DiagnosticSink;

    /// Keeps every message so tests can assert on what was reported.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub debug: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }
    }

    impl DiagnosticSink for RecordingSink {
        fn debug(&self, message: &str) {
            self.debug.lock().unwrap().push(message.to_string());
        }

        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }
}
