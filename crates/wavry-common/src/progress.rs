//! Progress reporting for long-running file/folder transfers (§9
//! Design Notes, "progress callbacks").

use crate::error::CoreError;

/// A single progress notification the File Transfer Engine emits as a
/// send or receive advances.
#[derive(Debug, Clone)]
pub enum Progress {
    /// Transfer began; `total_bytes` is the full size as declared in
    /// the header.
    Started { total_bytes: u64 },
    /// `bytes_done` have been sent or received so far (cumulative, not
    /// a delta).
    Advanced { bytes_done: u64 },
    /// Transfer finished successfully.
    Completed,
    /// Transfer failed; carries the error that ended it.
    Failed(String),
    /// Transfer was cancelled by the local caller.
    Cancelled,
}

impl Progress {
    pub fn failed(err: &CoreError) -> Self {
        Progress::Failed(err.to_string())
    }
}

/// Implemented by whatever wants to watch a transfer's progress — a
/// CLI spinner, a GUI progress bar, or a test harness recording every
/// event. The engine holds a `Box<dyn ProgressObserver>` rather than a
/// generic type parameter so different transfers can be driven by
/// different observers without the File Transfer Engine becoming
/// generic over them.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: Progress);
}

/// An observer that drops every event; the default when the caller
/// does not care to watch a transfer.
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _event: Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingObserver {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, event: Progress) {
            self.events.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[test]
    fn observer_records_events_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let observer = RecordingObserver {
            events: events.clone(),
        };
        observer.on_progress(Progress::Started { total_bytes: 100 });
        observer.on_progress(Progress::Advanced { bytes_done: 50 });
        observer.on_progress(Progress::Completed);
        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 3);
        assert!(recorded[0].contains("100"));
        assert!(recorded[2].contains("Completed"));
    }

    #[test]
    fn null_observer_does_not_panic() {
        NullObserver.on_progress(Progress::Cancelled);
    }
}
