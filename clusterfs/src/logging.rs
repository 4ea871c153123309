//! The logging capability handed to [`Disk`](crate::Disk) and
//! [`FileSystem`](crate::FileSystem).
//!
//! The file system never reaches for a global logger on its own. Callers pass an
//! [`EventLog`] at construction time, which wraps any [`log::Log`] implementation
//! (for instance an `env_logger::Logger`). [`EventLog::facade`] wraps whatever is
//! installed in the `log` facade and is what the plain constructors use.

use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};

/// Emits a leveled event through an [`EventLog`], tagging it with the calling module.
///
/// `event!(self.log, Info, "formatted {} bytes", size)`
macro_rules! event {
    ($log:expr, $level:ident, $($arg:tt)+) => {
        $log.emit(::log::Level::$level, module_path!(), format_args!($($arg)+))
    };
}

/// Forwards records to the logger installed in the `log` facade.
struct Facade;

impl Log for Facade {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

/// A cheaply cloneable, write-only handle onto a log sink.
#[derive(Clone)]
pub struct EventLog {
    sink: Arc<dyn Log>,
}

impl EventLog {
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self { sink }
    }

    /// Routes events to the process wide `log` facade.
    pub fn facade() -> Self {
        Self::new(Arc::new(Facade))
    }

    pub fn emit(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder().level(level).target(target).build();
        if !self.sink.enabled(&metadata) {
            return;
        }
        self.sink
            .log(&Record::builder().metadata(metadata).args(args).build());
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::facade()
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures every record so tests can assert on emitted events.
    #[derive(Default)]
    pub struct Recorder {
        pub records: Mutex<Vec<(Level, String)>>,
    }

    impl Recorder {
        pub fn contains(&self, level: Level, needle: &str) -> bool {
            self.records
                .lock()
                .unwrap()
                .iter()
                .any(|(l, msg)| *l == level && msg.contains(needle))
        }
    }

    impl Log for Recorder {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            self.records
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    #[test]
    fn emitted_events_reach_the_sink() {
        let recorder = Arc::new(Recorder::default());
        let log = EventLog::new(recorder.clone());

        event!(log, Warn, "bitmap has {} stray bits", 3);

        assert!(recorder.contains(Level::Warn, "bitmap has 3 stray bits"));
    }
}
