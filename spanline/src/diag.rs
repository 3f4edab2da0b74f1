//! Internal diagnostics.
//!
//! These macros carry the library's own logging. They compile to nothing
//! unless the `internal-logs` feature is enabled, in which case they emit
//! through the [`tracing`](https://crates.io/crates/tracing) facade under the
//! `spanline` target. They are not meant for application logging.

#[macro_export]
#[doc(hidden)]
macro_rules! diag_debug {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        $crate::_private::debug!(target: "spanline", name = $name);
        #[cfg(not(feature = "internal-logs"))]
        let _ = $name;
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        $crate::_private::debug!(target: "spanline", name = $name, $($key = $value),+);
        #[cfg(not(feature = "internal-logs"))]
        let _ = ($name, $($value),+);
    }};
}

#[macro_export]
#[doc(hidden)]
macro_rules! diag_warn {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        $crate::_private::warn!(target: "spanline", name = $name);
        #[cfg(not(feature = "internal-logs"))]
        let _ = $name;
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        $crate::_private::warn!(target: "spanline", name = $name, $($key = $value),+);
        #[cfg(not(feature = "internal-logs"))]
        let _ = ($name, $($value),+);
    }};
}

#[macro_export]
#[doc(hidden)]
macro_rules! diag_error {
    (name: $name:expr $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        $crate::_private::error!(target: "spanline", name = $name);
        #[cfg(not(feature = "internal-logs"))]
        let _ = $name;
    }};
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        $crate::_private::error!(target: "spanline", name = $name, $($key = $value),+);
        #[cfg(not(feature = "internal-logs"))]
        let _ = ($name, $($value),+);
    }};
}

#[cfg(all(test, feature = "internal-logs"))]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::{span, Event, Level, Metadata, Subscriber};

    /// Records the level of every event emitted under the library target.
    struct Recorder {
        levels: Arc<Mutex<Vec<Level>>>,
    }

    impl Subscriber for Recorder {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.target() == "spanline"
        }

        fn new_span(&self, _attrs: &span::Attributes<'_>) -> span::Id {
            span::Id::from_u64(1)
        }

        fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {}

        fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

        fn event(&self, event: &Event<'_>) {
            self.levels.lock().unwrap().push(*event.metadata().level());
        }

        fn enter(&self, _span: &span::Id) {}

        fn exit(&self, _span: &span::Id) {}
    }

    #[test]
    fn macros_emit_at_their_levels_under_the_library_target() {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            levels: Arc::clone(&levels),
        };

        let err = "connection refused";
        tracing::subscriber::with_default(recorder, || {
            crate::diag_debug!(name: "worker.started");
            crate::diag_warn!(name: "queue.full", policy = "drop_incoming");
            crate::diag_error!(name: "export.failed", error = format!("{err}"));
        });

        assert_eq!(
            *levels.lock().unwrap(),
            vec![Level::DEBUG, Level::WARN, Level::ERROR]
        );
    }
}
