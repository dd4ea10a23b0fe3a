use std::sync::{Arc, Mutex};

type Sink = Arc<dyn Fn(f64) + Send + Sync + 'static>;

/// Forwards 0-100 progress values to a caller-supplied sink, never going backwards.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Option<Sink>,
    last: Arc<Mutex<f64>>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            sink: Some(Arc::new(sink)),
            last: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn silent() -> Self {
        Self {
            sink: None,
            last: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn report(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 100.0);

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if value < *last {
            return;
        }
        *last = value;
        drop(last);

        if let Some(sink) = &self.sink {
            sink(value);
        }
    }

    pub fn current(&self) -> f64 {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A view that maps fractions in `0.0..=1.0` onto `start..=end` of this reporter.
    pub fn range(&self, start: f64, end: f64) -> ProgressRange {
        ProgressRange {
            reporter: self.clone(),
            start,
            end,
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}

#[derive(Clone)]
pub struct ProgressRange {
    reporter: ProgressReporter,
    start: f64,
    end: f64,
}

impl ProgressRange {
    pub fn report_fraction(&self, fraction: f64) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.reporter
            .report(self.start + (self.end - self.start) * fraction);
    }

    pub fn sub_range(&self, from: f64, to: f64) -> ProgressRange {
        let span = self.end - self.start;
        ProgressRange {
            reporter: self.reporter.clone(),
            start: self.start + span * from.clamp(0.0, 1.0),
            end: self.start + span * to.clamp(0.0, 1.0),
        }
    }

    pub fn finish(&self) {
        self.report_fraction(1.0);
    }

    /// Latest overall value of the underlying reporter.
    pub fn current(&self) -> f64 {
        self.reporter.current()
    }
}
