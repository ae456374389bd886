use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 1024;

/// periodic workers log and reset their profilers after this many samples
pub const SAMPLES_PER_REPORT: usize = 100;

/// Min / average / max over a bounded window of the most recent samples
#[derive(Debug, Clone)]
pub struct AverageMinMax {
    capacity: usize,
    samples: VecDeque<Duration>,
    sum: Duration,
}
impl AverageMinMax {
    pub fn new(capacity: usize) -> AverageMinMax {
        assert!(capacity > 0);
        AverageMinMax {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            sum: Duration::ZERO,
        }
    }

    pub fn add(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = Duration::ZERO;
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().cloned()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().cloned()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.sum / self.samples.len() as u32)
    }
}

/// Measures the time between [Profiler::start] and [Profiler::stop].
///
/// A profiler is owned by whoever does the work being measured, typically one periodic worker.
///  It is not shared. A second `start()` before `stop()` simply restarts the
///  measurement.
#[derive(Debug, Clone)]
pub struct Profiler {
    avg: AverageMinMax,
    started: Option<Instant>,
    print_details: bool,
    enabled: bool,
}

impl Default for Profiler {
    fn default() -> Self {
        Profiler::new()
    }
}

impl Profiler {
    pub fn new() -> Profiler {
        Profiler {
            avg: AverageMinMax::new(DEFAULT_CAPACITY),
            started: None,
            print_details: true,
            enabled: true,
        }
    }

    pub fn details(&self) -> bool {
        self.print_details
    }

    pub fn set_details(&mut self, details: bool) -> &mut Self {
        self.print_details = details;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        if !enabled {
            self.started = None;
        }
        self
    }

    pub fn reset(&mut self) {
        self.started = None;
        self.avg.clear();
    }

    pub fn start(&mut self) {
        if self.enabled {
            self.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.avg.add(started.elapsed());
        }
    }

    /// for adding measurements that were taken elsewhere
    pub fn add_sample(&mut self, sample: Duration) {
        if self.enabled {
            self.avg.add(sample);
        }
    }

    pub fn count(&self) -> usize {
        self.avg.count()
    }

    pub fn should_report(&self, samples_per_report: usize) -> bool {
        self.enabled && self.count() >= samples_per_report
    }
}

impl Display for Profiler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.avg.min(), self.avg.average(), self.avg.max()) {
            (Some(min), Some(avg), Some(max)) => {
                if self.print_details {
                    write!(f, "min/avg/max={:?}/{:?}/{:?}", min, avg, max)
                }
                else {
                    write!(f, "avg={:?}", avg)
                }
            }
            _ => write!(f, "n/a"),
        }
    }
}
