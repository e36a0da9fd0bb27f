//! Rate-limited incident reporting.
//!
//! Per-frame failures can repeat at frame rate. Each incident key is logged at
//! most once per window; repeats inside the window are counted and the count
//! is attached to the next line that gets through.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_REPORT_WINDOW: Duration = Duration::from_secs(5);

struct Incident {
    last_logged: Instant,
    suppressed: u64,
}

pub struct IncidentReporter {
    source: &'static str,
    window: Duration,
    incidents: HashMap<String, Incident>,
}

impl IncidentReporter {
    pub fn new(source: &'static str, window: Duration) -> Self {
        Self {
            source,
            window,
            incidents: HashMap::new(),
        }
    }

    /// Log `detail` under `key` unless the key was logged within the window.
    /// Returns whether a line was written.
    pub fn report(&mut self, key: &str, detail: &dyn fmt::Display) -> bool {
        self.report_at(Instant::now(), key, detail)
    }

    pub fn report_at(&mut self, now: Instant, key: &str, detail: &dyn fmt::Display) -> bool {
        let suppressed = match self.incidents.get_mut(key) {
            Some(incident) if now.saturating_duration_since(incident.last_logged) < self.window => {
                incident.suppressed += 1;
                return false;
            }
            Some(incident) => {
                incident.last_logged = now;
                std::mem::take(&mut incident.suppressed)
            }
            None => {
                self.incidents.insert(
                    key.to_string(),
                    Incident {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                0
            }
        };
        if suppressed > 0 {
            log::warn!(
                "{}: {}: {} ({} similar suppressed)",
                self.source,
                key,
                detail,
                suppressed
            );
        } else {
            log::warn!("{}: {}: {}", self.source, key, detail);
        }
        true
    }

    /// Repeats of `key` held back since it was last logged.
    pub fn suppressed(&self, key: &str) -> u64 {
        self.incidents
            .get(key)
            .map(|incident| incident.suppressed)
            .unwrap_or(0)
    }
}
