use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one pipeline cycle. Returned to the caller instead of being kept
/// as process-wide state.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the feed could not be read; novel ingestion was skipped.
    pub feed_error: Option<String>,
    pub candidates: usize,
    pub already_known: usize,
    pub ingested: usize,
    pub content_extracted: usize,
    pub summarized: usize,
    /// Articles that failed a step this cycle and stay queued for backlog repair.
    pub deferred: usize,
    /// Unsummarized articles left over from earlier cycles.
    pub backlog_size: usize,
    /// Backlog articles skipped because they used up their attempts.
    pub abandoned: usize,
}

impl CycleReport {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            feed_error: None,
            candidates: 0,
            already_known: 0,
            ingested: 0,
            content_extracted: 0,
            summarized: 0,
            deferred: 0,
            backlog_size: 0,
            abandoned: 0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.feed_error {
            Some(err) => writeln!(f, "Feed: unavailable ({})", err)?,
            None => writeln!(
                f,
                "Feed: {} entries, {} already stored, {} new",
                self.candidates, self.already_known, self.ingested
            )?,
        }
        writeln!(
            f,
            "Enrichment: {} contents extracted, {} summaries written, {} deferred",
            self.content_extracted, self.summarized, self.deferred
        )?;
        write!(
            f,
            "Backlog: {} carried over from earlier cycles, {} abandoned",
            self.backlog_size, self.abandoned
        )?;
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            write!(f, "\nCompleted in {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)?;
        }
        Ok(())
    }
}
