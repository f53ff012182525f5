//! Reindex progress reporting.
//!
//! Reports what `nrag reindex` is doing (loading a corpus, annotating
//! documents, embedding spans) so operators can see how much is left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for reindex.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReindexProgressEvent {
    /// Walking and reading a corpus root. Total unknown.
    Loading { corpus: String },
    /// n documents annotated out of total.
    Annotating { n: u64, total: u64 },
    /// n spans embedded out of total.
    Embedding { corpus: String, n: u64, total: u64 },
}

/// Reports reindex progress. Implementations write to stderr (human or JSON).
pub trait ReindexProgressReporter: Send + Sync {
    fn report(&self, event: ReindexProgressEvent);
}

/// Human-friendly progress on stderr: "reindex documents  embedding  1,234 / 5,000 spans".
pub struct StderrProgress;

impl ReindexProgressReporter for StderrProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let line = match &event {
            ReindexProgressEvent::Loading { corpus } => {
                format!("reindex {}  loading...\n", corpus)
            }
            ReindexProgressEvent::Annotating { n, total } => format!(
                "reindex documents  annotating  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
            ReindexProgressEvent::Embedding { corpus, n, total } => format!(
                "reindex {}  embedding  {} / {} spans\n",
                corpus,
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ReindexProgressReporter for JsonProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &ReindexProgressEvent) -> serde_json::Value {
    match event {
        ReindexProgressEvent::Loading { corpus } => serde_json::json!({
            "event": "progress",
            "corpus": corpus,
            "phase": "loading"
        }),
        ReindexProgressEvent::Annotating { n, total } => serde_json::json!({
            "event": "progress",
            "corpus": "documents",
            "phase": "annotating",
            "n": n,
            "total": total
        }),
        ReindexProgressEvent::Embedding { corpus, n, total } => serde_json::json!({
            "event": "progress",
            "corpus": corpus,
            "phase": "embedding",
            "n": n,
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ReindexProgressReporter for NoProgress {
    fn report(&self, _event: ReindexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ReindexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_events_carry_phase() {
        let obj = event_json(&ReindexProgressEvent::Embedding {
            corpus: "entities".into(),
            n: 3,
            total: 10,
        });
        assert_eq!(obj["phase"], "embedding");
        assert_eq!(obj["corpus"], "entities");
        assert_eq!(obj["total"], 10);
    }
}
