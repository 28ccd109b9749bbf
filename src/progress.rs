//! Fetch and build progress reporting.
//!
//! Reports observable progress during `gdx fetch` and `gdx build` so users
//! can see how far a long run has got. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

use gamedex_core::models::ResourceKind;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// `n` of `total` IDs settled against the upstream API.
    Fetching {
        kind: ResourceKind,
        n: u64,
        total: u64,
    },
    /// A snapshot file was read and merged.
    Merging {
        kind: ResourceKind,
        file: String,
        records: u64,
    },
    /// Output file `n` of `total` written.
    Writing {
        kind: ResourceKind,
        file: String,
        n: u64,
        total: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "fetch items  1,200 / 5,000 ids".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Fetching { kind, n, total } => format!(
                "fetch {}  {} / {} ids\n",
                kind,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Merging {
                kind,
                file,
                records,
            } => format!(
                "build {}  merged {} ({} records)\n",
                kind,
                file,
                format_number(*records)
            ),
            ProgressEvent::Writing {
                kind,
                file,
                n,
                total,
            } => format!("build {}  wrote {}  ({} / {})\n", kind, file, n, total),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Fetching { kind, n, total } => serde_json::json!({
                "event": "progress",
                "kind": kind.slug(),
                "phase": "fetching",
                "n": n,
                "total": total
            }),
            ProgressEvent::Merging {
                kind,
                file,
                records,
            } => serde_json::json!({
                "event": "progress",
                "kind": kind.slug(),
                "phase": "merging",
                "file": file,
                "records": records
            }),
            ProgressEvent::Writing {
                kind,
                file,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "kind": kind.slug(),
                "phase": "writing",
                "file": file,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "invalid progress mode '{}': expected off, human, or json",
                other
            )),
        }
    }
}
