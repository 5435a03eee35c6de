//! Conversation-log indexer
//!
//! Scans the host's log directory on a timer. Each `*.jsonl` file is one
//! session: newline-delimited records whose message bodies are either plain
//! strings or structured arrays of text parts. Files are re-indexed only
//! when their mtime moves forward; malformed lines are counted and skipped;
//! a corrupt file never halts the scan.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::identity;
use crate::model::{Session, SessionKey, SessionMessage};
use crate::storage::Store;

/// Outcome of one directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub lines_parsed: usize,
    pub lines_skipped: usize,
    pub errors: Vec<String>,
}

/// Timer-driven indexer over the host's conversation logs
pub struct SessionIndexer {
    store: Arc<Store>,
    dir: PathBuf,
    workstation: String,
}

impl SessionIndexer {
    pub fn new(store: Arc<Store>, dir: PathBuf, workstation: String) -> Self {
        Self {
            store,
            dir,
            workstation,
        }
    }

    /// Scan the log directory once. Per-file failures land in the report;
    /// only a missing directory is silently empty.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut stack = vec![self.dir.clone()];

        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if dir != self.dir {
                        report.errors.push(format!("{}: {}", dir.display(), e));
                    }
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                report.files_seen += 1;

                match self.index_file(&path) {
                    Ok(Some((parsed, skipped))) => {
                        report.files_indexed += 1;
                        report.lines_parsed += parsed;
                        report.lines_skipped += skipped;
                    }
                    Ok(None) => report.files_skipped += 1,
                    Err(e) => {
                        report
                            .errors
                            .push(format!("{}: {}", path.display(), e));
                    }
                }
            }
        }

        if report.files_indexed > 0 || !report.errors.is_empty() {
            tracing::info!(
                files_seen = report.files_seen,
                files_indexed = report.files_indexed,
                files_skipped = report.files_skipped,
                lines_skipped = report.lines_skipped,
                errors = report.errors.len(),
                "session scan complete"
            );
        }
        report
    }

    /// Index one log file. `Ok(None)` means the mtime gate skipped it.
    fn index_file(&self, path: &Path) -> Result<Option<(usize, usize)>, String> {
        let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let session_uuid = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if session_uuid.is_empty() {
            return Err("unusable file name".to_string());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;

        let parsed = parse_transcript(&contents);
        let Some(project) = parsed.project else {
            return Err("no cwd in any record".to_string());
        };

        let key = SessionKey::new(&self.workstation, &project, &session_uuid);
        if let Some(existing) = self.store.get_session(&key).map_err(|e| e.to_string())? {
            if existing.source_mtime >= mtime {
                return Ok(None);
            }
        }

        let started_at = parsed
            .messages
            .first()
            .map(|m| m.timestamp)
            .unwrap_or_else(|| Utc.timestamp_opt(mtime, 0).single().unwrap_or_else(Utc::now));

        let session = Session {
            key: key.clone(),
            started_at,
            ended_at: None,
            source_mtime: mtime,
            summary: None,
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            message_count: parsed.messages.len() as i64,
        };
        self.store.upsert_session(&session).map_err(|e| e.to_string())?;
        self.store
            .replace_session_messages(&key, &parsed.messages)
            .map_err(|e| e.to_string())?;

        Ok(Some((parsed.messages.len(), parsed.lines_skipped)))
    }

    /// Scan on `interval` until shutdown flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => break,
            }
            let indexer = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || indexer.scan()).await {
                tracing::warn!("session scan task panicked: {e}");
            }
        }
    }
}

// ============================================================================
// TRANSCRIPT PARSING
// ============================================================================

struct ParsedTranscript {
    project: Option<String>,
    messages: Vec<SessionMessage>,
    input_tokens: i64,
    output_tokens: i64,
    lines_skipped: usize,
}

fn parse_transcript(contents: &str) -> ParsedTranscript {
    let mut parsed = ParsedTranscript {
        project: None,
        messages: vec![],
        input_tokens: 0,
        output_tokens: 0,
        lines_skipped: 0,
    };

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            parsed.lines_skipped += 1;
            continue;
        };

        if parsed.project.is_none() {
            if let Some(cwd) = record.get("cwd").and_then(|v| v.as_str()) {
                parsed.project = Some(identity::project_id(Path::new(cwd)));
            }
        }

        if let Some(usage) = record.pointer("/message/usage") {
            parsed.input_tokens += usage
                .get("input_tokens")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            parsed.output_tokens += usage
                .get("output_tokens")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
        }

        let Some(text) = extract_text(&record) else {
            parsed.lines_skipped += 1;
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }

        let role = record
            .pointer("/message/role")
            .and_then(|v| v.as_str())
            .or_else(|| record.get("type").and_then(|v| v.as_str()))
            .unwrap_or("unknown")
            .to_string();

        let timestamp = record
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        parsed.messages.push(SessionMessage {
            role,
            timestamp,
            text,
        });
    }

    parsed
}

/// Textual content of a message record: a plain string body, or the joined
/// `text` parts of a structured-array body.
fn extract_text(record: &Value) -> Option<String> {
    let content = record.pointer("/message/content")?;
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| {
                    if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                        part.get("text").and_then(|t| t.as_str())
                    } else {
                        None
                    }
                })
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
