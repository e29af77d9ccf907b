//! Structured JSONL event sink.
//!
//! Every controller decision worth auditing (sends, capacity rejections,
//! recovery outcomes, advisory changes) is appended as one compact JSON line
//! to the file named by `TURNKEEPER_EVENT_LOG`. The sink is off when the
//! variable is unset and never reports failures to the caller.
//!
//! The first line of each file is a schema header mapping the short keys to
//! their long names. Files rotate by size.

use chrono::Utc;
use serde_json::{Map, Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: u32 = 3;
const DEFAULT_TRUNC_CHARS: usize = 120;

/// How much user message text is copied into events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageVerbosity {
    None,
    Truncated,
    Full,
}

impl MessageVerbosity {
    fn from_env() -> Self {
        match std::env::var("TURNKEEPER_EVENT_LOG_MSG")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "full" => Self::Full,
            "truncated" => Self::Truncated,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventLogConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: u32,
    pub message_verbosity: MessageVerbosity,
    pub truncate_chars: usize,
}

impl EventLogConfig {
    /// Read the sink configuration. `None` when the sink is disabled.
    pub fn from_env() -> Option<Self> {
        let path = std::env::var("TURNKEEPER_EVENT_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)?;
        let max_bytes = std::env::var("TURNKEEPER_EVENT_LOG_MAX_BYTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_BYTES);
        let max_files = std::env::var("TURNKEEPER_EVENT_LOG_MAX_FILES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_FILES);
        let truncate_chars = std::env::var("TURNKEEPER_EVENT_LOG_TRUNC_CHARS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TRUNC_CHARS);

        Some(Self {
            path,
            max_bytes,
            max_files,
            message_verbosity: MessageVerbosity::from_env(),
            truncate_chars,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventFields {
    pub level: &'static str,
    pub source: &'static str,
    pub action: &'static str,
    pub conversation_id: Option<String>,
    pub agent_id: Option<String>,
    pub strategy: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub count: Option<u64>,
    pub message_index: Option<u64>,
    pub message_text: Option<String>,
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn maybe_message_field(cfg: &EventLogConfig, text: Option<&str>) -> Option<String> {
    let txt = text?;
    match cfg.message_verbosity {
        MessageVerbosity::None => None,
        MessageVerbosity::Truncated => Some(truncate_chars(txt, cfg.truncate_chars)),
        MessageVerbosity::Full => Some(txt.to_string()),
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn rotated_path(path: &Path, idx: u32) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), idx))
}

fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: u32) -> std::io::Result<()> {
    if !path.exists() || fs::metadata(path)?.len() < max_bytes {
        return Ok(());
    }
    for idx in (1..max_files).rev() {
        let src = rotated_path(path, idx);
        if src.exists() {
            let _ = fs::rename(&src, rotated_path(path, idx + 1));
        }
    }
    let _ = fs::rename(path, rotated_path(path, 1));
    Ok(())
}

fn schema_header_line() -> String {
    json!({
        "v": 1,
        "k": "h",
        "ts": Utc::now().to_rfc3339(),
        "m": {
            "v": "schema_version",
            "k": "record_kind",
            "ts": "timestamp",
            "lv": "level",
            "src": "source",
            "act": "action",
            "cid": "conversation_id",
            "aid": "agent_id",
            "strat": "strategy",
            "res": "result",
            "err": "error",
            "cnt": "count",
            "idx": "message_index",
            "msg": "message_text"
        }
    })
    .to_string()
}

fn write_header_if_empty(path: &Path) -> std::io::Result<()> {
    let should_write = !path.exists() || fs::metadata(path)?.len() == 0;
    if !should_write {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(schema_header_line().as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn event_line(cfg: &EventLogConfig, fields: EventFields) -> String {
    let mut obj = Map::new();
    obj.insert("v".to_string(), Value::from(1));
    obj.insert("k".to_string(), Value::from("e"));
    obj.insert("ts".to_string(), Value::from(Utc::now().to_rfc3339()));
    obj.insert("lv".to_string(), Value::from(fields.level));
    obj.insert("src".to_string(), Value::from(fields.source));
    obj.insert("act".to_string(), Value::from(fields.action));
    let optional = [
        ("cid", fields.conversation_id),
        ("aid", fields.agent_id),
        ("strat", fields.strategy),
        ("res", fields.result),
        ("err", fields.error),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            obj.insert(key.to_string(), Value::from(v));
        }
    }
    if let Some(v) = fields.count {
        obj.insert("cnt".to_string(), Value::from(v));
    }
    if let Some(v) = fields.message_index {
        obj.insert("idx".to_string(), Value::from(v));
    }
    if let Some(v) = maybe_message_field(cfg, fields.message_text.as_deref()) {
        obj.insert("msg".to_string(), Value::from(v));
    }
    Value::Object(obj).to_string()
}

/// Emit a single structured event.
///
/// Fail-open: a disabled sink, missing required fields, or any I/O error
/// make this a no-op.
pub fn emit_event_best_effort(fields: EventFields) {
    if fields.level.is_empty() || fields.source.is_empty() || fields.action.is_empty() {
        return;
    }
    let Some(cfg) = EventLogConfig::from_env() else {
        return;
    };

    let _ = (|| -> std::io::Result<()> {
        ensure_parent(&cfg.path)?;
        rotate_if_needed(&cfg.path, cfg.max_bytes, cfg.max_files)?;
        write_header_if_empty(&cfg.path)?;

        let line = event_line(&cfg, fields);
        let mut file = OpenOptions::new().create(true).append(true).open(&cfg.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    })();
}
