//! Process-wide tracing setup for binaries that embed the crate.
//!
//! Every [`StreamingSession::run`](crate::StreamingSession::run) executes in a
//! `session` span carrying `session_id` and `message_id`. Both outputs attach
//! that span to each event and log one line when the span closes, so a whole
//! turn can be followed by its ids.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "chat-stream.logs.jsonl";

/// Where log events go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogOutput {
    Disabled,
    /// Compact lines on stderr; stdout stays free for transcript output.
    Console,
    JsonFile(PathBuf),
}

#[derive(Debug)]
struct LogSettings {
    output: LogOutput,
    level: Option<String>,
    fallback: Option<String>,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("CHAT_STREAM_LOG")
            .and_then(|value| parse_flag(&value))
            .unwrap_or(true);
        let output = if !enabled {
            LogOutput::Disabled
        } else {
            match lookup("CHAT_STREAM_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
                Some(path) => LogOutput::JsonFile(PathBuf::from(path.trim())),
                None => LogOutput::Console,
            }
        };
        Self {
            output,
            level: lookup("CHAT_STREAM_LOG_LEVEL"),
            fallback: lookup("RUST_LOG"),
        }
    }

    /// First directive set that parses: the crate override, `RUST_LOG`, then `info`.
    fn env_filter(&self) -> EnvFilter {
        [self.level.as_deref(), self.fallback.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a log file path into the directory and file name the appender wants.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file)
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `CHAT_STREAM_LOG`: `0`/`false`/`no`/`off` disables logging.
/// - `CHAT_STREAM_LOG_LEVEL`: filter directives (`debug`, `chat_stream=debug`, ...).
/// - `RUST_LOG`: used when the override is absent or does not parse.
/// - `CHAT_STREAM_JSON_LOG_PATH`: write JSONL to this file instead of stderr.
///
/// Does nothing if another global subscriber is already installed.
pub fn init_tracing() {
    INIT.get_or_init(|| install(LogSettings::from_lookup(|key| std::env::var(key).ok())));
}

fn install(settings: LogSettings) {
    let filter = settings.env_filter();
    match settings.output {
        LogOutput::Disabled => {}
        LogOutput::Console => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
        }
        LogOutput::JsonFile(path) => {
            let (dir, file) = split_log_path(&path);
            if let Err(err) = std::fs::create_dir_all(&dir) {
                eprintln!("chat-stream: cannot create log directory {}: {err}", dir.display());
            }
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, file));
            let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> LogSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn defaults_to_console() {
        assert_eq!(settings(&[]).output, LogOutput::Console);
    }

    #[test]
    fn flag_disables_output_even_with_json_path() {
        let s = settings(&[
            ("CHAT_STREAM_LOG", " OFF "),
            ("CHAT_STREAM_JSON_LOG_PATH", "logs/chat.jsonl"),
        ]);
        assert_eq!(s.output, LogOutput::Disabled);
        assert_eq!(settings(&[("CHAT_STREAM_LOG", "maybe")]).output, LogOutput::Console);
    }

    #[test]
    fn json_path_selects_file_output() {
        let s = settings(&[("CHAT_STREAM_JSON_LOG_PATH", "logs/chat.jsonl")]);
        assert_eq!(s.output, LogOutput::JsonFile(PathBuf::from("logs/chat.jsonl")));
        assert_eq!(
            settings(&[("CHAT_STREAM_JSON_LOG_PATH", "  ")]).output,
            LogOutput::Console
        );
    }

    #[test]
    fn filter_falls_back_past_unparseable_override() {
        let s = settings(&[
            ("CHAT_STREAM_LOG_LEVEL", "chat_stream=loud"),
            ("RUST_LOG", "chat_stream=debug"),
        ]);
        assert_eq!(s.env_filter().to_string(), "chat_stream=debug");
        assert_eq!(settings(&[]).env_filter().to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn log_path_splits_into_dir_and_file() {
        assert_eq!(
            split_log_path(Path::new("logs/chat.jsonl")),
            (PathBuf::from("logs"), "chat.jsonl".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("chat.jsonl")),
            (PathBuf::from("."), "chat.jsonl".to_string())
        );
    }

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
        assert!(INIT.get().is_some());
    }
}
