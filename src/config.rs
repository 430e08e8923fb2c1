use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from ontask.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub log: LogConfig,
    pub window: WindowConfig,
    pub decision: DecisionConfig,
    pub oracle: OracleConfig,
    pub mailbox: MailboxConfig,
    pub task: TaskConfig,
    pub questions: QuestionsConfig,
    pub relay: RelayConfig,
}

/// How new log lines are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Re-read the log on a fixed interval.
    Polling,
    /// Re-read the log whenever the filesystem reports a change.
    Reactive,
}

/// Where the tailer starts reading when the monitor comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAt {
    /// Skip existing content, only report lines appended from now on.
    End,
    /// Treat the whole file as unseen.
    Beginning,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub path: PathBuf,
    pub mode: SourceMode,
    pub poll_interval_secs: u64,
    pub start_at: StartAt,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Maximum number of events kept as evaluation context.
    pub capacity: usize,
    /// Number of events since the last evaluation that forces a new one.
    pub batch_size: usize,
    /// Phrases that trigger an immediate evaluation (case-insensitive).
    pub suspicious_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum oracle confidence before an intervention is sent.
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub max_tokens: u32,
    pub probe_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub instruction: Option<String>,
    pub checklist: Option<PathBuf>,
    pub adopt_first_event: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuestionsConfig {
    pub enabled: bool,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Operator relay command and arguments. Empty disables the relay.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// Errors produced while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl MonitorConfig {
    /// Load config from `path`. A missing file yields the defaults; a file that
    /// exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: MonitorConfig = toml::from_str(contents)?;
        config.expand_paths();
        Ok(config)
    }

    /// Expand a leading `~/` in every configured path.
    pub fn expand_paths(&mut self) {
        self.log.path = expand_home(&self.log.path);
        self.mailbox.path = expand_home(&self.mailbox.path);
        if let Some(checklist) = self.task.checklist.take() {
            self.task.checklist = Some(expand_home(&checklist));
        }
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.capacity == 0 {
            return Err(ConfigError::Invalid("window.capacity must be at least 1".into()));
        }
        if self.window.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "window.batch_size must be at least 1".into(),
            ));
        }
        check_unit_interval("decision.threshold", self.decision.threshold)?;
        check_unit_interval(
            "questions.confidence_threshold",
            self.questions.confidence_threshold,
        )?;
        if self.log.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "log.poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "oracle.timeout_secs must be at least 1".into(),
            ));
        }
        if !self.relay.command.is_empty() && self.relay.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "relay.timeout_secs must be at least 1".into(),
            ));
        }
        if self.oracle.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("oracle.base_url is empty".into()));
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 0.0 and 1.0 (got {value})"
        )));
    }
    Ok(())
}

/// Expand `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

// --- Default implementations ---

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: expand_home(Path::new("~/.claude/history.jsonl")),
            mode: SourceMode::Polling,
            poll_interval_secs: 5,
            start_at: StartAt::End,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            batch_size: 3,
            suspicious_patterns: [
                "i'll monitor",
                "i will monitor",
                "i'll check",
                "i will check",
                "later on",
                "in the future",
                "i'll watch",
                "i will watch",
                "i'll track",
                "i will track",
                "continuously",
                "ongoing",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "devstral-latest".to_string(),
            api_key: None,
            timeout_secs: 60,
            temperature: 0.3,
            max_tokens: 500,
            probe_on_start: true,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/ontask-intervention.txt"),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            instruction: None,
            checklist: None,
            adopt_first_event: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
        }
    }
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.95,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window.capacity, 10);
        assert_eq!(config.window.batch_size, 3);
        assert_eq!(config.decision.threshold, 0.7);
        assert_eq!(config.log.mode, SourceMode::Polling);
        assert_eq!(config.log.start_at, StartAt::End);
        assert!(config.relay.command.is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
[window]
capacity = 4

[log]
path = "/var/log/agent.jsonl"
mode = "reactive"
"#,
        )
        .unwrap();
        assert_eq!(config.window.capacity, 4);
        assert_eq!(config.window.batch_size, 3);
        assert!(!config.window.suspicious_patterns.is_empty());
        assert_eq!(config.log.path, PathBuf::from("/var/log/agent.jsonl"));
        assert_eq!(config.log.mode, SourceMode::Reactive);
        assert_eq!(config.log.poll_interval_secs, 5);
        assert_eq!(config.oracle.model, "devstral-latest");
    }

    #[test]
    fn full_file_parses() {
        let config = MonitorConfig::from_toml(
            r#"
[log]
path = "/tmp/history.jsonl"
poll_interval_secs = 2
start_at = "beginning"

[window]
capacity = 20
batch_size = 5
suspicious_patterns = ["will get back to you"]

[decision]
threshold = 0.8

[oracle]
base_url = "http://127.0.0.1:9000/v1"
model = "judge"
api_key = "sk-test"
timeout_secs = 10

[mailbox]
path = "/tmp/box.txt"

[task]
instruction = "fix the parser"
checklist = "/tmp/TODO.md"
adopt_first_event = false

[questions]
enabled = false
confidence_threshold = 0.9

[relay]
command = ["notify-operator", "--wait"]
timeout_secs = 60
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.log.start_at, StartAt::Beginning);
        assert_eq!(config.window.suspicious_patterns, vec!["will get back to you"]);
        assert_eq!(config.oracle.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.task.instruction.as_deref(), Some("fix the parser"));
        assert_eq!(config.task.checklist, Some(PathBuf::from("/tmp/TODO.md")));
        assert!(!config.questions.enabled);
        assert_eq!(config.relay.command.len(), 2);
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = MonitorConfig::from_toml("[log]\nmode = \"inotify\"\n").unwrap_err();
        assert!(err.to_string().contains("inotify") || err.to_string().contains("variant"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = MonitorConfig::default();
        config.window.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("window.capacity"));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut config = MonitorConfig::default();
        config.decision.threshold = 1.5;
        assert!(config.validate().is_err());
        config.decision.threshold = -0.1;
        assert!(config.validate().is_err());
        config.decision.threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn relay_without_timeout_rejected() {
        let mut config = MonitorConfig::default();
        config.relay.command = vec!["ask".to_string()];
        config.relay.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.window.capacity, 10);
    }

    #[test]
    fn load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ontask.toml");
        std::fs::write(&path, "[window\ncapacity = ").unwrap();
        let err = MonitorConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home(Path::new("/etc/ontask.toml")),
            PathBuf::from("/etc/ontask.toml")
        );
    }

    #[test]
    fn expand_home_replaces_tilde() {
        if let Some(home) = dirs_next::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/.claude/history.jsonl")),
                home.join(".claude/history.jsonl")
            );
        }
    }
}
