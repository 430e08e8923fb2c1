/// Forwarding agent questions to a human operator.
///
/// [`CommandRelay`] runs an operator-supplied command (a chat bot bridge, a
/// desktop prompt, ...) with the question as JSON on stdin and takes its
/// trimmed stdout as the reply.
use crate::config::RelayConfig;
use serde::Serialize;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// What the operator is shown.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelayRequest {
    pub question: String,
    pub task: Option<String>,
    /// The oracle's answer, offered as a default.
    pub suggestion: Option<String>,
    pub suggestion_confidence: f64,
}

#[derive(Debug)]
pub enum RelayError {
    Spawn { source: std::io::Error },
    Io { source: std::io::Error },
    Timeout(Duration),
    Failed { code: Option<i32> },
    NoReply,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Spawn { source } => write!(f, "failed to start relay command: {source}"),
            RelayError::Io { source } => write!(f, "relay command I/O failed: {source}"),
            RelayError::Timeout(after) => {
                write!(f, "no reply from operator within {}s", after.as_secs())
            }
            RelayError::Failed { code } => match code {
                Some(code) => write!(f, "relay command exited with status {code}"),
                None => write!(f, "relay command was killed by a signal"),
            },
            RelayError::NoReply => write!(f, "relay command produced no reply"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Spawn { source } | RelayError::Io { source } => Some(source),
            _ => None,
        }
    }
}

pub trait HumanRelay: Send + Sync + 'static {
    /// Ask the operator and wait for a reply.
    fn ask(&self, request: &RelayRequest) -> impl Future<Output = Result<String, RelayError>> + Send;
}

#[derive(Debug, Clone)]
pub struct CommandRelay {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRelay {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// `None` when no relay command is configured.
    pub fn from_config(config: &RelayConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        Some(Self::new(
            program.clone(),
            args.to_vec(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    async fn run(&self, payload: Vec<u8>) -> Result<String, RelayError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::Spawn { source: e })?;

        // The deadline covers writing the request as well as the reply.
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                match stdin.write_all(&payload).await {
                    Ok(()) => {}
                    // The command may not care about the request body.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(RelayError::Io { source: e }),
                }
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| RelayError::Io { source: e })
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(RelayError::Failed {
                code: output.status.code(),
            });
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reply.is_empty() {
            return Err(RelayError::NoReply);
        }
        Ok(reply)
    }
}

impl HumanRelay for CommandRelay {
    fn ask(&self, request: &RelayRequest) -> impl Future<Output = Result<String, RelayError>> + Send {
        let payload = serde_json::to_vec(request);
        async move {
            let payload = payload.map_err(|e| RelayError::Io {
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            tracing::info!(program = %self.program, "forwarding question to operator");
            self.run(payload).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandRelay {
        CommandRelay::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    fn request() -> RelayRequest {
        RelayRequest {
            question: "Should I drop the legacy table?".to_string(),
            task: Some("Migrate users to the new schema".to_string()),
            suggestion: Some("Keep it until the backfill is verified.".to_string()),
            suggestion_confidence: 0.6,
        }
    }

    #[test]
    fn test_from_config() {
        assert!(CommandRelay::from_config(&RelayConfig::default()).is_none());

        let config = RelayConfig {
            command: vec!["notify-operator".to_string(), "--wait".to_string()],
            timeout_secs: 30,
        };
        let relay = CommandRelay::from_config(&config).unwrap();
        assert_eq!(relay.program, "notify-operator");
        assert_eq!(relay.args, vec!["--wait"]);
        assert_eq!(relay.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_reply_is_trimmed_stdout() {
        let relay = sh("cat > /dev/null; echo '  keep the table  '", Duration::from_secs(5));
        assert_eq!(relay.ask(&request()).await.unwrap(), "keep the table");
    }

    #[tokio::test]
    async fn test_request_sent_as_json() {
        let relay = sh("cat", Duration::from_secs(5));
        let reply = relay.ask(&request()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["question"], "Should I drop the legacy table?");
        assert_eq!(value["task"], "Migrate users to the new schema");
        assert_eq!(value["suggestion_confidence"], 0.6);
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let relay = sh("sleep 5", Duration::from_millis(200));
        let err = relay.ask(&request()).await.unwrap_err();
        assert!(matches!(err, RelayError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_request() {
        let relay = sh("sleep 5", Duration::from_millis(200));
        let mut req = request();
        req.task = Some("x".repeat(512 * 1024));

        let started = std::time::Instant::now();
        let err = relay.ask(&req).await.unwrap_err();
        assert!(matches!(err, RelayError::Timeout(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_failure_status() {
        let relay = sh("exit 3", Duration::from_secs(5));
        let err = relay.ask(&request()).await.unwrap_err();
        assert!(matches!(err, RelayError::Failed { code: Some(3) }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_empty_reply() {
        let relay = sh("true", Duration::from_secs(5));
        assert!(matches!(
            relay.ask(&request()).await.unwrap_err(),
            RelayError::NoReply
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let relay = CommandRelay::new("/nonexistent/relay-bin", Vec::new(), Duration::from_secs(1));
        assert!(matches!(
            relay.ask(&request()).await.unwrap_err(),
            RelayError::Spawn { .. }
        ));
    }
}
