/// One-slot file mailbox shared by the monitor (writer) and the prompt hook
/// (reader).
///
/// Writes go to a temp file in the same directory and are renamed over the
/// mailbox, so a reader sees either the old content or the new content, never
/// a mix. Reads claim the file by renaming it away first, so one message is
/// delivered at most once even if two hooks race.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug)]
pub enum MailboxError {
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Claim {
        path: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Another monitor holds the lock for this mailbox.
    Locked { path: PathBuf },
}

impl std::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxError::Write { path, source } => {
                write!(f, "failed to write mailbox {}: {source}", path.display())
            }
            MailboxError::Read { path, source } => {
                write!(f, "failed to read mailbox {}: {source}", path.display())
            }
            MailboxError::Claim { path, source } => {
                write!(f, "failed to claim mailbox {}: {source}", path.display())
            }
            MailboxError::Lock { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            MailboxError::Locked { path } => write!(
                f,
                "another monitor is already running (lock held on {})",
                path.display()
            ),
        }
    }
}

impl std::error::Error for MailboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MailboxError::Write { source, .. }
            | MailboxError::Read { source, .. }
            | MailboxError::Claim { source, .. }
            | MailboxError::Lock { source, .. } => Some(source),
            MailboxError::Locked { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    path: PathBuf,
}

impl Mailbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Atomically replace the mailbox content. An unread message is overwritten.
    pub fn write(&self, message: &str) -> Result<(), MailboxError> {
        let write_err = |source| MailboxError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self.dir();
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(message.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        tracing::debug!(path = %self.path.display(), bytes = message.len(), "mailbox written");
        Ok(())
    }

    /// Pending message, if any, without consuming it.
    pub fn peek(&self) -> Result<Option<String>, MailboxError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(non_empty(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(MailboxError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Take the pending message, leaving an empty mailbox behind.
    ///
    /// A missing mailbox counts as empty. Calling this twice after one write
    /// returns the message once and then `None`.
    pub fn read_and_clear(&self) -> Result<Option<String>, MailboxError> {
        let claim = self.claim_path();
        match std::fs::rename(&self.path, &claim) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MailboxError::Claim {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        let read = std::fs::read(&claim);
        if let Err(e) = std::fs::remove_file(&claim) {
            tracing::warn!(error = %e, path = %claim.display(), "failed to remove claimed mailbox");
        }
        self.recreate_empty();

        let bytes = read.map_err(|source| MailboxError::Read {
            path: claim.clone(),
            source,
        })?;
        Ok(non_empty(bytes))
    }

    /// Put back an empty mailbox unless the monitor already wrote a new one.
    fn recreate_empty(&self) {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "failed to recreate empty mailbox")
            }
        }
    }

    fn claim_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mailbox".to_string());
        self.dir()
            .join(format!(".{name}.claim.{}", std::process::id()))
    }
}

fn non_empty(bytes: Vec<u8>) -> Option<String> {
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Exclusive lock ensuring a single monitor writes to a mailbox.
/// Released when dropped.
#[derive(Debug)]
pub struct MonitorLock {
    _file: File,
    path: PathBuf,
}

impl MonitorLock {
    /// Lock `<mailbox>.lock`, failing with [`MailboxError::Locked`] if another
    /// monitor already holds it.
    pub fn acquire(mailbox: &Mailbox) -> Result<Self, MailboxError> {
        let mut lock_name = mailbox.path().as_os_str().to_owned();
        lock_name.push(".lock");
        let path = PathBuf::from(lock_name);

        let lock_err = |source| MailboxError::Lock {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(mailbox.dir()).map_err(lock_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;

        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self { _file: file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(MailboxError::Locked { path })
            }
            Err(source) => Err(MailboxError::Lock { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
