/// External checklist state: a markdown file of `- [ ]` / `- [x]` items the
/// agent (or the operator) keeps up to date while working.
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checklist {
    pub pending: Vec<String>,
    pub completed: Vec<String>,
}

impl Checklist {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.completed.is_empty()
    }

    /// Parse markdown task-list items. Other lines are ignored.
    pub fn parse(text: &str) -> Self {
        let mut checklist = Checklist::default();
        for line in text.lines() {
            let line = line.trim_start();
            let Some(rest) = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
            else {
                continue;
            };

            let (done, item) = if let Some(item) = rest.strip_prefix("[ ]") {
                (false, item)
            } else if let Some(item) = rest
                .strip_prefix("[x]")
                .or_else(|| rest.strip_prefix("[X]"))
            {
                (true, item)
            } else {
                continue;
            };

            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if done {
                checklist.completed.push(item.to_string());
            } else {
                checklist.pending.push(item.to_string());
            }
        }
        checklist
    }

    /// Read the checklist at `path`. A missing or unreadable file is treated
    /// as no checklist.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Checklist::default(),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read checklist");
                Checklist::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pending_and_completed() {
        let text = "\
# Plan

- [x] write the parser
- [ ] wire it into the CLI
  - [X] nested done item
* [ ] star bullets count too
- plain bullet
- [ ]
";
        let list = Checklist::parse(text);
        assert_eq!(
            list.pending,
            vec!["wire it into the CLI", "star bullets count too"]
        );
        assert_eq!(list.completed, vec!["write the parser", "nested done item"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(Checklist::parse("").is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Checklist::load(&dir.path().join("TODO.md")).is_empty());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TODO.md");
        std::fs::write(&path, "- [ ] ship it\n").unwrap();
        assert_eq!(Checklist::load(&path).pending, vec!["ship it"]);
    }
}
