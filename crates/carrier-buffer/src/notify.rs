//! Rotation notifications.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, SecondsFormat};

use crate::paths;

/// Receives the path of every file a rotation leaves behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Notifier {
    /// Discards notifications.
    #[default]
    Void,
    /// Appends `timestamp\tpath` lines to a journal file.
    File {
        /// Journal location; created when missing.
        journal: PathBuf,
    },
}

impl Notifier {
    /// Reports that a rotated file now lives at `path`.
    pub fn notify(&self, path: &Path) -> io::Result<()> {
        self.notify_at(path, &paths::now())
    }

    /// Reports `path` with an explicit timestamp.
    pub fn notify_at(&self, path: &Path, at: &DateTime<FixedOffset>) -> io::Result<()> {
        match self {
            Self::Void => Ok(()),
            Self::File { journal } => {
                let line = format!(
                    "{}\t{}\n",
                    at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    path.display()
                );
                let mut file = OpenOptions::new().create(true).append(true).open(journal)?;
                file.write_all(line.as_bytes())
            }
        }
    }

    /// Short name used in logs and config summaries.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::File { .. } => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .and_then(|tz| tz.with_ymd_and_hms(2024, 2, 29, 12, 0, 5).single())
            .expect("valid time")
    }

    #[test]
    fn void_does_nothing() {
        Notifier::Void
            .notify_at(Path::new("/nowhere"), &noon())
            .expect("void never fails");
    }

    #[test]
    fn file_appends_lines() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let journal = tmp.path().join("rotations.log");
        let notifier = Notifier::File {
            journal: journal.clone(),
        };

        notifier.notify_at(Path::new("/logs/a-01.log"), &noon()).expect("notify");
        notifier.notify_at(Path::new("/logs/b-01.log"), &noon()).expect("notify");

        let content = std::fs::read_to_string(&journal).expect("read");
        assert_eq!(
            content,
            "2024-02-29T12:00:05+02:00\t/logs/a-01.log\n2024-02-29T12:00:05+02:00\t/logs/b-01.log\n"
        );
    }

    #[test]
    fn missing_journal_directory_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let notifier = Notifier::File {
            journal: tmp.path().join("missing/rotations.log"),
        };
        assert!(notifier.notify_at(Path::new("x"), &noon()).is_err());
    }
}
