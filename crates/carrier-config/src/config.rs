//! Server configuration.
//!
//! Configuration is read from a JSON file. Every section is optional and
//! falls back to the defaults below; unknown keys and unknown enum values are
//! rejected while parsing, everything else by [`Config::validate`].
//!
//! ```json
//! {
//!   "compression": { "method": "zstd", "level": 3 },
//!   "buffers": { "input": 131072, "framing": 262144 },
//!   "workers": { "ingest": 16, "flushers": 4, "flush_interval_secs": 30 },
//!   "files": { "root": "/var/log/carrier", "root_mode": "0755",
//!              "name": "${dir}?/${name}",
//!              "rotation": "${dir}?/${name}-${time|%Y.%m.%d-%H}" },
//!   "links": { "root": "/var/log/by-group", "name": "${group}/${name}",
//!              "rotation": "${group}/${name}-${time|%Y.%m.%d-%H}" },
//!   "logrotate": { "method": "both", "interval_secs": 3600 },
//!   "notifier": { "type": "file", "path": "/var/log/carrier/rotated" },
//!   "state_file": "/var/lib/carrier/state",
//!   "logging": { "level": "info" }
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use carrier_buffer::{BuffererKind, FileSettings, LinkSettings, Notifier, PathTemplate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Default template of the active file.
pub const DEFAULT_NAME_TEMPLATE: &str = "${dir}?/${name}";

/// Default template rotated files are renamed to.
pub const DEFAULT_ROTATION_TEMPLATE: &str = "${dir}?/${name}-${time|%Y.%m.%d-%H}";

/// Largest zstd compression level.
pub const MAX_ZSTD_LEVEL: i32 = 22;

// ============================================================================
// Closed value sets
// ============================================================================

/// How stream data is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Plain text.
    #[default]
    Raw,
    /// Zstandard frames.
    Zstd,
}

impl CompressionMethod {
    /// Pipeline variant implementing this method.
    pub const fn bufferer_kind(self) -> BuffererKind {
        match self {
            Self::Raw => BuffererKind::Raw,
            Self::Zstd => BuffererKind::Zstd,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Zstd => f.write_str("zstd"),
        }
    }
}

/// Which rotation triggers are honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMethod {
    /// Every stream rotates on a fixed interval.
    #[default]
    Periodic,
    /// Streams rotate only when asked to.
    Guided,
    /// Both of the above.
    Both,
}

impl RotationMethod {
    /// Whether the interval timer runs.
    pub const fn allows_periodic(self) -> bool {
        matches!(self, Self::Periodic | Self::Both)
    }

    /// Whether explicit rotation requests are accepted.
    pub const fn allows_guided(self) -> bool {
        matches!(self, Self::Guided | Self::Both)
    }
}

impl fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Periodic => f.write_str("periodic"),
            Self::Guided => f.write_str("guided"),
            Self::Both => f.write_str("both"),
        }
    }
}

/// Where rotation events are reported.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    /// Nowhere.
    #[default]
    Void,
    /// Appended to a journal file.
    File {
        /// Journal location.
        path: PathBuf,
    },
}

// ============================================================================
// Sections
// ============================================================================

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Output format.
    pub method: CompressionMethod,
    /// Zstandard level, 1 to 22.
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Raw,
            level: carrier_buffer::DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// Buffer and queue sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// Line buffer size in bytes.
    pub input: usize,
    /// Frame buffer size in bytes.
    pub framing: usize,
    /// Records queued per ingest shard before senders block.
    pub ingest_queue: usize,
    /// Guided rotation requests queued before senders block.
    pub rotation_queue: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            input: carrier_buffer::DEFAULT_LINE_BUFFER_SIZE,
            framing: carrier_buffer::DEFAULT_FRAME_BUFFER_SIZE,
            ingest_queue: 1024,
            rotation_queue: 512,
        }
    }
}

/// Worker pool sizes and timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Ingest shards.
    pub ingest: usize,
    /// Periodic flush workers.
    pub flushers: usize,
    /// Guided rotation workers.
    pub rotators: usize,
    /// Seconds between flush ticks.
    pub flush_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ingest: 16,
            flushers: 4,
            rotators: 4,
            flush_interval_secs: 30,
        }
    }
}

/// Log file placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Directory every log file lives under.
    pub root: PathBuf,
    /// Permissions of created directories; a number or an octal string.
    #[serde(with = "octal")]
    pub root_mode: u32,
    /// Template of the active file.
    pub name: String,
    /// Template rotated files are renamed to.
    pub rotation: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./logs"),
            root_mode: 0o755,
            name: DEFAULT_NAME_TEMPLATE.to_string(),
            rotation: DEFAULT_ROTATION_TEMPLATE.to_string(),
        }
    }
}

/// Optional symlink tree mirroring the log files.
///
/// `root`, `name` and `rotation` are either all empty, which disables the
/// tree, or all set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinksConfig {
    /// Directory every link lives under.
    pub root: PathBuf,
    /// Permissions of created directories.
    #[serde(with = "octal")]
    pub root_mode: u32,
    /// Template of the link to the active file.
    pub name: String,
    /// Template of the link to a rotated file.
    pub rotation: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            root_mode: 0o755,
            name: String::new(),
            rotation: String::new(),
        }
    }
}

impl LinksConfig {
    /// Whether the links tree is configured.
    pub fn enabled(&self) -> bool {
        !self.root.as_os_str().is_empty()
    }

    fn check(&self) -> Result<()> {
        let keys = [
            ("links.root", self.root.as_os_str().is_empty()),
            ("links.name", self.name.is_empty()),
            ("links.rotation", self.rotation.is_empty()),
        ];
        let empty = keys.iter().find(|(_, empty)| *empty);
        let set = keys.iter().find(|(_, empty)| !*empty);
        if let (Some((empty, _)), Some((set, _))) = (empty, set) {
            return Err(invalid(format!(
                "links.* must be either all empty or all set: {empty} is empty and {set} is not"
            )));
        }
        if !self.enabled() {
            return Ok(());
        }
        check_mode("links.root_mode", self.root_mode)?;
        parse_template("links.name", &self.name)?;
        parse_template("links.rotation", &self.rotation)?;
        Ok(())
    }
}

/// Rotation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogrotateConfig {
    /// Accepted triggers.
    pub method: RotationMethod,
    /// Seconds between periodic rotations.
    pub interval_secs: u64,
}

impl Default for LogrotateConfig {
    fn default() -> Self {
        Self {
            method: RotationMethod::Periodic,
            interval_secs: 3600,
        }
    }
}

/// Diagnostics of the server itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, as accepted by `RUST_LOG`.
    pub level: String,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Compression settings.
    pub compression: CompressionConfig,
    /// Buffer sizes.
    pub buffers: BufferConfig,
    /// Worker pools.
    pub workers: WorkerConfig,
    /// Log file placement.
    pub files: FileConfig,
    /// Symlink tree mirroring the log files.
    pub links: LinksConfig,
    /// Rotation settings.
    pub logrotate: LogrotateConfig,
    /// Rotation journal.
    pub notifier: NotifierConfig,
    /// Checkpoint written at shutdown and restored at startup.
    pub state_file: PathBuf,
    /// Server diagnostics.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression: CompressionConfig::default(),
            buffers: BufferConfig::default(),
            workers: WorkerConfig::default(),
            files: FileConfig::default(),
            links: LinksConfig::default(),
            logrotate: LogrotateConfig::default(),
            notifier: NotifierConfig::default(),
            state_file: PathBuf::from("./logs/.carrier-state"),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parses and validates configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or a value is rejected.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value that parsing alone can not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("buffers.input", self.buffers.input),
            ("buffers.framing", self.buffers.framing),
            ("buffers.ingest_queue", self.buffers.ingest_queue),
            ("buffers.rotation_queue", self.buffers.rotation_queue),
            ("workers.ingest", self.workers.ingest),
            ("workers.flushers", self.workers.flushers),
            ("workers.rotators", self.workers.rotators),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(format!("{key} must be greater than 0")));
            }
        }
        for (key, value) in [("buffers.input", self.buffers.input), ("buffers.framing", self.buffers.framing)] {
            if u32::try_from(value).is_err() {
                return Err(invalid(format!("{key} must fit in 32 bits")));
            }
        }
        if self.workers.flush_interval_secs == 0 {
            return Err(invalid("workers.flush_interval_secs must be greater than 0"));
        }
        if self.logrotate.interval_secs == 0 {
            return Err(invalid("logrotate.interval_secs must be greater than 0"));
        }

        if !(1..=MAX_ZSTD_LEVEL).contains(&self.compression.level) {
            return Err(invalid(format!(
                "compression.level must be between 1 and {MAX_ZSTD_LEVEL}, got {}",
                self.compression.level
            )));
        }

        if self.files.root.as_os_str().is_empty() {
            return Err(invalid("files.root cannot be empty"));
        }
        check_mode("files.root_mode", self.files.root_mode)?;
        parse_template("files.name", &self.files.name)?;
        parse_template("files.rotation", &self.files.rotation)?;
        self.links.check()?;

        if let NotifierConfig::File { path } = &self.notifier {
            if path.as_os_str().is_empty() {
                return Err(invalid("notifier.path cannot be empty"));
            }
        }
        if self.state_file.as_os_str().is_empty() {
            return Err(invalid("state_file cannot be empty"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level cannot be empty"));
        }
        Ok(())
    }

    /// File settings shared by every stream, including the links tree when
    /// one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if a template does not parse.
    pub fn file_settings(&self) -> Result<FileSettings> {
        let mut settings = FileSettings::new(
            &self.files.root,
            parse_template("files.name", &self.files.name)?,
            parse_template("files.rotation", &self.files.rotation)?,
        );
        settings.dir_mode = self.files.root_mode;
        if self.links.enabled() {
            let mut links = LinkSettings::new(
                &self.links.root,
                parse_template("links.name", &self.links.name)?,
                parse_template("links.rotation", &self.links.rotation)?,
            );
            links.dir_mode = self.links.root_mode;
            settings = settings.with_links(links);
        }
        Ok(settings)
    }

    /// The configured rotation notifier.
    pub fn notifier(&self) -> Notifier {
        match &self.notifier {
            NotifierConfig::Void => Notifier::Void,
            NotifierConfig::File { path } => Notifier::File {
                journal: path.clone(),
            },
        }
    }

    /// Time between periodic flush ticks.
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.workers.flush_interval_secs)
    }

    /// Time between periodic rotations.
    pub const fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.logrotate.interval_secs)
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn parse_template(key: &str, source: &str) -> Result<PathTemplate> {
    if source.is_empty() {
        return Err(invalid(format!("{key} cannot be empty")));
    }
    PathTemplate::parse(source).map_err(|e| invalid(format!("{key}: {e}")))
}

fn check_mode(key: &str, mode: u32) -> Result<()> {
    if mode > 0o7777 {
        return Err(invalid(format!("{key} {mode:o} is not a permission mode")));
    }
    Ok(())
}

/// Permission bits as a JSON number or an octal string such as `"0755"`.
mod octal {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{mode:04o}"))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Mode {
            Number(u32),
            Text(String),
        }

        match Mode::deserialize(deserializer)? {
            Mode::Number(n) => Ok(n),
            Mode::Text(text) => {
                let digits = text.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8)
                    .map_err(|_| D::Error::custom(format!("invalid octal mode {text:?}")))
            }
        }
    }
}
