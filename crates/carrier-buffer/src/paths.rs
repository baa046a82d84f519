//! Stream identifiers and log file naming.
//!
//! A [`PathTemplate`] turns a stream id and a timestamp into a file path
//! below the configured root:
//!
//! ```text
//! ${dir}?/${name}-${time|%Y.%m.%d-%H}
//! ```
//!
//! `${dir}`, `${name}` and `${group}` expand to the stream id parts and
//! `${time|pattern}` to the timestamp formatted with a strftime pattern.
//! A `?` right after `${dir}` makes the directory optional: when the
//! directory is empty the placeholder and the `/` following it are dropped.

use std::fmt::{self, Write as _};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, TimeZone};

use crate::error::{BufferError, Result};

/// Current local time with its offset.
pub fn now() -> DateTime<FixedOffset> {
    Local::now().into()
}

// ============================================================================
// Stream identifiers
// ============================================================================

/// Identifies one logical log stream.
///
/// All three parts end up in file paths, so they are validated on creation:
/// the name must be non-empty and no part may be absolute, contain a `..`
/// component, or contain NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    dir: String,
    name: String,
    group: String,
}

impl StreamId {
    /// Creates a validated stream id.
    pub fn new(dir: impl Into<String>, name: impl Into<String>, group: impl Into<String>) -> Result<Self> {
        let id = Self {
            dir: dir.into(),
            name: name.into(),
            group: group.into(),
        };
        if id.name.is_empty() {
            return Err(BufferError::InvalidStream("name must not be empty".to_string()));
        }
        for (part, value) in [("dir", &id.dir), ("name", &id.name), ("group", &id.group)] {
            check_part(part, value)?;
        }
        Ok(id)
    }

    /// Directory part, possibly empty.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Logical stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group key, possibly empty.
    pub fn group(&self) -> &str {
        &self.group
    }
}

fn check_part(part: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| Err(BufferError::InvalidStream(format!("{part} {value:?} {reason}")));
    if value.contains('\0') {
        return invalid("contains a NUL byte");
    }
    if value.starts_with('/') {
        return invalid("is absolute");
    }
    if value.split('/').any(|c| c == "..") {
        return invalid("contains a parent directory component");
    }
    Ok(())
}

/// Formats as `dir/name/group`.
impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dir, self.name, self.group)
    }
}

/// Parses `dir/name/group`; the directory may itself contain slashes.
impl FromStr for StreamId {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.rsplitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(name), Some(dir)) => Self::new(dir, name, group),
            _ => Err(BufferError::InvalidStream(format!(
                "{s:?} is not of the form dir/name/group"
            ))),
        }
    }
}

// ============================================================================
// Path templates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Dir { optional: bool },
    Name,
    Group,
    Time(String),
}

/// A parsed file name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses a template, rejecting unknown placeholders, unterminated
    /// `${`, invalid time patterns, absolute templates and `..` components.
    pub fn parse(source: &str) -> Result<Self> {
        let err = |msg: String| BufferError::Template(format!("{source:?}: {msg}"));

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let body_start = start + 2;
            let Some(len) = rest[body_start..].find('}') else {
                return Err(err("unterminated placeholder".to_string()));
            };
            let body = &rest[body_start..body_start + len];
            rest = &rest[body_start + len + 1..];

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            let (key, pattern) = match body.split_once('|') {
                Some((key, pattern)) => (key.trim(), Some(pattern.trim())),
                None => (body.trim(), None),
            };
            let segment = match (key, pattern) {
                ("dir", None) => {
                    let optional = rest.starts_with('?');
                    if optional {
                        rest = &rest[1..];
                    }
                    Segment::Dir { optional }
                }
                ("name", None) => Segment::Name,
                ("group", None) => Segment::Group,
                ("time", Some(pattern)) => {
                    check_time_pattern(pattern).map_err(err)?;
                    Segment::Time(pattern.to_string())
                }
                ("time", None) => return Err(err("time placeholder needs a pattern".to_string())),
                (key, Some(_)) if ["dir", "name", "group"].contains(&key) => {
                    return Err(err(format!("placeholder {key} takes no pattern")));
                }
                (key, _) => return Err(err(format!("unknown placeholder {key:?}"))),
            };
            segments.push(segment);
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if segments.is_empty() {
            return Err(err("template is empty".to_string()));
        }
        for segment in &segments {
            if let Segment::Literal(text) = segment {
                if text.split('/').any(|c| c == "..") {
                    return Err(err("parent directory components are not allowed".to_string()));
                }
            }
        }
        if matches!(segments.first(), Some(Segment::Literal(text)) if text.starts_with('/')) {
            return Err(err("template must be relative to the root".to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders the path of `id` at `time`, relative to the root.
    ///
    /// Empty and `.` components are dropped, so the result is a clean
    /// relative path.
    pub fn render<Tz>(&self, id: &StreamId, time: &DateTime<Tz>) -> Result<PathBuf>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let mut out = String::new();
        let mut skip_slash = false;
        for segment in &self.segments {
            let skip = std::mem::take(&mut skip_slash);
            match segment {
                Segment::Literal(text) => {
                    let text = if skip { text.strip_prefix('/').unwrap_or(text) } else { text };
                    out.push_str(text);
                }
                Segment::Dir { optional } => {
                    if id.dir.is_empty() {
                        skip_slash = *optional;
                    } else {
                        out.push_str(&id.dir);
                    }
                }
                Segment::Name => out.push_str(&id.name),
                Segment::Group => out.push_str(&id.group),
                Segment::Time(pattern) => {
                    write!(out, "{}", time.format_with_items(StrftimeItems::new(pattern)))
                        .map_err(|_| BufferError::Template(format!("can not format time with {pattern:?}")))?;
                }
            }
        }

        let relative: PathBuf = Path::new(&out)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        if relative.as_os_str().is_empty() {
            return Err(BufferError::Template(format!(
                "{:?} renders to an empty path for stream {id}",
                self.source
            )));
        }
        Ok(relative)
    }

    /// Renders the path of `id` at `time` below `root`.
    pub fn render_under<Tz>(&self, root: &Path, id: &StreamId, time: &DateTime<Tz>) -> Result<PathBuf>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Ok(root.join(self.render(id, time)?))
    }
}

fn check_time_pattern(pattern: &str) -> std::result::Result<(), String> {
    if pattern.is_empty() {
        return Err("empty time pattern".to_string());
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid time pattern {pattern:?}"));
    }
    Ok(())
}

impl FromStr for PathTemplate {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
