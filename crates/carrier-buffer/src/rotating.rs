//! The terminal sink: a log file that can be rotated.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, error, info, warn};

use crate::codec::{FieldKind, FieldSpec, LayerSchema, StateDecoder, StateEncoder};
use crate::error::{Result, SnapshotError};
use crate::paths::{self, PathTemplate, StreamId};

/// Snapshot layout of a [`RotatingFile`].
pub static FILE_SCHEMA: LayerSchema = LayerSchema {
    layer: "file",
    fields: &[
        FieldSpec::new("dir", FieldKind::Bytes),
        FieldSpec::new("name", FieldKind::Bytes),
        FieldSpec::new("group", FieldKind::Bytes),
        FieldSpec::new("path", FieldKind::Bytes),
        FieldSpec::new("touched", FieldKind::Bool),
    ],
};

/// Upper bound on numeric suffixes tried when a rotation target exists.
const MAX_SUFFIX: u32 = 10_000;

/// Where and how log files are created. Shared by every stream.
///
/// A stream writes to the path rendered from `name`. Rotation renames that
/// file to the path rendered from `rotation` and starts a fresh one under
/// `name`.
#[derive(Debug, Clone)]
pub struct FileSettings {
    /// Root directory all log files live under.
    pub root: PathBuf,
    /// Template of the active file.
    pub name: Arc<PathTemplate>,
    /// Template a rotated file is renamed to.
    pub rotation: Arc<PathTemplate>,
    /// Permission bits for created directories (unix only).
    pub dir_mode: u32,
    /// Symlink tree mirroring the log files, if configured.
    pub links: Option<LinkSettings>,
}

impl FileSettings {
    /// Creates settings with `0o755` directories and no links.
    pub fn new(root: impl Into<PathBuf>, name: PathTemplate, rotation: PathTemplate) -> Self {
        Self {
            root: root.into(),
            name: Arc::new(name),
            rotation: Arc::new(rotation),
            dir_mode: 0o755,
            links: None,
        }
    }

    /// Adds a links tree.
    #[must_use]
    pub fn with_links(mut self, links: LinkSettings) -> Self {
        self.links = Some(links);
        self
    }
}

/// A second directory tree holding symlinks to the active and rotated files,
/// named by templates of its own.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Root directory of the links.
    pub root: PathBuf,
    /// Template of the link to the active file.
    pub name: Arc<PathTemplate>,
    /// Template of the link to a rotated file.
    pub rotation: Arc<PathTemplate>,
    /// Permission bits for created directories (unix only).
    pub dir_mode: u32,
}

impl LinkSettings {
    /// Creates link settings with `0o755` directories.
    pub fn new(root: impl Into<PathBuf>, name: PathTemplate, rotation: PathTemplate) -> Self {
        Self {
            root: root.into(),
            name: Arc::new(name),
            rotation: Arc::new(rotation),
            dir_mode: 0o755,
        }
    }
}

fn create_parent(path: &Path, mode: u32) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(parent)
}

/// Points `link` at `target`, replacing an older symlink at that path.
fn replace_symlink(target: &Path, link: &Path, mode: u32) -> io::Result<()> {
    create_parent(link, mode)?;
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(link)?,
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a symlink", link.display()),
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let target = std::path::absolute(target)?;
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(not(unix))]
    {
        let _ = target;
        Err(io::Error::new(io::ErrorKind::Unsupported, "log links need unix symlinks"))
    }
}

/// Decoded `file` layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileState {
    id: StreamId,
    relative: PathBuf,
    touched: bool,
}

/// A file handle bound to one stream, opened lazily and rotated on request.
///
/// The current path is kept relative to the root, so a restored file follows
/// the root of the process that restores it.
#[derive(Debug)]
pub struct RotatingFile {
    settings: FileSettings,
    id: StreamId,
    relative: PathBuf,
    file: Option<File>,
    /// Whether anything was written to the current path.
    touched: bool,
}

impl RotatingFile {
    /// Creates the sink of `id`, named after `now`. No file is created until
    /// the first write.
    pub fn new(settings: FileSettings, id: StreamId, now: &DateTime<FixedOffset>) -> Result<Self> {
        let relative = settings.name.render(&id, now)?;
        Ok(Self {
            settings,
            id,
            relative,
            file: None,
            touched: false,
        })
    }

    /// Stream this file belongs to.
    pub const fn id(&self) -> &StreamId {
        &self.id
    }

    /// Absolute path of the current file.
    pub fn path(&self) -> PathBuf {
        self.settings.root.join(&self.relative)
    }

    /// Whether data was written to the current path.
    pub const fn touched(&self) -> bool {
        self.touched
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let path = self.path();
            create_parent(&path, self.settings.dir_mode)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(stream = %self.id, path = %path.display(), "opened log file");
            self.file = Some(file);
            if let Some(links) = &self.settings.links {
                self.link(&links.name, &path, &paths::now());
            }
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file handle unavailable"))
    }

    /// Mirrors `target` into the links tree. Failures are logged only.
    fn link(&self, template: &PathTemplate, target: &Path, now: &DateTime<FixedOffset>) {
        let Some(links) = &self.settings.links else {
            return;
        };
        let result = template.render(&self.id, now).and_then(|relative| {
            let link = links.root.join(relative);
            replace_symlink(target, &link, links.dir_mode)?;
            Ok(link)
        });
        match result {
            Ok(link) => debug!(stream = %self.id, link = %link.display(), target = %target.display(), "linked log file"),
            Err(e) => warn!(stream = %self.id, target = %target.display(), error = %e, "log link not updated"),
        }
    }

    /// Syncs and releases the handle. A later write reopens the same path.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Renames the current file to the rotation path for `now` and starts a
    /// fresh file under the name path for `now`. Returns where the rotated
    /// file now lives.
    ///
    /// Nothing happens for a file that received no data. A rotation target
    /// that exists already, or that equals the old or new active path, gets
    /// a numeric suffix (`.1`, `.2`, …). If the fresh file can not be opened
    /// the rename is undone and the old file stays active.
    pub fn rotate_at(&mut self, now: &DateTime<FixedOffset>) -> Result<Option<PathBuf>> {
        if !self.touched {
            return Ok(None);
        }
        let active = self.path();
        let next = self.settings.name.render(&self.id, now)?;
        let next_path = self.settings.root.join(&next);
        let base = self.settings.rotation.render(&self.id, now)?;
        let target = self.free_target(&base, &[active.as_path(), next_path.as_path()])?;

        if let Some(file) = self.file.as_mut() {
            file.sync_data()?;
        }
        create_parent(&target, self.settings.dir_mode)?;
        match fs::rename(&active, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(stream = %self.id, path = %active.display(), "log file vanished before rotation");
                self.file = None;
                self.relative = next;
                self.touched = false;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let opened = create_parent(&next_path, self.settings.dir_mode)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(&next_path));
        let file = match opened {
            Ok(file) => file,
            Err(e) => {
                if let Err(back) = fs::rename(&target, &active) {
                    error!(
                        stream = %self.id,
                        from = %target.display(),
                        to = %active.display(),
                        error = %back,
                        "rotated file could not be moved back"
                    );
                }
                return Err(e.into());
            }
        };

        self.file = Some(file);
        self.relative = next;
        self.touched = false;
        info!(stream = %self.id, rotated = %target.display(), active = %next_path.display(), "rotated log file");
        if let Some(links) = &self.settings.links {
            self.link(&links.name, &next_path, now);
            self.link(&links.rotation, &target, now);
        }
        Ok(Some(target))
    }

    fn free_target(&self, base: &Path, taken: &[&Path]) -> io::Result<PathBuf> {
        for n in 0..=MAX_SUFFIX {
            let relative = if n == 0 {
                base.to_path_buf()
            } else {
                let mut name = base.as_os_str().to_os_string();
                name.push(format!(".{n}"));
                PathBuf::from(name)
            };
            let path = self.settings.root.join(&relative);
            if taken.contains(&path.as_path()) || fs::symlink_metadata(&path).is_ok() {
                continue;
            }
            return Ok(path);
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free rotation target for {}", base.display()),
        ))
    }

    /// Appends the `file` layer to `enc`.
    pub fn dump_state(&self, enc: &mut StateEncoder) -> std::result::Result<(), SnapshotError> {
        let mut layer = enc.layer(&FILE_SCHEMA);
        layer.bytes("dir", self.id.dir().as_bytes())?;
        layer.bytes("name", self.id.name().as_bytes())?;
        layer.bytes("group", self.id.group().as_bytes())?;
        layer.bytes("path", self.relative.to_string_lossy().as_bytes())?;
        layer.bool("touched", self.touched)?;
        layer.finish()
    }

    pub(crate) fn decode_state(dec: &mut StateDecoder<'_>) -> std::result::Result<FileState, SnapshotError> {
        let mut layer = dec.layer(&FILE_SCHEMA)?;
        let dir = layer.string("dir")?;
        let name = layer.string("name")?;
        let group = layer.string("group")?;
        let path = layer.string("path")?;
        let touched = layer.bool("touched")?;
        layer.finish()?;

        let id = StreamId::new(dir, name, group).map_err(|e| SnapshotError::InvalidValue {
            layer: FILE_SCHEMA.layer,
            field: "name",
            reason: e.to_string(),
        })?;
        let relative = PathBuf::from(path);
        let clean = !relative.as_os_str().is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(SnapshotError::InvalidValue {
                layer: FILE_SCHEMA.layer,
                field: "path",
                reason: format!("{path:?} is not a clean relative path"),
            });
        }
        Ok(FileState { id, relative, touched })
    }

    pub(crate) fn apply_state(&mut self, state: FileState) {
        self.file = None;
        self.id = state.id;
        self.relative = state.relative;
        self.touched = state.touched;
    }

    /// Replaces the file state with the `file` layer read from `dec`.
    pub fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<()> {
        let state = Self::decode_state(dec)?;
        self.apply_state(state);
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.handle()?.write(buf)?;
        if n > 0 {
            self.touched = true;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .and_then(|tz| tz.with_ymd_and_hms(2024, 5, 1, h, 0, 0).single())
            .expect("valid time")
    }

    fn settings(root: &Path, name: &str, rotation: &str) -> FileSettings {
        FileSettings::new(
            root,
            PathTemplate::parse(name).expect("name template"),
            PathTemplate::parse(rotation).expect("rotation template"),
        )
    }

    fn stream() -> StreamId {
        StreamId::new("svc", "app", "").expect("id")
    }

    fn hourly(root: &Path) -> RotatingFile {
        RotatingFile::new(settings(root, "${name}.log", "${name}-${time|%H}.log"), stream(), &hour(3)).expect("new")
    }

    #[test]
    fn file_is_created_on_first_write() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = RotatingFile::new(
            settings(tmp.path(), "${dir}/${name}.log", "${dir}/${name}-${time|%H}.log"),
            stream(),
            &hour(3),
        )
        .expect("new");
        let path = tmp.path().join("svc/app.log");
        assert!(!path.exists());

        file.write_all(b"line\n").expect("write");
        assert!(file.touched());
        assert_eq!(fs::read(&path).expect("read"), b"line\n");
    }

    #[test]
    fn rotation_renames_active_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = hourly(tmp.path());
        file.write_all(b"first\n").expect("write");

        let rotated = file.rotate_at(&hour(4)).expect("rotate");
        assert_eq!(rotated, Some(tmp.path().join("app-04.log")));
        assert_eq!(file.path(), tmp.path().join("app.log"));
        file.write_all(b"second\n").expect("write");

        assert_eq!(fs::read(tmp.path().join("app-04.log")).expect("read"), b"first\n");
        assert_eq!(fs::read(tmp.path().join("app.log")).expect("read"), b"second\n");
    }

    #[test]
    fn untouched_file_does_not_rotate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = hourly(tmp.path());
        assert_eq!(file.rotate_at(&hour(4)).expect("rotate"), None);
        assert!(!tmp.path().join("app-04.log").exists());
    }

    #[test]
    fn taken_target_gets_suffix() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = hourly(tmp.path());
        fs::write(tmp.path().join("app-04.log"), b"taken").expect("seed");

        file.write_all(b"a\n").expect("write");
        let rotated = file.rotate_at(&hour(4)).expect("rotate");
        assert_eq!(rotated, Some(tmp.path().join("app-04.log.1")));

        file.write_all(b"b\n").expect("write");
        let rotated = file.rotate_at(&hour(4)).expect("rotate");
        assert_eq!(rotated, Some(tmp.path().join("app-04.log.2")));
        assert_eq!(fs::read(tmp.path().join("app-04.log")).expect("read"), b"taken");
        assert_eq!(fs::read(tmp.path().join("app-04.log.2")).expect("read"), b"b\n");
    }

    #[test]
    fn target_equal_to_active_path_gets_suffix() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = RotatingFile::new(settings(tmp.path(), "${name}.log", "${name}.log"), stream(), &hour(3))
            .expect("new");
        file.write_all(b"old\n").expect("write");

        let rotated = file.rotate_at(&hour(4)).expect("rotate");
        assert_eq!(rotated, Some(tmp.path().join("app.log.1")));
        file.write_all(b"new\n").expect("write");
        assert_eq!(fs::read(tmp.path().join("app.log.1")).expect("read"), b"old\n");
        assert_eq!(fs::read(tmp.path().join("app.log")).expect("read"), b"new\n");
    }

    #[test]
    fn timed_name_moves_active_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = RotatingFile::new(
            settings(tmp.path(), "${name}-${time|%H}.log", "done/${name}-${time|%H}.log"),
            stream(),
            &hour(3),
        )
        .expect("new");
        file.write_all(b"three\n").expect("write");
        assert_eq!(file.path(), tmp.path().join("app-03.log"));

        let rotated = file.rotate_at(&hour(4)).expect("rotate");
        assert_eq!(rotated, Some(tmp.path().join("done/app-04.log")));
        assert_eq!(file.path(), tmp.path().join("app-04.log"));
        assert!(!tmp.path().join("app-03.log").exists());
    }

    #[test]
    fn failed_rotation_keeps_old_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = RotatingFile::new(
            settings(tmp.path(), "${name}.log", "${time|%H}/${name}.log"),
            stream(),
            &hour(3),
        )
        .expect("new");
        file.write_all(b"kept\n").expect("write");

        // A regular file where the rotation directory should go.
        fs::write(tmp.path().join("04"), b"").expect("blocker");

        let err = file.rotate_at(&hour(4)).expect_err("target directory is a file");
        assert!(matches!(err, crate::error::BufferError::Io(_)));
        assert_eq!(file.path(), tmp.path().join("app.log"));
        assert!(file.touched());

        file.write_all(b"still here\n").expect("write");
        assert_eq!(
            fs::read(tmp.path().join("app.log")).expect("read"),
            b"kept\nstill here\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn links_mirror_active_and_rotated_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let logs = tmp.path().join("logs");
        let links = LinkSettings::new(
            tmp.path().join("links"),
            PathTemplate::parse("${dir}/${name}").expect("template"),
            PathTemplate::parse("${dir}/${name}-${time|%H}").expect("template"),
        );
        let settings = settings(&logs, "${dir}/${name}.log", "${dir}/${name}-${time|%H}.log").with_links(links);
        let mut file = RotatingFile::new(settings, stream(), &hour(3)).expect("new");

        file.write_all(b"first\n").expect("write");
        let active_link = tmp.path().join("links/svc/app");
        assert_eq!(fs::read_link(&active_link).expect("active link"), logs.join("svc/app.log"));

        file.rotate_at(&hour(4)).expect("rotate");
        file.write_all(b"second\n").expect("write");
        let rotated_link = tmp.path().join("links/svc/app-04");
        assert_eq!(fs::read_link(&rotated_link).expect("rotated link"), logs.join("svc/app-04.log"));
        assert_eq!(fs::read(&rotated_link).expect("through link"), b"first\n");
        assert_eq!(fs::read(&active_link).expect("through link"), b"second\n");
    }

    #[test]
    fn link_failure_does_not_fail_writes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // The links root is a regular file, so no link can be created below it.
        fs::write(tmp.path().join("links"), b"").expect("blocker");
        let links = LinkSettings::new(
            tmp.path().join("links"),
            PathTemplate::parse("${name}").expect("template"),
            PathTemplate::parse("${name}-${time|%H}").expect("template"),
        );
        let mut file = RotatingFile::new(
            settings(&tmp.path().join("logs"), "${name}.log", "${name}-${time|%H}.log").with_links(links),
            stream(),
            &hour(3),
        )
        .expect("new");
        file.write_all(b"x\n").expect("write");
        assert!(file.rotate_at(&hour(4)).expect("rotate").is_some());
    }

    #[test]
    fn restore_appends_to_saved_path_under_new_root() {
        let first = tempfile::tempdir().expect("tempdir");
        let mut file = hourly(first.path());
        file.write_all(b"x").expect("write");
        let mut enc = StateEncoder::new();
        file.dump_state(&mut enc).expect("dump");
        let blob = enc.into_bytes();

        let second = tempfile::tempdir().expect("tempdir");
        let other = StreamId::new("", "other", "").expect("id");
        let mut restored =
            RotatingFile::new(settings(second.path(), "${name}-moved.log", "${name}.old"), other, &hour(9))
                .expect("new");
        let mut dec = StateDecoder::new(&blob);
        restored.restore_state(&mut dec).expect("restore");
        dec.finish().expect("consumed");

        assert_eq!(restored.id(), &stream());
        assert!(restored.touched());
        assert_eq!(restored.path(), second.path().join("app.log"));
    }

    #[test]
    fn escaping_path_is_rejected() {
        let mut enc = StateEncoder::new();
        let mut layer = enc.layer(&FILE_SCHEMA);
        layer.bytes("dir", b"").expect("dir");
        layer.bytes("name", b"app").expect("name");
        layer.bytes("group", b"").expect("group");
        layer.bytes("path", b"../../etc/passwd").expect("path");
        layer.bool("touched", true).expect("touched");
        layer.finish().expect("finish");
        let blob = enc.into_bytes();

        let err = RotatingFile::decode_state(&mut StateDecoder::new(&blob)).expect_err("escapes root");
        assert!(matches!(err, SnapshotError::InvalidValue { field: "path", .. }));
    }
}
