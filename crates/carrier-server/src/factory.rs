//! Builds bufferers for new and restored streams.

use carrier_buffer::paths;
use carrier_buffer::{Bufferer, BuffererKind, FileSettings, RawBufferer, RotatingFile, StreamId, ZstdBufferer};
use carrier_config::Config;

use crate::error::Result;

/// Creates pipelines with the configured sizes and file settings.
#[derive(Debug, Clone)]
pub struct BuffererFactory {
    settings: FileSettings,
    kind: BuffererKind,
    level: i32,
    input: usize,
    framing: usize,
}

impl BuffererFactory {
    /// Creates a factory from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            settings: config.file_settings()?,
            kind: config.compression.method.bufferer_kind(),
            level: config.compression.level,
            input: config.buffers.input,
            framing: config.buffers.framing,
        })
    }

    /// Variant used for new streams.
    pub const fn kind(&self) -> BuffererKind {
        self.kind
    }

    /// Builds a pipeline of the configured variant.
    pub fn build(&self, id: StreamId) -> Result<Box<dyn Bufferer>> {
        self.build_for_restore(self.kind, id)
    }

    /// Builds a pipeline of `kind`, which may differ from the configured
    /// variant when restoring a checkpoint written under older settings.
    pub fn build_for_restore(&self, kind: BuffererKind, id: StreamId) -> Result<Box<dyn Bufferer>> {
        let file = RotatingFile::new(self.settings.clone(), id, &paths::now())?;
        let bufferer: Box<dyn Bufferer> = match kind {
            BuffererKind::Raw => Box::new(RawBufferer::new(file, self.input)),
            BuffererKind::Zstd => Box::new(ZstdBufferer::new(file, self.input, self.framing, self.level)?),
        };
        Ok(bufferer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_config::CompressionMethod;

    fn config(method: CompressionMethod) -> Config {
        let mut config = Config::default();
        config.compression.method = method;
        config.files.root = "/tmp/carrier-factory-test".into();
        config
    }

    #[test]
    fn builds_configured_kind() {
        let factory = BuffererFactory::from_config(&config(CompressionMethod::Zstd)).expect("factory");
        let id = StreamId::new("", "app", "").expect("id");
        let bufferer = factory.build(id.clone()).expect("build");
        assert_eq!(bufferer.kind(), BuffererKind::Zstd);
        assert_eq!(bufferer.id(), &id);
    }

    #[test]
    fn restore_honours_recorded_kind() {
        let factory = BuffererFactory::from_config(&config(CompressionMethod::Raw)).expect("factory");
        let id = StreamId::new("", "app", "").expect("id");
        let bufferer = factory.build_for_restore(BuffererKind::Zstd, id).expect("build");
        assert_eq!(bufferer.kind(), BuffererKind::Zstd);
        assert_eq!(factory.kind(), BuffererKind::Raw);
    }
}
