//! Loading configuration files from disk.

use std::fs;
use std::path::PathBuf;

use carrier_buffer::paths::now;
use carrier_buffer::{Notifier, StreamId};
use carrier_config::{CompressionMethod, Config, ConfigError, RotationMethod};

#[test]
fn loaded_config_drives_file_naming() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("carrier.json");
    let root = tmp.path().join("logs");
    let json = format!(
        r#"{{
            "compression": {{ "method": "zstd", "level": 5 }},
            "files": {{ "root": {root:?}, "name": "${{dir}}?/${{group}}/${{name}}.log",
                        "rotation": "${{dir}}?/${{group}}/${{name}}-${{time|%Y}}.log" }},
            "logrotate": {{ "method": "guided" }},
            "notifier": {{ "type": "file", "path": "rotated.txt" }}
        }}"#,
        root = root.display().to_string()
    );
    fs::write(&path, json).expect("write config");

    let config = Config::from_file(&path).expect("load");
    assert_eq!(config.compression.method, CompressionMethod::Zstd);
    assert_eq!(config.logrotate.method, RotationMethod::Guided);
    assert_eq!(
        config.notifier(),
        Notifier::File {
            journal: PathBuf::from("rotated.txt")
        }
    );

    let settings = config.file_settings().expect("settings");
    let id = StreamId::new("", "app", "blue").expect("id");
    let rendered = settings
        .name
        .render_under(&settings.root, &id, &now())
        .expect("render");
    assert_eq!(rendered, root.join("blue/app.log"));
    let rotated = settings
        .rotation
        .render_under(&settings.root, &id, &now())
        .expect("render");
    assert!(rotated.starts_with(root.join("blue")), "{}", rotated.display());
    assert!(settings.links.is_none());
}

#[test]
fn malformed_file_is_a_parse_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("carrier.json");
    fs::write(&path, "{ not json").expect("write config");
    assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(_))));
}
