//! End-to-end lifecycle: write, checkpoint, restart, drain.

use std::path::Path;

use carrier_buffer::{BufferError, SnapshotError, StreamId};
use carrier_config::{CompressionMethod, Config, RotationMethod};
use carrier_server::{Checkpoint, Server, ServerError, drain};

fn config(root: &Path, method: CompressionMethod, rotation: RotationMethod) -> Config {
    let mut config = Config::default();
    config.compression.method = method;
    config.files.root = root.join("logs");
    config.files.name = "${dir}?/${name}.log".to_string();
    config.logrotate.method = rotation;
    config.workers.ingest = 2;
    config.workers.flushers = 1;
    config.workers.rotators = 1;
    config.workers.flush_interval_secs = 3600;
    config.state_file = root.join("state");
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_data_survives_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path(), CompressionMethod::Zstd, RotationMethod::Periodic);
    let id = StreamId::new("web", "access", "").expect("id");

    let server = Server::start(config.clone()).expect("start");
    let handle = server.handle();
    handle.write(id.clone(), b"first\n".to_vec()).await.expect("write");
    handle.write(id.clone(), b"second\n".to_vec()).await.expect("write");
    server.shutdown().await.expect("shutdown");

    let checkpoint = Checkpoint::read(&config.state_file).expect("read").expect("written");
    assert_eq!(checkpoint.streams.len(), 1);
    assert_eq!(checkpoint.streams[0].id, id);

    let server = Server::start(config.clone()).expect("restart");
    assert_eq!(server.registry().len(), 1);
    assert!(!config.state_file.exists(), "checkpoint is consumed on restore");
    server.handle().write(id.clone(), b"third\n".to_vec()).await.expect("write");
    server.shutdown().await.expect("shutdown");

    assert_eq!(drain(&config).expect("drain"), 1);
    assert!(!config.state_file.exists(), "drain consumes the checkpoint");
    let compressed = std::fs::read(config.files.root.join("web/access.log")).expect("log file");
    let text = zstd::stream::decode_all(compressed.as_slice()).expect("valid zstd");
    assert_eq!(text, b"first\nsecond\nthird\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_streams_are_written_per_record() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path(), CompressionMethod::Raw, RotationMethod::Guided);
    let access = StreamId::new("", "access", "").expect("id");
    let errors = StreamId::new("", "errors", "").expect("id");

    let server = Server::start(config.clone()).expect("start");
    let handle = server.handle();
    handle.write(access.clone(), b"GET /\n".to_vec()).await.expect("write");
    handle.write(errors.clone(), b"boom\n".to_vec()).await.expect("write");
    handle.write(access.clone(), b"GET /health\n".to_vec()).await.expect("write");
    server.shutdown().await.expect("shutdown");

    let access_log = std::fs::read_to_string(config.files.root.join("access.log")).expect("access");
    assert_eq!(access_log, "GET /\nGET /health\n");
    let error_log = std::fs::read_to_string(config.files.root.join("errors.log")).expect("errors");
    assert_eq!(error_log, "boom\n");
}

#[tokio::test]
async fn guided_rotation_rejected_under_periodic() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path(), CompressionMethod::Raw, RotationMethod::Periodic);
    let server = Server::start(config).expect("start");

    let id = StreamId::new("", "app", "").expect("id");
    let err = server.handle().rotate(id).await.expect_err("rejected");
    assert!(matches!(err, ServerError::RotationNotAllowed(RotationMethod::Periodic)));
    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn writes_after_shutdown_are_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path(), CompressionMethod::Raw, RotationMethod::Both);
    let server = Server::start(config).expect("start");
    let handle = server.handle();
    server.shutdown().await.expect("shutdown");

    let id = StreamId::new("", "late", "").expect("id");
    let err = handle.write(id.clone(), b"x\n".to_vec()).await.expect_err("closed");
    assert!(matches!(err, ServerError::ShuttingDown));
    let err = handle.rotate(id).await.expect_err("closed");
    assert!(matches!(err, ServerError::ShuttingDown));
}

#[tokio::test]
async fn corrupt_checkpoint_fails_startup() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path(), CompressionMethod::Raw, RotationMethod::Periodic);
    std::fs::write(&config.state_file, b"not a checkpoint").expect("write");

    let err = Server::start(config).expect_err("corrupt");
    assert!(matches!(
        err,
        ServerError::Buffer(BufferError::Snapshot(SnapshotError::BadMagic))
    ));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn guided_rotation_renames_file_and_updates_links() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut config = config(tmp.path(), CompressionMethod::Raw, RotationMethod::Guided);
    config.files.rotation = "${dir}?/${name}.log.old".to_string();
    config.links.root = tmp.path().join("links");
    config.links.name = "${name}".to_string();
    config.links.rotation = "${name}.old".to_string();
    let active = config.files.root.join("access.log");

    let server = Server::start(config.clone()).expect("start");
    let handle = server.handle();
    let id = StreamId::new("", "access", "").expect("id");
    handle.write(id.clone(), b"first\n".to_vec()).await.expect("write");
    for _ in 0..100 {
        if std::fs::read(&active).is_ok_and(|data| data == b"first\n") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    handle.rotate(id).await.expect("rotate");
    server.shutdown().await.expect("shutdown");

    let rotated = config.files.root.join("access.log.old");
    assert_eq!(std::fs::read(&rotated).expect("rotated file"), b"first\n");
    let link = tmp.path().join("links/access.old");
    assert_eq!(std::fs::read_link(&link).expect("rotated link"), rotated);
    assert_eq!(
        std::fs::read_link(tmp.path().join("links/access")).expect("active link"),
        active
    );
}
