mod common;

use common::{FakeLab, GUEST};
use netstack::remote_fs::{EnsureOutcome, RemoteFs, RemoteKind};
use netstack::transport::{self, Credentials, Endpoint, FileKind, SessionMode, SessionTransport};
use netstack::ProvisionError;

fn guest() -> Endpoint {
    Endpoint::new("127.0.0.1", 1234)
}

fn creds() -> Credentials {
    Credentials::new("root", "lab")
}

#[tokio::test]
async fn test_ensure_twice_creates_once() {
    let lab = FakeLab::new();
    let mut session = lab
        .open(&guest(), &creds(), SessionMode::SingleCommand)
        .await
        .unwrap();
    let mut fs = RemoteFs::new(&mut *session);

    assert_eq!(
        fs.ensure_exists("/dev/net", RemoteKind::Directory).await.unwrap(),
        EnsureOutcome::Created
    );
    assert_eq!(
        fs.ensure_exists("/dev/net", RemoteKind::Directory).await.unwrap(),
        EnsureOutcome::AlreadyPresent
    );
    session.close().await;

    lab.with(|s| {
        assert_eq!(s.exec_count("mkdir -p /dev/net"), 1);
        assert_eq!(s.file(GUEST, "/dev/net"), Some(FileKind::Directory));
    });
}

#[tokio::test]
async fn test_remove_then_ensure_leaves_object_present() {
    let lab = FakeLab::new();
    let node = RemoteKind::CharDevice {
        major: 10,
        minor: 201,
    };
    let mut session = lab
        .open(&guest(), &creds(), SessionMode::SingleCommand)
        .await
        .unwrap();
    let mut fs = RemoteFs::new(&mut *session);

    fs.ensure_exists("/dev/net", RemoteKind::Directory).await.unwrap();
    fs.ensure_exists("/dev/net/tuncisco", node).await.unwrap();
    assert!(fs.remove_if_present("/dev/net").await);
    assert!(!fs.exists("/dev/net/tuncisco").await.unwrap());

    fs.ensure_exists("/dev/net", RemoteKind::Directory).await.unwrap();
    fs.ensure_exists("/dev/net/tuncisco", node).await.unwrap();
    session.close().await;

    lab.with(|s| {
        assert_eq!(s.file(GUEST, "/dev/net"), Some(FileKind::Directory));
        assert_eq!(s.file(GUEST, "/dev/net/tuncisco"), Some(FileKind::CharDevice));
        assert_eq!(s.exec_count("mknod /dev/net/tuncisco c 10 201"), 2);
    });
}

#[tokio::test]
async fn test_remove_of_absent_path_is_quiet() {
    let lab = FakeLab::new();
    let mut session = lab
        .open(&guest(), &creds(), SessionMode::SingleCommand)
        .await
        .unwrap();

    assert!(!RemoteFs::new(&mut *session).remove_if_present("/dev/net").await);
    session.close().await;
    lab.with(|s| assert!(s.execs.is_empty()));
}

#[tokio::test]
async fn test_existing_object_of_other_kind_is_left_alone() {
    let lab = FakeLab::new();
    lab.with(|s| {
        s.files.insert(
            (GUEST.to_string(), "/dev/net/tuncisco".to_string()),
            FileKind::Regular,
        );
    });
    let mut session = lab
        .open(&guest(), &creds(), SessionMode::SingleCommand)
        .await
        .unwrap();

    let outcome = RemoteFs::new(&mut *session)
        .ensure_exists(
            "/dev/net/tuncisco",
            RemoteKind::CharDevice {
                major: 10,
                minor: 201,
            },
        )
        .await
        .unwrap();
    session.close().await;

    assert_eq!(outcome, EnsureOutcome::AlreadyPresent);
    lab.with(|s| assert!(s.execs.is_empty()));
}

#[tokio::test]
async fn test_create_failure_propagates() {
    let lab = FakeLab::new();
    let mut session = lab
        .open(&guest(), &creds(), SessionMode::SingleCommand)
        .await
        .unwrap();

    // No parent directory yet
    let err = RemoteFs::new(&mut *session)
        .ensure_exists(
            "/dev/net/tuncisco",
            RemoteKind::CharDevice {
                major: 10,
                minor: 201,
            },
        )
        .await
        .unwrap_err();
    session.close().await;

    assert!(matches!(err, ProvisionError::Execution { .. }));
}

#[tokio::test]
async fn test_sessions_close_on_error_path() {
    let lab = FakeLab::new();
    lab.with(|s| s.fail_exec = Some("uname".to_string()));

    let err = transport::exec_once(&lab, &guest(), &creds(), "uname -a")
        .await
        .unwrap_err();

    assert!(err.is_execution());
    lab.with(|s| {
        assert_eq!(s.opened, 1);
        assert_eq!(s.closed, 1);
    });
}

#[tokio::test]
async fn test_stat_failure_is_not_mistaken_for_absence() {
    let lab = FakeLab::new();
    lab.with(|s| s.fail_stat = Some("/dev/net".to_string()));
    let mut session = lab
        .open(&guest(), &creds(), SessionMode::SingleCommand)
        .await
        .unwrap();

    let err = RemoteFs::new(&mut *session)
        .ensure_exists("/dev/net", RemoteKind::Directory)
        .await
        .unwrap_err();
    session.close().await;

    assert!(matches!(err, ProvisionError::Transfer(_)));
    lab.with(|s| assert!(s.execs.is_empty(), "nothing is created on a failed stat"));
}
