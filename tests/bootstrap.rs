// 引导流程集成测试（探测器与扫描器使用桩实现，不访问网络）

use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trustboot::models::BootstrapSettings;
use trustboot::ssh::{
    Bootstrap, BootstrapError, BootstrapEvent, BootstrapRequest, BootstrapStage, Credential,
    HostKeyRecords, HostKeyScanner, ProbeError, Prober, ScanError,
};

const RECORD: &str = "203.0.113.10 ssh-ed25519 AAAA...";

fn fixture_key() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/id_ed25519")
}

/// 前 failures 次返回拨号失败，之后成功
struct FlakyProber {
    failures: u32,
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Prober for FlakyProber {
    async fn probe(&self) -> Result<(), ProbeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(ProbeError::Dial(format!(
                "dial tcp 203.0.113.10:22: connect: connection refused (attempt {})",
                attempt
            )))
        } else {
            Ok(())
        }
    }
}

enum ScanOutcome {
    Records(&'static str),
    Timeout,
}

struct StubScanner {
    outcome: ScanOutcome,
    calls: Arc<AtomicU32>,
}

impl StubScanner {
    fn records(text: &'static str, calls: Arc<AtomicU32>) -> Self {
        Self {
            outcome: ScanOutcome::Records(text),
            calls,
        }
    }
}

#[async_trait]
impl HostKeyScanner for StubScanner {
    async fn scan(&self, _target: Ipv4Addr, _port: u16) -> Result<HostKeyRecords, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            ScanOutcome::Records(text) => Ok(HostKeyRecords::parse(text)),
            ScanOutcome::Timeout => Err(ScanError::Timeout(5)),
        }
    }
}

fn request(address: &str, known_hosts: &Path) -> BootstrapRequest {
    BootstrapRequest {
        address: address.to_string(),
        private_key: fixture_key(),
        known_hosts: known_hosts.to_path_buf(),
    }
}

fn drain(mut rx: mpsc::UnboundedReceiver<BootstrapEvent>) -> Vec<BootstrapEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_fresh_store() {
    let dir = tempdir().unwrap();
    let known_hosts = dir.path().join("known_hosts");
    fs::write(&known_hosts, "").unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let scans = Arc::new(AtomicU32::new(0));
    let (tx, rx) = mpsc::unbounded_channel();

    let mut bootstrap = Bootstrap::new(BootstrapSettings::default())
        .with_scanner(StubScanner::records(RECORD, scans.clone()))
        .with_events(tx);

    let prober_attempts = attempts.clone();
    let result = bootstrap
        .run_with(
            &request("203.0.113.10", &known_hosts),
            move |target: SocketAddrV4, _credential: Credential| {
                assert_eq!(target, SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 10), 22));
                FlakyProber {
                    failures: 2,
                    attempts: prober_attempts,
                }
            },
        )
        .await;

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(bootstrap.stage(), BootstrapStage::Done);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(scans.load(Ordering::SeqCst), 1);
    assert_eq!(
        fs::read_to_string(&known_hosts).unwrap(),
        format!("{}\n", RECORD)
    );

    drop(bootstrap);
    let events = drain(rx);
    let stages: Vec<BootstrapStage> = events
        .iter()
        .filter_map(|e| match e {
            BootstrapEvent::StageChanged(stage) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            BootstrapStage::Init,
            BootstrapStage::LoadingCredential,
            BootstrapStage::AwaitingReadiness,
            BootstrapStage::ScanningHostKey,
            BootstrapStage::EditingTrustStore,
            BootstrapStage::Done,
        ]
    );
    let retries = events
        .iter()
        .filter(|e| matches!(e, BootstrapEvent::RetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);
    assert!(events
        .iter()
        .any(|e| matches!(e, BootstrapEvent::Ready { attempts: 3 })));
}

#[tokio::test(start_paused = true)]
async fn test_stale_record_is_replaced() {
    let dir = tempdir().unwrap();
    let known_hosts = dir.path().join("known_hosts");
    fs::write(
        &known_hosts,
        "10.0.0.5 ecdsa-sha2-nistp256 AAAAE2VjZHNhSTALE\n10.0.0.6 ssh-ed25519 AAAAC3NzaOTHER\n",
    )
    .unwrap();

    let mut bootstrap = Bootstrap::new(BootstrapSettings::default()).with_scanner(
        StubScanner::records("10.0.0.5 ssh-ed25519 AAAAC3NzaFRESH", Arc::default()),
    );
    bootstrap
        .run_with(&request("10.0.0.5", &known_hosts), |_, _| FlakyProber {
            failures: 0,
            attempts: Arc::default(),
        })
        .await
        .unwrap();

    assert_eq!(
        fs::read_to_string(&known_hosts).unwrap(),
        "10.0.0.6 ssh-ed25519 AAAAC3NzaOTHER\n10.0.0.5 ssh-ed25519 AAAAC3NzaFRESH\n"
    );
    // 默认保留 known_hosts.old
    assert!(dir.path().join("known_hosts.old").exists());
}

#[tokio::test]
async fn test_invalid_address_fails_before_any_io() {
    let dir = tempdir().unwrap();
    let known_hosts = dir.path().join("known_hosts");
    let scans = Arc::new(AtomicU32::new(0));

    for address in ["", "not-an-ip", "2001:db8::10", "203.0.113"] {
        let mut bootstrap = Bootstrap::new(BootstrapSettings::default())
            .with_scanner(StubScanner::records(RECORD, scans.clone()));
        let mut request = request(address, &known_hosts);
        // 私钥路径不存在：若真的读取了私钥，会得到 Credential 错误
        request.private_key = dir.path().join("missing_key");

        let err = bootstrap
            .run_with(&request, |_, _| -> FlakyProber {
                panic!("prober must not be created for {:?}", address)
            })
            .await
            .unwrap_err();

        assert!(
            matches!(err, BootstrapError::InvalidAddress { .. }),
            "{:?}",
            err
        );
        assert_eq!(bootstrap.stage(), BootstrapStage::Failed);
    }

    assert_eq!(scans.load(Ordering::SeqCst), 0);
    assert!(!known_hosts.exists());
}

#[tokio::test]
async fn test_unreadable_key_is_fatal() {
    let dir = tempdir().unwrap();
    let key = dir.path().join("id_ecdsa");
    fs::write(&key, "-----BEGIN GARBAGE-----\n").unwrap();

    let mut bootstrap = Bootstrap::new(BootstrapSettings::default())
        .with_scanner(StubScanner::records(RECORD, Arc::default()));
    let mut request = request("203.0.113.10", &dir.path().join("known_hosts"));
    request.private_key = key;

    let attempts = Arc::new(AtomicU32::new(0));
    let prober_attempts = attempts.clone();
    let err = bootstrap
        .run_with(&request, move |_, _| FlakyProber {
            failures: 0,
            attempts: prober_attempts,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Credential(_)), "{:?}", err);
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_wraps_last_probe_error() {
    let dir = tempdir().unwrap();
    let known_hosts = dir.path().join("known_hosts");
    fs::write(&known_hosts, "10.0.0.5 ssh-ed25519 AAAAC3NzaSTALE\n").unwrap();

    let mut settings = BootstrapSettings::default();
    settings.backoff.max_elapsed_secs = 5;

    let scans = Arc::new(AtomicU32::new(0));
    let attempts = Arc::new(AtomicU32::new(0));
    let prober_attempts = attempts.clone();
    let mut bootstrap =
        Bootstrap::new(settings).with_scanner(StubScanner::records(RECORD, scans.clone()));

    let err = bootstrap
        .run_with(&request("10.0.0.5", &known_hosts), move |_, _| FlakyProber {
            failures: u32::MAX,
            attempts: prober_attempts,
        })
        .await
        .unwrap_err();

    let total = attempts.load(Ordering::SeqCst);
    match err {
        BootstrapError::ReadinessTimeout {
            attempts: reported,
            last,
            ..
        } => {
            assert_eq!(reported, total);
            assert_eq!(
                last,
                ProbeError::Dial(format!(
                    "dial tcp 203.0.113.10:22: connect: connection refused (attempt {})",
                    total
                ))
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(scans.load(Ordering::SeqCst), 0);
    assert_eq!(
        fs::read_to_string(&known_hosts).unwrap(),
        "10.0.0.5 ssh-ed25519 AAAAC3NzaSTALE\n"
    );
}

#[tokio::test]
async fn test_scan_failure_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let known_hosts = dir.path().join("known_hosts");
    fs::write(&known_hosts, "10.0.0.5 ssh-ed25519 AAAAC3NzaSTALE\n").unwrap();

    let mut bootstrap =
        Bootstrap::new(BootstrapSettings::default()).with_scanner(StubScanner {
            outcome: ScanOutcome::Timeout,
            calls: Arc::default(),
        });

    let err = bootstrap
        .run_with(&request("10.0.0.5", &known_hosts), |_, _| FlakyProber {
            failures: 0,
            attempts: Arc::default(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Scan(ScanError::Timeout(5))));
    assert_eq!(
        fs::read_to_string(&known_hosts).unwrap(),
        "10.0.0.5 ssh-ed25519 AAAAC3NzaSTALE\n"
    );
}

#[tokio::test]
async fn test_cancelled_before_readiness() {
    let dir = tempdir().unwrap();
    let known_hosts = dir.path().join("known_hosts");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let attempts = Arc::new(AtomicU32::new(0));
    let prober_attempts = attempts.clone();
    let mut bootstrap = Bootstrap::new(BootstrapSettings::default())
        .with_scanner(StubScanner::records(RECORD, Arc::default()))
        .with_cancellation(cancel);

    let err = bootstrap
        .run_with(&request("203.0.113.10", &known_hosts), move |_, _| FlakyProber {
            failures: 0,
            attempts: prober_attempts,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Cancelled));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert!(!known_hosts.exists());
}
