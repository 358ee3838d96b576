#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::{path::Path, time::Duration};

use mailsender::{MailSender, bridge::IntakeConfig, bridge::NotifyConfig};
use mailsender_common::{Letter, Status};
use mailsender_delivery::{QueueConfig, RateLimitConfig, TlsMode};
use mailsender_storage::{FileStorage, Storage, StorageConfig};
use pretty_assertions::assert_eq;
use support::relay::Relay;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

fn config(relay: &Relay, notify: &Path, storage: StorageConfig) -> MailSender {
    let mut config = MailSender {
        storage,
        limiter: RateLimitConfig {
            period_secs: 1,
            max_per_period: 10,
        },
        queue: QueueConfig {
            poll_interval_ms: 50,
            shutdown_timeout_secs: 5,
            ..QueueConfig::default()
        },
        intake: IntakeConfig {
            listen_address: "127.0.0.1:0".into(),
            ..IntakeConfig::default()
        },
        notify: NotifyConfig::File {
            path: notify.to_path_buf(),
        },
        ..MailSender::default()
    };
    config.delivery.workers = 2;
    config.delivery.smtp.host = "127.0.0.1".into();
    config.delivery.smtp.port = relay.port();
    config.delivery.smtp.tls = TlsMode::None;
    config.delivery.smtp.from = Some("bot@example.com".into());
    config.delivery.smtp.helo = "sender.test".into();
    config
}

async fn post(addr: std::net::SocketAddr, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn published(path: &Path, count: usize) -> Vec<Letter> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let contents = tokio::fs::read_to_string(path).await.unwrap_or_default();
            let letters: Vec<Letter> = contents
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
            if letters.len() >= count {
                return letters;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("Letters were not published in time")
}

const BATCH: &str = r#"[
    {"addresses":["first@example.com"],"subject":"One","body":"1\n"},
    {"addresses":["second@example.com","third@example.com"],"subject":"Two","body":"2\n"},
    {"addresses":["fourth@example.com"],"subject":"Three","body":"3\n"}
]"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_is_delivered_and_published() {
    let relay = Relay::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let notify = dir.path().join("completed.jsonl");

    let mut running = config(&relay, &notify, StorageConfig::default())
        .start()
        .await
        .unwrap();
    let addr = running.intake_addr();

    let response = post(addr, "/letters", BATCH).await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");

    let letters = published(&notify, 3).await;
    assert!(letters.iter().all(|letter| letter.status == Status::Sent));
    assert!(letters.iter().all(|letter| letter.token == letters[0].token));
    assert!(response.contains(&letters[0].token));

    let mut subjects: Vec<&str> = letters.iter().map(|l| l.subject.as_str()).collect();
    subjects.sort_unstable();
    assert_eq!(subjects, vec!["One", "Three", "Two"]);
    assert_eq!(relay.messages(), 3);

    let response = post(addr, "/halt", "").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    tokio::time::timeout(Duration::from_secs(10), async {
        running.wait_for_signal().await.unwrap();
        running.finish().await.unwrap();
    })
    .await
    .expect("Service did not stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_storage_keeps_final_statuses() {
    let relay = Relay::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let notify = dir.path().join("completed.jsonl");
    let spool = dir.path().join("spool");

    let running = config(
        &relay,
        &notify,
        StorageConfig::File {
            path: spool.clone(),
        },
    )
    .start()
    .await
    .unwrap();

    let response = post(running.intake_addr(), "/letters", BATCH).await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");
    published(&notify, 3).await;

    running.shutdown();
    tokio::time::timeout(Duration::from_secs(10), running.finish())
        .await
        .expect("Service did not stop")
        .unwrap();

    let storage = FileStorage::open(&spool).await.unwrap();
    assert_eq!(storage.list_by_status(Status::Sent).await.unwrap().len(), 3);
    assert!(storage.list_by_status(Status::Awaiting).await.unwrap().is_empty());
    assert!(storage.list_by_status(Status::Processing).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_batch_stores_nothing() {
    let relay = Relay::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let notify = dir.path().join("completed.jsonl");

    let running = config(&relay, &notify, StorageConfig::default())
        .start()
        .await
        .unwrap();

    let response = post(running.intake_addr(), "/letters", r#"[{"addresses":[]}]"#).await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.contains("Sample"));

    running.shutdown();
    tokio::time::timeout(Duration::from_secs(10), running.finish())
        .await
        .expect("Service did not stop")
        .unwrap();

    assert_eq!(relay.messages(), 0);
    let contents = std::fs::read_to_string(&notify).unwrap();
    assert!(contents.is_empty());
}
