//! SMTP sessions against the mock submission server
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use mailsender_common::Letter;
use mailsender_delivery::{
    Connector, DeliveryError, PermanentError, Sender, SmtpConfig, SmtpConnector, TlsMode,
};
use support::mock_server::{MockSmtpServer, SmtpCommand};

fn config_for(server: &MockSmtpServer) -> SmtpConfig {
    SmtpConfig {
        host: "127.0.0.1".to_string(),
        port: server.port(),
        username: "user".to_string(),
        password: "pass".to_string(),
        from: Some("bot@example.com".to_string()),
        tls: TlsMode::None,
        helo: "sender.test".to_string(),
        ..SmtpConfig::default()
    }
}

#[tokio::test]
async fn test_successful_delivery() {
    let server = MockSmtpServer::builder()
        .with_credentials("user", "pass")
        .build()
        .await
        .unwrap();

    let mut sender = SmtpConnector::new(config_for(&server))
        .connect()
        .await
        .unwrap();

    let letter = Letter::new(["a@example.com", "b@example.com"], "Hello", "<p>Hi</p>\n.hidden");
    sender.send(&letter).await.unwrap();
    sender.quit().await;

    let commands = server.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("sender.test".into()));
    assert_eq!(commands[1], SmtpCommand::Auth("user:pass".into()));
    assert_eq!(commands[2], SmtpCommand::MailFrom("FROM:<bot@example.com>".into()));
    assert_eq!(commands[3], SmtpCommand::RcptTo("a@example.com".into()));
    assert_eq!(commands[4], SmtpCommand::RcptTo("b@example.com".into()));
    assert_eq!(commands[5], SmtpCommand::Data);

    let SmtpCommand::MessageContent(content) = &commands[6] else {
        panic!("Expected message content, got {:?}", commands[6]);
    };
    assert!(content.contains("From: bot@example.com\r\n"));
    assert!(content.contains("To: a@example.com, b@example.com\r\n"));
    assert!(content.contains("Subject: Hello\r\n"));
    assert!(content.contains(&format!("Message-ID: <{}@sender.test>\r\n", letter.id)));
    assert!(content.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(content.contains("\r\n..hidden"));

    assert_eq!(commands.last(), Some(&SmtpCommand::Quit));
}

#[tokio::test]
async fn test_rejected_recipient_keeps_session_usable() {
    let server = MockSmtpServer::builder()
        .with_rejected_recipient("nobody@example.com", 550, "User unknown")
        .build()
        .await
        .unwrap();

    let mut sender = SmtpConnector::new(config_for(&server))
        .connect()
        .await
        .unwrap();

    let rejected = Letter::new(["nobody@example.com"], "Hello", "Body");
    let err = sender.send(&rejected).await.unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::Permanent(PermanentError::InvalidRecipient(_))
    ));

    let accepted = Letter::new(["somebody@example.com"], "Hello", "Body");
    sender.send(&accepted).await.unwrap();

    assert_eq!(server.connections(), 1);
    let commands = server.commands().await;
    assert!(commands.contains(&SmtpCommand::Rset));
    assert_eq!(
        commands
            .iter()
            .filter(|command| matches!(command, SmtpCommand::MessageContent(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_rejected_message_is_permanent() {
    let server = MockSmtpServer::builder()
        .with_data_end_response(554, "Spam detected")
        .build()
        .await
        .unwrap();

    let mut sender = SmtpConnector::new(config_for(&server))
        .connect()
        .await
        .unwrap();

    let err = sender
        .send(&Letter::new(["a@example.com"], "Buy now", "Body"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::Permanent(PermanentError::MessageRejected(_))
    ));
}

#[tokio::test]
async fn test_letter_without_recipients() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut sender = SmtpConnector::new(config_for(&server))
        .connect()
        .await
        .unwrap();

    let err = sender
        .send(&Letter::new(Vec::<String>::new(), "Hello", "Body"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::Permanent(PermanentError::NoRecipients)
    ));
}

#[tokio::test]
async fn test_bad_credentials_fail_to_connect() {
    let server = MockSmtpServer::builder()
        .with_credentials("user", "other")
        .build()
        .await
        .unwrap();

    let err = SmtpConnector::new(config_for(&server))
        .connect()
        .await
        .err()
        .expect("Session opened with bad credentials");
    assert!(matches!(
        err,
        DeliveryError::Permanent(PermanentError::AuthenticationFailed(_))
    ));
}

#[tokio::test]
async fn test_starttls_required_but_not_offered() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let config = SmtpConfig {
        tls: TlsMode::StartTls,
        ..config_for(&server)
    };

    let err = SmtpConnector::new(config)
        .connect()
        .await
        .err()
        .expect("Session opened without STARTTLS");
    assert!(matches!(
        err,
        DeliveryError::Permanent(PermanentError::TlsRequired(_))
    ));
}

#[tokio::test]
async fn test_lost_connection_is_reopened() {
    // EHLO, AUTH, MAIL FROM: the first connection dies before RCPT TO
    let server = MockSmtpServer::builder()
        .with_first_connection_dropped_after(3)
        .build()
        .await
        .unwrap();

    let mut sender = SmtpConnector::new(config_for(&server))
        .connect()
        .await
        .unwrap();

    let letter = Letter::new(["a@example.com"], "Hello", "Body");
    let err = sender.send(&letter).await.unwrap_err();
    assert!(err.is_temporary(), "unexpected error: {err}");

    sender.send(&letter).await.unwrap();
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_unreachable_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = SmtpConfig {
        host: "127.0.0.1".to_string(),
        port,
        tls: TlsMode::None,
        ..SmtpConfig::default()
    };

    let err = SmtpConnector::new(config)
        .connect()
        .await
        .err()
        .expect("Connected to a closed port");
    assert!(err.is_temporary());
}
