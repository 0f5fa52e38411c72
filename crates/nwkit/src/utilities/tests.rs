//! Unit tests for the session manager paths that never reach the network

use super::*;
use std::io::Write;

fn manager() -> NwUtilities {
    NwUtilities::builder().with_settings(Settings::default()).build().unwrap()
}

#[test]
fn test_missing_config_file_builds() {
    let dir = tempfile::tempdir().unwrap();
    let nw = NwUtilities::builder()
        .with_config_path(dir.path().join("_config.ini"))
        .build()
        .unwrap();

    assert!(nw.settings().device.is_none());
    assert!(nw.settings().jumphost.is_none());
    assert_eq!(nw.settings().email.smtp_port, 25);
}

#[test]
fn test_config_file_is_read() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[lab_device]\nhost_ip = 192.0.2.1\nusername = u\npassword = p").unwrap();

    let nw = NwUtilities::builder().with_config_path(file.path()).build().unwrap();
    let device = nw.settings().device.clone().unwrap();
    assert_eq!(device.host, "192.0.2.1");
    assert_eq!(device.port, 22);
}

#[test]
fn test_invalid_config_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[jumphost]\njump = bastion\nport = none").unwrap();

    let result = NwUtilities::builder().with_config_path(file.path()).build();
    assert!(matches!(result, Err(NwError::Config(_))));
}

#[tokio::test]
async fn test_closes_with_nothing_open() {
    let mut nw = manager();

    assert_eq!(nw.close_device().await, CloseOutcome::NotOpen);
    assert_eq!(nw.disconnect_jumphost().await, CloseOutcome::NotOpen);
    assert_eq!(nw.disconnect_tunnel().await, TunnelCloseOutcome::not_open());

    let report = nw.close_all_connections().await;
    assert!(report.is_clean());
    assert_eq!(report.device, CloseOutcome::NotOpen);
}

#[tokio::test]
async fn test_tunnel_requires_destination_host() {
    let mut nw = manager();
    let jump = SshTarget::new("bastion.invalid", "u", "p");
    let destination = SshTarget::new("  ", "u", "p");

    let result = nw.connect_tunnel(&jump, &destination).await;
    assert!(matches!(result, Err(NwError::InvalidArgument(_))));
    assert!(nw.tunnel().is_none());
}

#[tokio::test]
async fn test_copy_argument_checks() {
    let mut nw = manager();

    assert!(!nw.copy_local_to_remote("", "/var/tmp/x", true).await.unwrap());
    assert!(!nw.copy_local_to_remote("/etc/hosts", "", true).await.unwrap());
    assert!(!nw.copy_remote_to_local("", "/tmp/x", true).await.unwrap());

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.cfg");
    match nw.copy_local_to_remote(missing.to_str().unwrap(), "/var/tmp/", true).await {
        Err(NwError::FileNotFound(path)) => assert_eq!(path, missing),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_direct_copy_is_declined() {
    let mut nw = manager();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.txt");
    std::fs::write(&file, "set system host-name r1\n").unwrap();

    assert!(!nw.copy_local_to_remote(file.to_str().unwrap(), "/var/tmp/", false).await.unwrap());
    assert!(!nw.copy_remote_to_local("/var/tmp/config.txt", dir.path().to_str().unwrap(), false).await.unwrap());
    assert!(nw.jumphost().is_none());
}

#[tokio::test]
async fn test_copy_without_jumphost_config() {
    let mut nw = manager();
    let result = nw.copy_remote_to_local("/var/log/messages", "/tmp/messages", true).await;
    assert!(matches!(result, Err(NwError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_open_shell_without_device_config() {
    let mut nw = manager();
    assert!(matches!(nw.open_shell().await, Err(NwError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_send_email_names_missing_fields() {
    let nw = manager();
    let request = EmailRequest::new("a@example.net", "", "subject", "", "body");

    match nw.send_email(&request).await {
        Err(NwError::MissingFields(fields)) => assert_eq!(fields, vec!["to", "greeting"]),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_scoped_returns_value_and_report() {
    let mut nw = manager();
    let (value, report) = nw
        .scoped(|nw| Box::pin(async move { nw.settings().email.smtp_port }))
        .await;

    assert_eq!(value, 25);
    assert!(report.is_clean());
}
