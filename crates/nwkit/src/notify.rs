//! HTML email notifications with file attachments

use crate::config::EmailSettings;
use crate::{NwError, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Signature line closing every message
pub const SIGNATURE: &str = "- Grasshopper Automation";

/// Content type given to every attachment, whatever the file holds
pub const ATTACHMENT_CONTENT_TYPE: &str = "application/txt";

/// One notification to send
#[derive(Debug, Clone, Default)]
pub struct EmailRequest {
    /// Sender address
    pub from: String,
    /// Recipient address; several may be separated by commas
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Opening paragraph
    pub greeting: String,
    /// Main paragraph
    pub body: String,
    /// Carbon-copy recipients
    pub cc: Vec<String>,
    /// Directory attachment names are resolved against
    pub attach_dir: Option<PathBuf>,
    /// Attachment file names
    pub attachments: Vec<String>,
    /// Relay host, overriding the configured one
    pub smtp_server: Option<String>,
    /// Relay port, overriding the configured one
    pub smtp_port: Option<u16>,
}

impl EmailRequest {
    /// Request with the required fields
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        greeting: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            greeting: greeting.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Add carbon-copy recipients
    pub fn with_cc<I, S>(mut self, cc: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc.extend(cc.into_iter().map(Into::into));
        self
    }

    /// Attach files found in `dir`
    pub fn with_attachments<I, S>(mut self, dir: impl Into<PathBuf>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attach_dir = Some(dir.into());
        self.attachments.extend(names.into_iter().map(Into::into));
        self
    }

    /// Deliver through a specific relay
    pub fn with_relay(mut self, server: impl Into<String>, port: u16) -> Self {
        self.smtp_server = Some(server.into());
        self.smtp_port = Some(port);
        self
    }

    /// Names of every required field that is empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("from", &self.from),
            ("to", &self.to),
            ("subject", &self.subject),
            ("greeting", &self.greeting),
            ("body", &self.body),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// Relay `(host, port)` after applying configured defaults
    pub fn relay(&self, settings: &EmailSettings) -> (String, u16) {
        (
            self.smtp_server.clone().unwrap_or_else(|| settings.smtp_server.clone()),
            self.smtp_port.unwrap_or(settings.smtp_port),
        )
    }
}

/// HTML body: greeting, body, signature and optional footer
pub fn render_html(greeting: &str, body: &str, footer: Option<&str>) -> String {
    let footer = footer
        .filter(|f| !f.is_empty())
        .map(|f| format!("\n    <p>- {}</p>", f))
        .unwrap_or_default();

    format!(
        r#"<html>
  <head>
    <meta charset="UTF-8">
    <style>
      body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333333; }}
    </style>
  </head>
  <body>
    <p>{}</p>
    <p>{}</p>
    <p></p>
    <p>{}</p>{}
  </body>
</html>
"#,
        greeting, body, SIGNATURE, footer
    )
}

fn mailbox(field: &str, address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| NwError::Email(format!("invalid {} address '{}': {}", field, address.trim(), e)))
}

fn attachment_part(path: &Path, name: &str) -> Result<SinglePart> {
    let content = std::fs::read(path)?;
    let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
        .map_err(|e| NwError::Email(format!("bad attachment content type: {}", e)))?;
    Ok(Attachment::new(name.to_string()).body(content, content_type))
}

/// Build the message without sending it
pub fn compose_email(request: &EmailRequest, footer: Option<&str>) -> Result<Message> {
    let missing = request.missing_fields();
    if !missing.is_empty() {
        return Err(NwError::MissingFields(missing));
    }

    let mut builder = Message::builder()
        .date_now()
        .from(mailbox("from", &request.from)?)
        .subject(request.subject.clone());

    for to in request.to.split(',').filter(|a| !a.trim().is_empty()) {
        builder = builder.to(mailbox("to", to)?);
    }
    for cc in request.cc.iter().filter(|a| !a.trim().is_empty()) {
        builder = builder.cc(mailbox("cc", cc)?);
    }

    let html = render_html(&request.greeting, &request.body, footer);
    let mut parts = MultiPart::mixed().singlepart(SinglePart::html(html));

    if let (Some(dir), false) = (&request.attach_dir, request.attachments.is_empty()) {
        info!("Attaching {} file(s)", request.attachments.len());
        for name in &request.attachments {
            let path = dir.join(name);
            if !path.exists() {
                warn!("Attachment not found: {}", path.display());
                continue;
            }
            parts = parts.singlepart(attachment_part(&path, name)?);
            debug!("Attached: {}", name);
        }
    }

    Ok(builder.multipart(parts)?)
}

/// Compose and deliver through any lettre transport
pub async fn send_email_via<T>(transport: &T, request: &EmailRequest, footer: Option<&str>) -> Result<bool>
where
    T: AsyncTransport + Sync,
    T::Error: std::fmt::Display,
{
    info!("Preparing email to {}", request.to);

    let message = compose_email(request, footer).map_err(|e| {
        error!("Failed to compose email: {}", e);
        e
    })?;

    transport.send(message).await.map_err(|e| {
        error!("Failed to send email: {}", e);
        NwError::Email(format!("delivery failed: {}", e))
    })?;

    info!("Email sent to {}", request.to);
    Ok(true)
}

/// Deliver over plaintext, unauthenticated SMTP
pub async fn send_email(request: &EmailRequest, settings: &EmailSettings) -> Result<bool> {
    let (server, port) = request.relay(settings);
    info!("Sending email via {}:{}", server, port);

    let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server)
        .port(port)
        .build();

    send_email_via(&transport, request, settings.footer.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettre::transport::stub::AsyncStubTransport;

    fn request() -> EmailRequest {
        EmailRequest::new(
            "automation@example.net",
            "noc@example.net",
            "Nightly backup",
            "Hello team,",
            "The nightly backup finished.",
        )
    }

    #[test]
    fn test_missing_fields_are_all_named() {
        let empty = EmailRequest::default();
        assert_eq!(empty.missing_fields(), vec!["from", "to", "subject", "greeting", "body"]);

        let mut partial = request();
        partial.subject = String::new();
        partial.body = String::new();
        match compose_email(&partial, None) {
            Err(NwError::MissingFields(fields)) => assert_eq!(fields, vec!["subject", "body"]),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        // Whitespace is content, not absence
        let mut spaced = request();
        spaced.greeting = " ".to_string();
        assert!(spaced.missing_fields().is_empty());
    }

    #[test]
    fn test_render_html() {
        let html = render_html("Hi,", "All good.", Some("Lab 4"));
        assert!(html.contains("<p>Hi,</p>"));
        assert!(html.contains("<p>All good.</p>"));
        assert!(html.contains("<p>- Grasshopper Automation</p>"));
        assert!(html.contains("<p>- Lab 4</p>"));

        assert!(!render_html("Hi,", "All good.", None).contains("Lab 4"));
        assert!(!render_html("Hi,", "All good.", Some("")).contains("<p>- </p>"));
    }

    #[test]
    fn test_compose_headers() {
        let message = compose_email(&request().with_cc(["ops@example.net", "lead@example.net"]), None).unwrap();
        let text = String::from_utf8(message.formatted()).unwrap();

        assert!(text.contains("From: automation@example.net"));
        assert!(text.contains("To: noc@example.net"));
        assert!(text.contains("Subject: Nightly backup"));
        assert!(text.contains("Date: "));
        assert!(text.contains("Cc: ops@example.net, lead@example.net"));
        assert!(text.contains("Grasshopper Automation"));
    }

    #[test]
    fn test_no_cc_header_without_cc() {
        let message = compose_email(&request(), None).unwrap();
        let text = String::from_utf8(message.formatted()).unwrap();
        assert!(!text.contains("Cc:"));
    }

    #[test]
    fn test_missing_attachment_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.txt"), b"all interfaces up\n").unwrap();

        let req = request().with_attachments(dir.path(), ["report.txt", "missing.txt"]);
        let message = compose_email(&req, None).unwrap();
        let text = String::from_utf8(message.formatted()).unwrap();

        assert!(text.contains("report.txt"));
        assert!(text.contains("application/txt"));
        assert!(!text.contains("missing.txt"));
    }

    #[test]
    fn test_invalid_address() {
        let mut req = request();
        req.to = "not an address".to_string();
        assert!(matches!(compose_email(&req, None), Err(NwError::Email(_))));
    }

    #[test]
    fn test_relay_defaults_and_override() {
        let settings = EmailSettings::default();
        assert_eq!(request().relay(&settings), ("localhost".to_string(), 25));
        assert_eq!(
            request().with_relay("relay.example.net", 2525).relay(&settings),
            ("relay.example.net".to_string(), 2525)
        );
    }

    #[tokio::test]
    async fn test_send_via_stub_transport() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.txt"), b"all interfaces up\n").unwrap();
        let req = request().with_attachments(dir.path(), ["report.txt", "missing.txt"]);

        let transport = AsyncStubTransport::new_ok();
        let sent = send_email_via(&transport, &req, Some("Lab 4")).await.unwrap();

        assert!(sent);
        let messages = transport.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Nightly backup"));
        assert!(messages[0].1.contains("report.txt"));
        assert!(!messages[0].1.contains("missing.txt"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_email_error() {
        let transport = AsyncStubTransport::new_error();
        let result = send_email_via(&transport, &request(), None).await;
        assert!(matches!(result, Err(NwError::Email(_))));
    }
}
