//! NETCONF message types: hello, rpc and rpc-reply

use crate::{Framing, ProtocolError};
use quick_xml::events::Event;
use quick_xml::Reader;

/// NETCONF base namespace
pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// base:1.0 capability (end-of-message framing)
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";

/// base:1.1 capability (chunked framing)
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// Hello message exchanged when a session starts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    /// Advertised capability URIs
    pub capabilities: Vec<String>,
    /// Session id assigned by the server (absent in client hellos)
    pub session_id: Option<u32>,
}

impl Hello {
    /// Hello sent by this client
    pub fn client() -> Self {
        Self {
            capabilities: vec![BASE_1_0.to_string(), BASE_1_1.to_string()],
            session_id: None,
        }
    }

    /// Check whether a capability is advertised, ignoring query parameters
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.split('?').next() == Some(capability))
    }

    /// Pick the framing both sides understand
    pub fn negotiate_framing(&self, peer: &Hello) -> Framing {
        if self.supports(BASE_1_1) && peer.supports(BASE_1_1) {
            Framing::Chunked
        } else {
            Framing::EndOfMessage
        }
    }

    /// Render as XML
    pub fn to_xml(&self) -> String {
        let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8"?><hello xmlns="{}"><capabilities>"#, NETCONF_NS);
        for capability in &self.capabilities {
            xml.push_str("<capability>");
            xml.push_str(&quick_xml::escape::escape(capability.as_str()));
            xml.push_str("</capability>");
        }
        xml.push_str("</capabilities>");
        if let Some(id) = self.session_id {
            xml.push_str(&format!("<session-id>{}</session-id>", id));
        }
        xml.push_str("</hello>");
        xml
    }

    /// Parse a hello received from the peer
    pub fn parse(xml: &str) -> Result<Self, ProtocolError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut hello = Hello::default();
        let mut saw_root = false;
        let mut current: Option<&'static str> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"hello" => saw_root = true,
                    b"capability" => current = Some("capability"),
                    b"session-id" => current = Some("session-id"),
                    other if !saw_root => {
                        return Err(ProtocolError::Unexpected(format!(
                            "expected <hello>, got <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                    _ => {}
                },
                Event::Text(text) => {
                    let value = text.unescape()?.into_owned();
                    match current {
                        Some("capability") => hello.capabilities.push(value),
                        Some("session-id") => {
                            let id = value.parse().map_err(|_| {
                                ProtocolError::Unexpected(format!("invalid session-id: {}", value))
                            })?;
                            hello.session_id = Some(id);
                        }
                        _ => {}
                    }
                }
                Event::End(_) => current = None,
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(ProtocolError::Unexpected("no <hello> element".to_string()));
        }
        Ok(hello)
    }
}

/// An outgoing RPC
#[derive(Debug, Clone)]
pub struct Rpc {
    /// message-id attribute, echoed back in the reply
    pub message_id: u64,
    /// Operation XML placed inside `<rpc>`
    pub body: String,
}

impl Rpc {
    /// Create an RPC around an operation
    pub fn new(message_id: u64, body: impl Into<String>) -> Self {
        Self {
            message_id,
            body: body.into(),
        }
    }

    /// `<close-session/>` operation
    pub fn close_session(message_id: u64) -> Self {
        Self::new(message_id, "<close-session/>")
    }

    /// Render as XML
    pub fn to_xml(&self) -> String {
        format!(
            r#"<rpc xmlns="{}" message-id="{}">{}</rpc>"#,
            NETCONF_NS, self.message_id, self.body
        )
    }
}

/// Severity of an `<rpc-error>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Operation failed
    Error,
    /// Operation succeeded with a warning
    Warning,
}

/// One `<rpc-error>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// error-severity
    pub severity: ErrorSeverity,
    /// error-type (transport, rpc, protocol, application)
    pub error_type: Option<String>,
    /// error-tag
    pub tag: Option<String>,
    /// error-message
    pub message: Option<String>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.as_deref().unwrap_or("no error message");
        match &self.tag {
            Some(tag) => write!(f, "{} ({})", message, tag),
            None => write!(f, "{}", message),
        }
    }
}

/// A parsed `<rpc-reply>`
#[derive(Debug, Clone)]
pub struct RpcReply {
    /// message-id attribute, when present
    pub message_id: Option<String>,
    /// Reply carried `<ok/>`
    pub ok: bool,
    /// Errors and warnings reported by the server
    pub errors: Vec<RpcError>,
    /// Full reply text
    pub raw: String,
}

impl RpcReply {
    /// Parse a reply message
    pub fn parse(xml: &str) -> Result<Self, ProtocolError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut message_id = None;
        let mut ok = false;
        let mut errors = Vec::new();
        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut pending: Option<RpcError> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = e.local_name().as_ref().to_vec();
                    if stack.is_empty() {
                        if name != b"rpc-reply" {
                            return Err(ProtocolError::Unexpected(format!(
                                "expected <rpc-reply>, got <{}>",
                                String::from_utf8_lossy(&name)
                            )));
                        }
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| ProtocolError::Xml(e.to_string()))?;
                            if attr.key.local_name().as_ref() == b"message-id" {
                                message_id = Some(attr.unescape_value()?.into_owned());
                            }
                        }
                    }
                    if name == b"rpc-error" {
                        pending = Some(RpcError {
                            severity: ErrorSeverity::Error,
                            error_type: None,
                            tag: None,
                            message: None,
                        });
                    }
                    if name == b"ok" && stack.len() == 1 {
                        ok = true;
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    if stack.len() == 1 && e.local_name().as_ref() == b"ok" {
                        ok = true;
                    }
                }
                Event::Text(text) => {
                    if let (Some(error), Some(name)) = (pending.as_mut(), stack.last()) {
                        let value = text.unescape()?.trim().to_string();
                        match name.as_slice() {
                            b"error-severity" => {
                                error.severity = if value == "warning" {
                                    ErrorSeverity::Warning
                                } else {
                                    ErrorSeverity::Error
                                };
                            }
                            b"error-type" => error.error_type = Some(value),
                            b"error-tag" => error.tag = Some(value),
                            b"error-message" => error.message = Some(value),
                            _ => {}
                        }
                    }
                }
                Event::End(_) => {
                    if let Some(name) = stack.pop() {
                        if name == b"rpc-error" {
                            if let Some(error) = pending.take() {
                                errors.push(error);
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self {
            message_id,
            ok,
            errors,
            raw: xml.to_string(),
        })
    }

    /// Errors with severity `error`
    pub fn failures(&self) -> impl Iterator<Item = &RpcError> {
        self.errors.iter().filter(|e| e.severity == ErrorSeverity::Error)
    }

    /// True unless the server reported an error-severity `<rpc-error>`
    pub fn is_ok(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Text of the first element with the given local name
    pub fn text_of(&self, local_name: &str) -> Option<String> {
        element_texts(&self.raw, local_name)
            .ok()
            .and_then(|texts| texts.into_iter().next())
    }
}

/// Collect the text of every element with the given local name
pub fn element_texts(xml: &str, local_name: &str) -> Result<Vec<String>, ProtocolError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let wanted = local_name.as_bytes();
    let mut texts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth > 0 {
                    depth += 1;
                } else if e.local_name().as_ref() == wanted {
                    depth = 1;
                    current.clear();
                }
            }
            Event::Empty(e) => {
                if depth == 0 && e.local_name().as_ref() == wanted {
                    texts.push(String::new());
                }
            }
            Event::Text(text) if depth > 0 => {
                current.push_str(&text.unescape()?);
            }
            Event::CData(data) if depth > 0 => {
                current.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Event::End(_) if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    texts.push(current.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_HELLO: &str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
    <capability>urn:ietf:params:netconf:base:1.1</capability>
    <capability>http://xml.juniper.net/netconf/junos/1.0</capability>
  </capabilities>
  <session-id>27700</session-id>
</hello>"#;

    #[test]
    fn test_parse_server_hello() {
        let hello = Hello::parse(SERVER_HELLO).unwrap();
        assert_eq!(hello.session_id, Some(27700));
        assert_eq!(hello.capabilities.len(), 3);
        assert!(hello.supports(BASE_1_1));
    }

    #[test]
    fn test_framing_negotiation() {
        let server = Hello::parse(SERVER_HELLO).unwrap();
        assert_eq!(Hello::client().negotiate_framing(&server), Framing::Chunked);

        let legacy = Hello {
            capabilities: vec![BASE_1_0.to_string()],
            session_id: Some(1),
        };
        assert_eq!(Hello::client().negotiate_framing(&legacy), Framing::EndOfMessage);
    }

    #[test]
    fn test_capability_with_query_parameters() {
        let hello = Hello {
            capabilities: vec![format!("{}?module=foo", BASE_1_1)],
            session_id: None,
        };
        assert!(hello.supports(BASE_1_1));
    }

    #[test]
    fn test_client_hello_parses_back() {
        let xml = Hello::client().to_xml();
        let parsed = Hello::parse(&xml).unwrap();
        assert_eq!(parsed, Hello::client());
    }

    #[test]
    fn test_parse_rejects_non_hello() {
        assert!(Hello::parse("<rpc-reply/>").is_err());
    }

    #[test]
    fn test_rpc_rendering() {
        let rpc = Rpc::new(7, "<get-software-information/>");
        let xml = rpc.to_xml();
        assert!(xml.contains(r#"message-id="7""#));
        assert!(xml.contains("<get-software-information/>"));
        assert!(Rpc::close_session(8).to_xml().contains("<close-session/>"));
    }

    #[test]
    fn test_reply_with_ok() {
        let reply = RpcReply::parse(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3"><ok/></rpc-reply>"#,
        )
        .unwrap();
        assert!(reply.ok);
        assert!(reply.is_ok());
        assert_eq!(reply.message_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_reply_with_errors() {
        let reply = RpcReply::parse(
            r#"<rpc-reply message-id="4">
                <rpc-error>
                  <error-type>protocol</error-type>
                  <error-tag>operation-failed</error-tag>
                  <error-severity>error</error-severity>
                  <error-message>syntax error</error-message>
                </rpc-error>
                <rpc-error>
                  <error-severity>warning</error-severity>
                  <error-message>statement not found</error-message>
                </rpc-error>
              </rpc-reply>"#,
        )
        .unwrap();

        assert!(!reply.is_ok());
        assert_eq!(reply.errors.len(), 2);
        let failure = reply.failures().next().unwrap();
        assert_eq!(failure.tag.as_deref(), Some("operation-failed"));
        assert_eq!(failure.to_string(), "syntax error (operation-failed)");
        assert_eq!(reply.errors[1].severity, ErrorSeverity::Warning);
    }

    #[test]
    fn test_warning_only_reply_is_ok() {
        let reply = RpcReply::parse(
            r#"<rpc-reply><rpc-error><error-severity>warning</error-severity></rpc-error><ok/></rpc-reply>"#,
        )
        .unwrap();
        assert!(reply.is_ok());
        assert!(reply.ok);
    }

    #[test]
    fn test_text_of_with_junos_namespaces() {
        let reply = RpcReply::parse(
            r#"<rpc-reply xmlns:junos="http://xml.juniper.net/junos/21.4R0/junos">
                 <software-information>
                   <host-name>lab-mx1</host-name>
                   <product-model>mx204</product-model>
                   <junos-version>21.4R3-S2.3</junos-version>
                 </software-information>
               </rpc-reply>"#,
        )
        .unwrap();

        assert_eq!(reply.text_of("host-name").as_deref(), Some("lab-mx1"));
        assert_eq!(reply.text_of("product-model").as_deref(), Some("mx204"));
        assert_eq!(reply.text_of("serial-number"), None);
    }

    #[test]
    fn test_element_texts_collects_all() {
        let texts = element_texts("<a><b>1</b><c><b>2</b></c><b/></a>", "b").unwrap();
        assert_eq!(texts, vec!["1", "2", ""]);
    }
}
