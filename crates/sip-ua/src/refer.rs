//! Call transfer helpers: REFER targets and the sipfrag NOTIFYs
//! reporting transfer progress

use crate::dialog::Dialog;
use bytes::Bytes;
use sip_core::{IncomingRequest, Request, Result};
use sip_types::header::typed::{ContentType, Event, SubscriptionState};
use sip_types::header::HeaderError;
use sip_types::msg::StatusLine;
use sip_types::{Code, Method};

pub const CONTENT_TYPE_SIPFRAG: ContentType =
    ContentType(bytesstr::BytesStr::from_static("message/sipfrag;version=2.0"));

/// Progress of a transfer, parsed from a NOTIFY's sipfrag body
#[derive(Debug)]
pub struct ReferProgress {
    pub status_line: StatusLine,
}

#[derive(Debug, thiserror::Error)]
pub enum ReferProgressError {
    #[error("NOTIFY carries no usable content-type, {0}")]
    InvalidContentType(HeaderError),
    #[error("NOTIFY content-type is not message/sipfrag")]
    NotSipfrag,
    #[error("NOTIFY body is not a valid status line")]
    InvalidContent,
}

impl ReferProgress {
    pub fn from_notify(notify: &IncomingRequest) -> Result<Self, ReferProgressError> {
        let content_type = notify
            .headers
            .get_named::<ContentType>()
            .map_err(ReferProgressError::InvalidContentType)?;

        if !content_type.0.contains("message/sipfrag") {
            return Err(ReferProgressError::NotSipfrag);
        }

        let body =
            std::str::from_utf8(&notify.body).map_err(|_| ReferProgressError::InvalidContent)?;

        let first_line = body.lines().next().unwrap_or(body);

        let status_line = StatusLine::parse_str(first_line)
            .map_err(|_| ReferProgressError::InvalidContent)?;

        Ok(Self { status_line })
    }
}

/// Sends the implicit-subscription NOTIFYs after an accepted REFER.
///
/// Progress is reported as sipfrag status lines inside the dialog the
/// REFER arrived on; the final report terminates the subscription.
pub struct ReferNotifier {
    /// CSeq of the REFER, used as the `id` of the refer event
    refer_cseq: u32,
}

impl ReferNotifier {
    pub fn new(refer: &IncomingRequest) -> Self {
        debug_assert_eq!(refer.line.method, Method::Refer);

        Self {
            refer_cseq: refer.base_headers.cseq.cseq,
        }
    }

    /// Build one progress NOTIFY; `terminal` marks the last report
    pub fn create_notify(
        &self,
        dialog: &mut Dialog,
        code: Code,
        terminal: bool,
    ) -> Result<Request> {
        let mut request = dialog.create_request(Method::Notify);

        request.headers.insert_named(&Event {
            package: "refer".into(),
            id: Some(self.refer_cseq.to_string().into()),
        });

        let state = if terminal {
            SubscriptionState::Terminated
        } else {
            SubscriptionState::Active { expires: Some(60) }
        };

        request.headers.insert_named(&state);
        request.headers.insert_named(&CONTENT_TYPE_SIPFRAG);

        let status_line = StatusLine {
            code,
            reason: code.text().map(bytesstr::BytesStr::from_static),
        };

        request.body = Bytes::from(format!("{}\r\n", status_line));

        Ok(request)
    }

    /// Send one progress NOTIFY on the dialog
    pub async fn notify(
        &self,
        dialog: &mut Dialog,
        code: Code,
        terminal: bool,
    ) -> Result<()> {
        let request = self.create_notify(dialog, code, terminal)?;
        let endpoint = dialog.endpoint.clone();

        let mut transaction = endpoint.send_request(request).await?;
        let response = transaction.receive_final().await?;

        if response.line.code.kind() != sip_types::CodeKind::Success {
            log::debug!("transfer NOTIFY rejected with {}", response.line.code);
        }

        Ok(())
    }
}

/// Normalize a dial or transfer target.
///
/// Accepts full URIs and bare `user` / `user@host` forms, resolving
/// the latter against the local domain.
pub fn normalize_target(
    target: &str,
    domain: &sip_types::host::HostPort,
) -> Option<sip_types::uri::SipUri> {
    use sip_types::uri::SipUri;

    let target = target.trim();

    if target.is_empty() || target.contains(|c: char| c.is_whitespace()) {
        return None;
    }

    if let Ok(uri) = target.parse::<SipUri>() {
        return Some(uri);
    }

    if target.contains('@') {
        return format!("sip:{}", target).parse().ok();
    }

    Some(SipUri::new(domain.clone()).user(target))
}

#[cfg(test)]
mod test {
    use super::*;
    use sip_types::host::HostPort;

    #[test]
    fn sipfrag_from_notify_body() {
        let line = StatusLine::parse_str("SIP/2.0 180 Ringing").unwrap();
        assert_eq!(line.code, Code::RINGING);
    }

    #[test]
    fn normalize_bare_user() {
        let domain = HostPort::host_name("example.com");

        let uri = normalize_target("carol", &domain).unwrap();
        assert_eq!(uri.user.as_ref().unwrap(), "carol");
        assert_eq!(uri.to_string(), "sip:carol@example.com");
    }

    #[test]
    fn normalize_user_at_host() {
        let domain = HostPort::host_name("example.com");

        let uri = normalize_target("carol@chicago.example.com", &domain).unwrap();
        assert_eq!(uri.to_string(), "sip:carol@chicago.example.com");
    }

    #[test]
    fn normalize_full_uri_passthrough() {
        let domain = HostPort::host_name("example.com");

        let uri = normalize_target("sips:carol@chicago.example.com:5061", &domain).unwrap();
        assert!(uri.sips);
        assert_eq!(uri.host_port.port, Some(5061));
    }

    #[test]
    fn normalize_rejects_garbage() {
        let domain = HostPort::host_name("example.com");

        assert!(normalize_target("", &domain).is_none());
        assert!(normalize_target("   ", &domain).is_none());
    }
}
