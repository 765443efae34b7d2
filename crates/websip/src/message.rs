//! Out-of-dialog MESSAGE exchange

use crate::events::EndReason;
use bytes::Bytes;
use bytesstr::BytesStr;
use sip_core::{Endpoint, IncomingRequest, Request, Result};
use sip_types::header::typed::{CSeq, CallID, ContentType, FromTo, MaxForwards};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{Code, CodeKind, Method, Name};
use sip_ua::cause::Cause;
use sip_ua::util::{random_sequence_number, random_string};

pub const CONTENT_TYPE_TEXT: ContentType = ContentType(BytesStr::from_static("text/plain"));

/// A received MESSAGE
#[derive(Debug)]
pub struct IncomingMessage {
    pub from: FromTo,
    pub to: FromTo,
    pub content_type: Option<ContentType>,
    pub body: Bytes,
}

impl IncomingMessage {
    pub(crate) fn from_request(request: &IncomingRequest) -> Self {
        Self {
            from: request.base_headers.from.clone(),
            to: request.base_headers.to.clone(),
            content_type: request.headers.get_named().ok(),
            body: request.body.clone(),
        }
    }

    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Fire-and-forget MESSAGE sender; one transaction, no dialog
pub(crate) struct MessageSender {
    pub local: NameAddr,
    pub target: SipUri,
    pub content_type: ContentType,
    pub body: Bytes,
    pub routes: Vec<sip_types::header::typed::Route>,
}

impl MessageSender {
    pub(crate) fn create_request(&self, cseq: u32) -> Request {
        let mut request = Request::new(Method::Message, self.target.clone());

        request.headers.insert_named(&MaxForwards(70));

        for route in &self.routes {
            request.headers.insert_named(route);
        }
        request.headers.insert_type(
            Name::FROM,
            &FromTo::new(self.local.clone(), Some(random_string())),
        );
        request.headers.insert_type(
            Name::TO,
            &FromTo::new(NameAddr::uri(self.target.clone()), None),
        );
        request
            .headers
            .insert_named(&CallID::new(random_string()));
        request
            .headers
            .insert_named(&CSeq::new(cseq, Method::Message));
        request.headers.insert_named(&self.content_type);

        request.body = self.body.clone();

        request
    }

    /// Send the MESSAGE, retrying once on a digest challenge
    pub(crate) async fn send(
        &self,
        endpoint: &Endpoint,
        auth: &mut sip_auth::UacAuthSession,
        credentials: &sip_auth::CredentialStore,
    ) -> Result<(), EndReason> {
        let mut cseq = random_sequence_number();

        loop {
            let mut request = self.create_request(cseq);

            auth.authorize_request(&mut request.headers);

            let mut transaction = endpoint
                .send_request(request)
                .await
                .map_err(|_| EndReason::system(Cause::ConnectionError))?;

            let response = match transaction.receive_final().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(EndReason::system(Cause::RequestTimeout))
                }
                Err(_) => return Err(EndReason::system(Cause::ConnectionError)),
            };

            match response.line.code.kind() {
                CodeKind::Success => return Ok(()),
                _ if matches!(
                    response.line.code,
                    Code::UNAUTHORIZED | Code::PROXY_AUTHENTICATION_REQUIRED
                ) =>
                {
                    let request = transaction.request();

                    let handled = auth.handle_authenticate(
                        &response.headers,
                        credentials,
                        sip_auth::RequestParts {
                            line: &request.msg.line,
                            headers: &request.msg.headers,
                            body: &request.msg.body,
                        },
                    );

                    if handled.is_err() {
                        return Err(EndReason::remote(response.line.code));
                    }

                    cseq += 1;
                    continue;
                }
                _ => return Err(EndReason::remote(response.line.code)),
            }
        }
    }
}
