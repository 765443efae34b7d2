use super::consts::TIMEOUT;
use super::{TsxKey, TsxRegistration, TsxResponse};
use crate::{Endpoint, Error, OutgoingRequest, Request, Result};
use bytes::Bytes;
use sip_types::header::typed::CSeq;
use sip_types::header::HeaderError;
use sip_types::msg::RequestLine;
use sip_types::{CodeKind, Headers, Method, Name};
use std::time::Instant;
use tokio::time::timeout_at;

/// INVITE client transaction.
///
/// Timer B bounds the wait for a final response. A 2xx moves the
/// transaction into `Accepted` where retransmitted or forked 2xx
/// responses keep being surfaced for another 64*T1, ACKs for non-2xx
/// finals are generated inside the transaction.
#[must_use]
#[derive(Debug)]
pub struct ClientInvTsx {
    registration: Option<TsxRegistration>,
    request: OutgoingRequest,
    timeout: Instant,
    state: State,
}

#[derive(Debug)]
enum State {
    Calling,
    Proceeding,
    Accepted,
    Completed,
    Terminated,
}

impl ClientInvTsx {
    /// Internal: used by [`Endpoint::send_invite`]
    #[tracing::instrument(name = "tsx_inv_send", level = "debug", skip(endpoint, request), fields(%request))]
    pub(crate) async fn send(endpoint: Endpoint, request: Request) -> Result<Self> {
        assert_eq!(
            request.line.method,
            Method::Invite,
            "tried to create INVITE client transaction from {} request",
            request.line.method
        );

        let registration = TsxRegistration::create(endpoint, TsxKey::client(&Method::Invite));

        let via = registration
            .endpoint
            .create_via(registration.tsx_key.branch().clone());

        let mut request = OutgoingRequest {
            msg: request,
            buffer: Default::default(),
        };

        request.msg.headers.insert_named_front(&via);

        registration
            .endpoint
            .send_outgoing_request(&mut request)
            .await?;

        Ok(Self {
            registration: Some(registration),
            request,
            timeout: Instant::now() + TIMEOUT,
            state: State::Calling,
        })
    }

    /// Send a CANCEL for the INVITE this transaction was created from.
    ///
    /// The CANCEL reuses the INVITE's branch, its 200 is absorbed by the
    /// endpoint as an orphan.
    pub async fn cancel(&self, request: Request) -> Result<()> {
        let registration = self
            .registration
            .as_ref()
            .expect("cancel is only valid while the transaction is live");

        let via = registration
            .endpoint
            .create_via(registration.tsx_key.branch().clone());

        let mut request = OutgoingRequest {
            msg: request,
            buffer: Default::default(),
        };

        request.msg.headers.insert_named_front(&via);

        registration
            .endpoint
            .send_outgoing_request(&mut request)
            .await?;

        Ok(())
    }

    pub fn request(&self) -> &OutgoingRequest {
        &self.request
    }

    /// Receive one or more responses.
    ///
    /// May return multiple final 2xx responses when the INVITE forked.
    /// Returns `None` once the transaction terminated and no further
    /// response can arrive.
    #[tracing::instrument(name = "tsx_inv_receive", level = "debug", skip(self))]
    pub async fn receive(&mut self) -> Result<Option<TsxResponse>> {
        let registration = match &mut self.registration {
            Some(registration) => registration,
            None => return Ok(None),
        };

        match self.state {
            State::Calling | State::Proceeding => {
                let msg = match timeout_at(self.timeout.into(), registration.receive_response())
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => return Err(Error::request_timed_out()),
                };

                self.handle_msg(msg).await
            }
            State::Accepted => {
                match timeout_at(self.timeout.into(), registration.receive_response()).await {
                    Ok(msg) => Ok(Some(msg?)),
                    Err(_) => {
                        self.state = State::Terminated;
                        self.registration.take();
                        Ok(None)
                    }
                }
            }
            State::Completed | State::Terminated => Ok(None),
        }
    }

    async fn handle_msg(&mut self, msg: TsxResponse) -> Result<Option<TsxResponse>> {
        match msg.line.code.kind() {
            CodeKind::Provisional => {
                self.state = State::Proceeding;
            }
            CodeKind::Success => {
                // accept (possibly forked) 2xx responses for another 64*T1
                self.timeout = Instant::now() + TIMEOUT;
                self.state = State::Accepted;
            }
            _ => {
                let registration = self.registration.take().expect("checked by receive");

                let mut ack = create_ack(&self.request, &msg)?;

                registration
                    .endpoint
                    .send_outgoing_request(&mut ack)
                    .await?;

                // reliable transport, the completed state has no
                // retransmissions to absorb
                self.state = State::Terminated;
            }
        }

        Ok(Some(msg))
    }
}

/// ACK acknowledging a non-2xx final response, sent within the INVITE
/// transaction and sharing its Via branch
fn create_ack(
    request: &OutgoingRequest,
    response: &TsxResponse,
) -> Result<OutgoingRequest, HeaderError> {
    let mut headers = Headers::with_capacity(5);

    request.msg.headers.clone_into(&mut headers, Name::VIA)?;
    request.msg.headers.clone_into(&mut headers, Name::FROM)?;
    response.headers.clone_into(&mut headers, Name::TO)?;
    request
        .msg
        .headers
        .clone_into(&mut headers, Name::CALL_ID)?;

    let cseq = request.msg.headers.get_named::<CSeq>()?;

    headers.insert_named(&CSeq {
        cseq: cseq.cseq,
        method: Method::Ack,
    });

    Ok(OutgoingRequest {
        msg: Request {
            line: RequestLine {
                method: Method::Ack,
                uri: request.msg.line.uri.clone(),
            },
            headers,
            body: Bytes::new(),
        },
        buffer: Default::default(),
    })
}
