use super::consts::{T1, T2, TIMEOUT};
use super::TsxRegistration;
use crate::{Endpoint, IncomingRequest, OutgoingResponse, Result};
use sip_types::msg::MessageLine;
use sip_types::{Code, CodeKind, Method};
use std::io;
use std::time::Instant;
use tokio::time::timeout_at;

/// INVITE server transaction.
///
/// A success response hands retransmission duty to the caller through
/// [`Accepted`], failure responses are replayed until the ACK arrives
/// or Timer H fires.
#[derive(Debug)]
pub struct ServerInvTsx {
    registration: TsxRegistration,
}

impl ServerInvTsx {
    /// Internal: used by [`Endpoint::create_server_inv_tsx`]
    pub(crate) fn new(endpoint: Endpoint, request: &IncomingRequest) -> Self {
        assert_eq!(
            request.line.method,
            Method::Invite,
            "tried to create INVITE server transaction from {} request",
            request.line.method
        );

        let registration = TsxRegistration::create(endpoint, request.tsx_key.clone());

        Self { registration }
    }

    pub async fn respond_provisional(&mut self, response: &mut OutgoingResponse) -> Result<()> {
        assert_eq!(response.msg.line.code.kind(), CodeKind::Provisional);

        self.registration
            .endpoint
            .send_outgoing_response(response)
            .await?;

        Ok(())
    }

    /// Send a 2xx response.
    ///
    /// The transaction is consumed, the returned [`Accepted`] retransmits
    /// the response while its owner waits for the ACK.
    pub async fn respond_success(mut self, mut response: OutgoingResponse) -> Result<Accepted> {
        assert_eq!(response.msg.line.code.kind(), CodeKind::Success);

        self.registration
            .endpoint
            .send_outgoing_response(&mut response)
            .await?;

        Ok(Accepted {
            registration: self.registration,
            response,
        })
    }

    /// Send a non-2xx final response and wait for its ACK
    pub async fn respond_failure(mut self, mut response: OutgoingResponse) -> Result<()> {
        assert!(!matches!(
            response.msg.line.code.kind(),
            CodeKind::Provisional | CodeKind::Success
        ));

        self.registration
            .endpoint
            .send_outgoing_response(&mut response)
            .await?;

        // Timer H bounds the whole wait, the retransmit interval starts
        // at T1 and doubles up to T2
        let abandon = Instant::now() + TIMEOUT;
        let mut retransmit_delta = T1;
        let mut retransmit = Instant::now() + retransmit_delta;

        loop {
            match timeout_at(retransmit.into(), self.registration.receive()).await {
                Ok(msg) => match msg?.line {
                    MessageLine::Request(line) if line.method == Method::Invite => {
                        self.registration
                            .endpoint
                            .send_outgoing_response(&mut response)
                            .await?;
                    }
                    MessageLine::Request(line) if line.method == Method::Ack => {
                        return Ok(());
                    }
                    _ => {}
                },
                Err(_) => {
                    if Instant::now() > abandon {
                        bail_status!(Code::REQUEST_TIMEOUT)
                    }

                    self.registration
                        .endpoint
                        .send_outgoing_response(&mut response)
                        .await?;

                    retransmit_delta = (retransmit_delta * 2).min(T2);
                    retransmit = Instant::now() + retransmit_delta;
                }
            }
        }
    }
}

/// INVITE transaction that answered 2xx; owned by the session while it
/// waits for the ACK
#[must_use]
#[derive(Debug)]
pub struct Accepted {
    registration: TsxRegistration,
    response: OutgoingResponse,
}

impl Accepted {
    pub async fn retransmit(&mut self) -> io::Result<()> {
        self.registration
            .endpoint
            .send_outgoing_response(&mut self.response)
            .await
    }
}
