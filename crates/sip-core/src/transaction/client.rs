use super::consts::TIMEOUT;
use super::{TsxKey, TsxRegistration, TsxResponse};
use crate::{Endpoint, Error, OutgoingRequest, Request, Result};
use sip_types::{CodeKind, Method};
use std::time::Instant;
use tokio::time::timeout_at;

/// Non-INVITE client transaction.
///
/// The WebSocket transport is reliable, so the request is never
/// retransmitted; Timer F still bounds the wait for a final response.
#[must_use]
#[derive(Debug)]
pub struct ClientTsx {
    registration: Option<TsxRegistration>,
    request: OutgoingRequest,
    timeout: Instant,
    state: State,
}

#[derive(Debug)]
enum State {
    Trying,
    Proceeding,
    Terminated,
}

impl ClientTsx {
    /// Internal: used by [`Endpoint::send_request`]
    #[tracing::instrument(name = "tsx_send", level = "debug", skip(endpoint, request), fields(%request))]
    pub(crate) async fn send(endpoint: Endpoint, request: Request) -> Result<Self> {
        let method = request.line.method.clone();

        assert!(
            !matches!(method, Method::Invite | Method::Ack),
            "tried to create non-INVITE client transaction from {} request",
            method
        );

        let registration = TsxRegistration::create(endpoint, TsxKey::client(&method));

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
            state: State::Trying,
        })
    }

    pub fn request(&self) -> &OutgoingRequest {
        &self.request
    }

    /// Receive the next response.
    ///
    /// Must be called until a final response or an error is returned;
    /// afterwards calling it again panics.
    pub async fn receive(&mut self) -> Result<TsxResponse> {
        let registration = match &mut self.registration {
            Some(registration) => registration,
            None => panic!("transaction already received a final response"),
        };

        match self.state {
            State::Trying | State::Proceeding => {
                let response = match timeout_at(self.timeout.into(), registration.receive_response())
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => return Err(Error::request_timed_out()),
                };

                match response.line.code.kind() {
                    CodeKind::Provisional => {
                        self.state = State::Proceeding;
                    }
                    _ => {
                        self.state = State::Terminated;
                        self.registration.take();
                    }
                }

                Ok(response)
            }
            State::Terminated => {
                panic!("transaction already received a final response")
            }
        }
    }

    /// Discard provisional responses and return the final one
    pub async fn receive_final(&mut self) -> Result<TsxResponse> {
        loop {
            let response = self.receive().await?;

            if response.line.code.kind() == CodeKind::Provisional {
                continue;
            }

            return Ok(response);
        }
    }
}
