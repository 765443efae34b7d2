use super::consts::TIMEOUT;
use super::TsxRegistration;
use crate::{Endpoint, IncomingRequest, OutgoingResponse, Result};
use sip_types::msg::MessageLine;
use sip_types::{CodeKind, Method};
use std::time::Instant;
use tokio::time::timeout_at;

/// Non-INVITE server transaction
#[derive(Debug)]
pub struct ServerTsx {
    registration: TsxRegistration,
}

impl ServerTsx {
    /// Internal: used by [`Endpoint::create_server_tsx`]
    pub(crate) fn new(endpoint: Endpoint, request: &IncomingRequest) -> Self {
        assert!(
            !matches!(request.line.method, Method::Invite | Method::Ack),
            "tried to create non-INVITE server transaction from {} request",
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

    /// Send the final response.
    ///
    /// The registration lives on in a background task for a while,
    /// replaying the response to duplicates of the request.
    pub async fn respond(mut self, mut response: OutgoingResponse) -> Result<()> {
        assert_ne!(response.msg.line.code.kind(), CodeKind::Provisional);

        self.registration
            .endpoint
            .send_outgoing_response(&mut response)
            .await?;

        let abandon = Instant::now() + TIMEOUT;

        tokio::spawn(async move {
            while let Ok(Ok(msg)) =
                timeout_at(abandon.into(), self.registration.receive()).await
            {
                if let MessageLine::Request(_) = msg.line {
                    if let Err(e) = self
                        .registration
                        .endpoint
                        .send_outgoing_response(&mut response)
                        .await
                    {
                        log::warn!("failed to replay final response, {}", e);
                    }
                }
            }
        });

        Ok(())
    }
}
