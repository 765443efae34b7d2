use super::{TsxEvent, TsxKey, TsxMessage, TsxResponse};
use crate::{Endpoint, Error};
use sip_types::msg::MessageLine;
use tokio::sync::mpsc;

/// Internal: registers a transaction inside the endpoint and receives
/// the messages matched to it
#[derive(Debug)]
pub(crate) struct TsxRegistration {
    pub(crate) endpoint: Endpoint,
    pub(crate) tsx_key: TsxKey,

    receiver: mpsc::UnboundedReceiver<TsxEvent>,
}

impl TsxRegistration {
    pub(crate) fn create(endpoint: Endpoint, tsx_key: TsxKey) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        endpoint
            .transactions()
            .register_transaction(tsx_key.clone(), sender);

        Self {
            endpoint,
            tsx_key,
            receiver,
        }
    }

    /// Receive the next message routed to this transaction.
    ///
    /// Returns a transport error once the connection below is gone.
    pub(crate) async fn receive(&mut self) -> Result<TsxMessage, Error> {
        match self
            .receiver
            .recv()
            .await
            .expect("registration owns the handler inside the endpoint")
        {
            TsxEvent::Message(msg) => Ok(msg),
            TsxEvent::TransportFailed => Err(Error::transport_failed()),
        }
    }

    /// Receive the next response, discarding stray requests
    pub(crate) async fn receive_response(&mut self) -> Result<TsxResponse, Error> {
        loop {
            let msg = self.receive().await?;

            match msg.line {
                MessageLine::Request(_) => {
                    log::debug!("{} discarding request received in client context", self.tsx_key);
                }
                MessageLine::Response(line) => {
                    return Ok(TsxResponse {
                        line,
                        base_headers: msg.base_headers,
                        headers: msg.headers,
                        body: msg.body,
                    })
                }
            }
        }
    }
}

impl Drop for TsxRegistration {
    fn drop(&mut self) {
        self.endpoint
            .transactions()
            .remove_transaction(&self.tsx_key);
    }
}
