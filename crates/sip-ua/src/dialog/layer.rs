use super::key::DialogKey;
use parking_lot::Mutex;
use sip_core::{Endpoint, EndpointBuilder, IncomingRequest, Layer, MayTake, Result};
use sip_types::{Code, Method};
use slotmap::{DefaultKey, SlotMap};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// A party interested in the requests of one dialog.
///
/// Sessions and subscriptions register usages; every in-dialog request
/// is offered to them in registration order.
#[async_trait::async_trait]
pub trait Usage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn receive(&self, endpoint: &Endpoint, request: MayTake<'_, IncomingRequest>);
}

pub(crate) struct DialogEntry {
    /// Requests received with a CSeq above the expected one, delivered
    /// once the gap closes
    backlog: BTreeMap<u32, IncomingRequest>,
    next_peer_cseq: Option<u32>,
    usages: SlotMap<DefaultKey, Arc<dyn Usage>>,
}

impl DialogEntry {
    pub(super) fn new(peer_cseq: Option<u32>) -> Self {
        Self {
            backlog: Default::default(),
            next_peer_cseq: peer_cseq.map(|cseq| cseq + 1),
            usages: Default::default(),
        }
    }
}

/// Routes in-dialog requests to the usages registered for the dialog
#[derive(Default)]
pub struct DialogLayer {
    pub(super) dialogs: Mutex<HashMap<DialogKey, DialogEntry>>,
}

#[async_trait::async_trait]
impl Layer for DialogLayer {
    fn name(&self) -> &'static str {
        "dialog"
    }

    fn init(&mut self, _: &mut EndpointBuilder) {}

    async fn receive(&self, endpoint: &Endpoint, request: MayTake<'_, IncomingRequest>) {
        let Some(key) = DialogKey::from_incoming(&request) else {
            return;
        };

        let (usages, requests) = {
            let mut dialogs = self.dialogs.lock();

            let Some(entry) = dialogs.get_mut(&key) else {
                return;
            };

            let request_cseq = request.base_headers.cseq.cseq;

            match entry.next_peer_cseq {
                None => {
                    entry.next_peer_cseq = Some(request_cseq + 1);

                    (entry.usages.clone(), vec![request.take()])
                }
                Some(next_cseq) => match request_cseq.cmp(&next_cseq) {
                    Ordering::Less => {
                        // ACKs carry the CSeq of the INVITE they answer
                        if request.line.method != Method::Ack {
                            log::warn!("incoming request has lower CSeq than expected");
                        }

                        (entry.usages.clone(), vec![request.take()])
                    }
                    Ordering::Equal => {
                        let usages = entry.usages.clone();

                        let mut requests = vec![request.take()];

                        for cseq in next_cseq + 1.. {
                            match entry.backlog.remove(&cseq) {
                                Some(buffered) => requests.push(buffered),
                                None => break,
                            }
                        }

                        entry.next_peer_cseq =
                            Some(requests.last().expect("nonempty").base_headers.cseq.cseq + 1);

                        (usages, requests)
                    }
                    Ordering::Greater => {
                        log::debug!("buffering request with CSeq above the expected one");
                        entry.backlog.insert(request_cseq, request.take());
                        return;
                    }
                },
            }
        };

        for request in requests {
            let mut request = Some(request);

            for usage in usages.values() {
                let span = info_span!("usage", name = %usage.name());

                usage
                    .receive(endpoint, MayTake::new(&mut request))
                    .instrument(span)
                    .await;

                if request.is_none() {
                    break;
                }
            }

            if let Some(request) = request {
                if let Err(e) = self.handle_unwanted_request(endpoint, request).await {
                    log::warn!("failed to respond to unwanted in-dialog request, {:?}", e);
                }
            }
        }
    }
}

impl DialogLayer {
    async fn handle_unwanted_request(
        &self,
        endpoint: &Endpoint,
        request: IncomingRequest,
    ) -> Result<()> {
        if request.line.method == Method::Ack {
            return Ok(());
        }

        let response =
            endpoint.create_response(&request, Code::CALL_OR_TRANSACTION_DOES_NOT_EXIST, None);

        if request.line.method == Method::Invite {
            endpoint
                .create_server_inv_tsx(&request)
                .respond_failure(response)
                .await
        } else {
            endpoint.create_server_tsx(&request).respond(response).await
        }
    }
}

/// Keeps a usage registered inside its dialog; dropping it removes the
/// usage again
#[derive(Debug)]
pub struct UsageGuard {
    endpoint: Endpoint,
    dialog_layer: sip_core::LayerKey<DialogLayer>,
    dialog_key: DialogKey,
    usage_key: DefaultKey,
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        let mut dialogs = self.endpoint[self.dialog_layer].dialogs.lock();

        if let Some(entry) = dialogs.get_mut(&self.dialog_key) {
            entry.usages.remove(self.usage_key);
        }
    }
}

/// Register `usage` for the dialog with `dialog_key`.
///
/// Returns `None` when the dialog is already gone.
pub fn register_usage<U>(
    endpoint: Endpoint,
    dialog_layer: sip_core::LayerKey<DialogLayer>,
    dialog_key: DialogKey,
    usage: U,
) -> Option<UsageGuard>
where
    U: Usage,
{
    let mut dialogs = endpoint[dialog_layer].dialogs.lock();
    let entry = dialogs.get_mut(&dialog_key)?;

    let usage_key = entry.usages.insert(Arc::new(usage));

    drop(dialogs);

    Some(UsageGuard {
        endpoint,
        dialog_layer,
        dialog_key,
        usage_key,
    })
}
