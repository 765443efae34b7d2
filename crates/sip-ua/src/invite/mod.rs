//! INVITE sessions: initial offer/answer, re-INVITE, hold, DTMF,
//! transfer and session timers

use crate::dialog::{Dialog, Usage};
use parking_lot as pl;
use session::UsageEvent;
use sip_core::transaction::consts::{T1, T2, TIMEOUT};
use sip_core::transaction::{Accepted, ServerInvTsx};
use sip_core::{
    Endpoint, EndpointBuilder, Error, IncomingRequest, Layer, LayerKey, MayTake, OutgoingRequest,
    Result,
};
use sip_types::header::typed::CSeq;
use sip_types::{Code, Method};
use std::collections::HashMap;
use std::fmt;
use std::mem::replace;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

pub mod acceptor;
pub mod dtmf;
pub mod initiator;
pub mod session;
pub mod timer;

/// Smallest `Session-Expires` accepted from a peer (RFC 4028)
pub const MIN_SESSION_EXPIRES: u32 = 90;

#[derive(Debug)]
struct AwaitedAck {
    cseq: u32,
    ack_sender: oneshot::Sender<IncomingRequest>,
}

/// State shared between the INVITE objects and the dialog usage
#[derive(Debug)]
struct Inner {
    invite_layer: LayerKey<InviteLayer>,
    state: Mutex<InviteSessionState>,

    peer_supports_timer: bool,

    awaited_ack: pl::Mutex<Option<AwaitedAck>>,
}

#[allow(clippy::large_enum_variant)]
enum InviteSessionState {
    /// Incoming INVITE before a final response was sent
    UasProvisional {
        dialog: Dialog,
        tsx: ServerInvTsx,
        invite: IncomingRequest,
        cancel_notify: Option<oneshot::Sender<()>>,
    },

    /// A CANCEL aborted the INVITE transaction
    Cancelled,

    /// The session is established, requests received by the usage are
    /// forwarded into the session object
    Established {
        evt_sink: mpsc::Sender<UsageEvent>,
    },

    /// A BYE ended the session
    Terminated,
}

impl fmt::Debug for InviteSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UasProvisional { .. } => f.write_str("UasProvisional"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Established { .. } => f.write_str("Established"),
            Self::Terminated => f.write_str("Terminated"),
        }
    }
}

impl InviteSessionState {
    /// Move to Cancelled, returning the pending transaction if the
    /// state was provisional
    fn set_cancelled(&mut self) -> Option<(Dialog, ServerInvTsx, IncomingRequest)> {
        if !matches!(self, Self::UasProvisional { .. }) {
            return None;
        }

        match replace(self, Self::Cancelled) {
            Self::UasProvisional {
                dialog,
                tsx,
                invite,
                cancel_notify,
            } => {
                if let Some(cancel_notify) = cancel_notify {
                    let _ = cancel_notify.send(());
                }

                Some((dialog, tsx, invite))
            }
            _ => unreachable!(),
        }
    }

    /// Move to Established, returning the pending transaction if the
    /// state was provisional
    fn set_established(
        &mut self,
        evt_sink: mpsc::Sender<UsageEvent>,
    ) -> Option<(Dialog, ServerInvTsx, IncomingRequest)> {
        if !matches!(self, Self::UasProvisional { .. }) {
            return None;
        }

        match replace(self, Self::Established { evt_sink }) {
            Self::UasProvisional {
                dialog,
                tsx,
                invite,
                ..
            } => Some((dialog, tsx, invite)),
            _ => unreachable!(),
        }
    }

    fn set_terminated(&mut self) -> Self {
        replace(self, Self::Terminated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CancellableKey {
    cseq: u32,
    branch: bytesstr::BytesStr,
}

/// Layer matching CANCEL requests to pending incoming INVITEs
#[derive(Default)]
pub struct InviteLayer {
    cancellables: pl::Mutex<HashMap<CancellableKey, Arc<Inner>>>,
}

#[async_trait::async_trait]
impl Layer for InviteLayer {
    fn name(&self) -> &'static str {
        "invite"
    }

    fn init(&mut self, endpoint: &mut EndpointBuilder) {
        endpoint.add_allow(Method::Invite);
        endpoint.add_allow(Method::Update);
        endpoint.add_allow(Method::Bye);
        endpoint.add_allow(Method::Ack);
        endpoint.add_allow(Method::Cancel);
        endpoint.add_allow(Method::Info);
        endpoint.add_allow(Method::Refer);
        endpoint.add_allow(Method::Notify);

        endpoint.add_supported("timer");
    }

    async fn receive(&self, endpoint: &Endpoint, mut request: MayTake<'_, IncomingRequest>) {
        if request.line.method == Method::Cancel {
            if let Err(e) = self
                .handle_cancel(endpoint, MayTake::new(request.inner()))
                .await
            {
                log::error!("failed to handle CANCEL request, {:?}", e);
            }
        }
    }
}

impl InviteLayer {
    async fn handle_cancel(
        &self,
        endpoint: &Endpoint,
        cancel: MayTake<'_, IncomingRequest>,
    ) -> Result<()> {
        let inner = {
            let mut cancellables = self.cancellables.lock();

            cancellables.remove(&CancellableKey {
                cseq: cancel.base_headers.cseq.cseq,
                branch: cancel.tsx_key.branch().clone(),
            })
        };

        let Some(inner) = inner else {
            // no matching invite, the dispatcher will answer 481
            return Ok(());
        };

        let cancel = cancel.take();
        let cancel_tsx = endpoint.create_server_tsx(&cancel);

        let mut state = inner.state.lock().await;

        if let Some((dialog, invite_tsx, invite)) = state.set_cancelled() {
            let invite_response =
                dialog.create_response(&invite, Code::REQUEST_TERMINATED, None)?;

            let cancel_response = dialog.create_response(&cancel, Code::OK, None)?;

            let (r1, r2) = tokio::join!(
                invite_tsx.respond_failure(invite_response),
                cancel_tsx.respond(cancel_response)
            );

            r1?;
            r2
        } else {
            // invite already answered, only the CANCEL gets its 200
            let response = endpoint.create_response(&cancel, Code::OK, None);

            cancel_tsx.respond(response).await
        }
    }
}

/// Dialog usage forwarding in-dialog requests into the session
struct InviteUsage {
    inner: Arc<Inner>,
}

#[async_trait::async_trait]
impl Usage for InviteUsage {
    fn name(&self) -> &'static str {
        "invite-usage"
    }

    async fn receive(&self, endpoint: &Endpoint, mut request: MayTake<'_, IncomingRequest>) {
        match request.line.method {
            Method::Invite | Method::Update | Method::Info | Method::Refer | Method::Notify => {
                let state = self.inner.state.lock().await;

                if let InviteSessionState::Established { evt_sink } = &*state {
                    let incoming = request.inner().take().expect("present");

                    if let Err(SendError(event)) =
                        evt_sink.send(UsageEvent::Request(incoming)).await
                    {
                        let UsageEvent::Request(incoming) = event else {
                            unreachable!()
                        };

                        *request.inner() = Some(incoming);
                    }
                }
            }
            Method::Ack => {
                let mut awaited_ack = self.inner.awaited_ack.lock();

                if let Some(expected) = awaited_ack.take() {
                    if expected.cseq == request.base_headers.cseq.cseq {
                        let ack = request.inner().take().expect("present");

                        if let Err(ack) = expected.ack_sender.send(ack) {
                            *request.inner() = Some(ack);
                        }
                    } else {
                        *awaited_ack = Some(expected);
                    }
                }
            }
            Method::Bye => {
                let mut state = self.inner.state.lock().await;

                match state.set_terminated() {
                    InviteSessionState::UasProvisional {
                        dialog,
                        tsx,
                        invite,
                        ..
                    } => {
                        if let Err(e) = self
                            .handle_bye_in_provisional_state(
                                endpoint,
                                dialog,
                                tsx,
                                invite,
                                request.take(),
                            )
                            .await
                        {
                            log::warn!("failed to handle BYE before the final response, {:?}", e);
                        }
                    }
                    InviteSessionState::Established { evt_sink } => {
                        let bye = request.inner().take().expect("present");

                        if let Err(SendError(event)) = evt_sink.send(UsageEvent::Bye(bye)).await {
                            let UsageEvent::Bye(bye) = event else {
                                unreachable!()
                            };

                            *request.inner() = Some(bye);
                        }
                    }
                    InviteSessionState::Cancelled | InviteSessionState::Terminated => {}
                }
            }
            _ => {}
        }
    }
}

impl InviteUsage {
    async fn handle_bye_in_provisional_state(
        &self,
        endpoint: &Endpoint,
        dialog: Dialog,
        invite_tsx: ServerInvTsx,
        invite: IncomingRequest,
        bye: IncomingRequest,
    ) -> Result<()> {
        let bye_response = dialog.create_response(&bye, Code::OK, None)?;
        let bye_tsx = endpoint.create_server_tsx(&bye);

        let invite_response = dialog.create_response(&invite, Code::REQUEST_TERMINATED, None)?;

        let (r1, r2) = tokio::join!(
            invite_tsx.respond_failure(invite_response),
            bye_tsx.respond(bye_response)
        );

        r1?;
        r2
    }
}

/// Build an ACK for the 2xx with `cseq_num`
pub async fn create_ack(dialog: &mut Dialog, cseq_num: u32) -> Result<OutgoingRequest> {
    let mut ack = dialog.create_request(Method::Ack);

    ack.headers
        .edit_named(|cseq: &mut CSeq| cseq.cseq = cseq_num)?;

    // ACK for a 2xx is its own transaction, the branch is never
    // registered as no response will arrive
    let via = dialog
        .endpoint
        .create_via(sip_core::transaction::generate_branch());

    ack.headers.insert_named_front(&via);

    Ok(OutgoingRequest {
        msg: ack,
        buffer: Default::default(),
    })
}

/// What waiting for the ACK of a 2xx produced
#[derive(Debug)]
pub enum AckOutcome {
    Ack(IncomingRequest),
    /// Timer H fired without an ACK
    TimedOut,
}

/// Retransmit the 2xx until its ACK arrives or Timer H fires.
///
/// The retransmit interval starts at T1 and doubles up to T2.
async fn receive_ack(
    mut accepted: Accepted,
    mut ack_recv: oneshot::Receiver<IncomingRequest>,
) -> Result<AckOutcome, Error> {
    let deadline = Instant::now() + TIMEOUT;
    let mut delta = T1;

    loop {
        match timeout(delta, &mut ack_recv).await {
            Ok(res) => {
                return Ok(AckOutcome::Ack(res.expect("ack sender is kept in awaited_ack")));
            }
            Err(_) => {
                if Instant::now() >= deadline {
                    return Ok(AckOutcome::TimedOut);
                }

                accepted.retransmit().await?;
                delta = (delta * 2).min(T2);
            }
        }
    }
}
