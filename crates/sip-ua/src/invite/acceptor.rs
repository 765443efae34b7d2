use super::session::{Role, Session};
use super::timer::{SessionTimer, SessionTimerConfig};
use super::{
    receive_ack, AckOutcome, AwaitedAck, CancellableKey, Inner, InviteLayer, InviteSessionState,
    InviteUsage,
};
use crate::dialog::{register_usage, Dialog, DialogLayer, UsageGuard};
use crate::util::random_string;
use parking_lot as pl;
use sip_core::{Endpoint, Error, IncomingRequest, LayerKey, OutgoingResponse, Result};
use sip_types::header::typed::{Contact, Supported};
use sip_types::{Code, Method};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Handles an incoming INVITE until it is answered or aborted.
///
/// Creating the acceptor assigns the To-tag and creates the UAS dialog;
/// CANCELs arriving while provisional are matched through the invite
/// layer and flip the state to cancelled.
pub struct Acceptor {
    endpoint: Endpoint,
    inner: Arc<Inner>,
    cancellable_key: CancellableKey,
    usage_guard: Option<UsageGuard>,
    cancelled_rx: oneshot::Receiver<()>,

    peer_identity: sip_types::header::typed::FromTo,
    invite_body: bytes::Bytes,

    pub timer_config: SessionTimerConfig,
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.endpoint[self.inner.invite_layer]
            .cancellables
            .lock()
            .remove(&self.cancellable_key);
    }
}

impl Acceptor {
    /// On failure the INVITE is handed back so the caller can still
    /// respond to it
    pub fn new(
        endpoint: Endpoint,
        dialog_layer: LayerKey<DialogLayer>,
        invite_layer: LayerKey<InviteLayer>,
        mut invite: IncomingRequest,
        local_contact: Contact,
        timer_config: SessionTimerConfig,
    ) -> Result<Self, Box<(IncomingRequest, Error)>> {
        assert_eq!(
            invite.line.method,
            Method::Invite,
            "acceptor requires an INVITE request"
        );

        let peer_supports_timer = invite
            .headers
            .get_all_named::<Supported>()
            .unwrap_or_default()
            .iter()
            .any(|ext| ext.0 == "timer");

        let peer_contact: Contact = match invite.headers.get_named() {
            Ok(contact) => contact,
            Err(e) => return Err(Box::new((invite, e.into()))),
        };

        if invite.base_headers.from.tag.is_none() {
            return Err(Box::new((invite, Error::new(Code::BAD_REQUEST))));
        }

        invite.base_headers.to.tag = Some(random_string());

        let dialog = Dialog::new_server(
            endpoint.clone(),
            dialog_layer,
            &invite,
            local_contact,
            peer_contact,
        );

        let dialog_key = dialog.key();

        let cancellable_key = CancellableKey {
            cseq: invite.base_headers.cseq.cseq,
            branch: invite.tsx_key.branch().clone(),
        };

        let (cancelled_tx, cancelled_rx) = oneshot::channel();

        let peer_identity = invite.base_headers.from.clone();
        let invite_body = invite.body.clone();

        let tsx = endpoint.create_server_inv_tsx(&invite);

        let inner = Arc::new(Inner {
            invite_layer,
            state: Mutex::new(InviteSessionState::UasProvisional {
                dialog,
                tsx,
                invite,
                cancel_notify: Some(cancelled_tx),
            }),
            peer_supports_timer,
            awaited_ack: pl::Mutex::new(None),
        });

        let usage_guard = register_usage(
            endpoint.clone(),
            dialog_layer,
            dialog_key,
            InviteUsage {
                inner: inner.clone(),
            },
        )
        .expect("the dialog was created above");

        endpoint[invite_layer]
            .cancellables
            .lock()
            .insert(cancellable_key.clone(), inner.clone());

        Ok(Self {
            endpoint,
            inner,
            cancellable_key,
            usage_guard: Some(usage_guard),
            cancelled_rx,
            peer_identity,
            invite_body,
            timer_config,
        })
    }

    /// From header of the INVITE
    pub fn peer_identity(&self) -> &sip_types::header::typed::FromTo {
        &self.peer_identity
    }

    /// Body of the INVITE; empty for late offers
    pub fn invite_body(&self) -> Option<bytes::Bytes> {
        Some(self.invite_body.clone())
    }

    pub fn peer_supports_timer(&self) -> bool {
        self.inner.peer_supports_timer
    }

    /// Resolves once a CANCEL aborted the INVITE
    pub async fn cancelled(&mut self) {
        let _ = (&mut self.cancelled_rx).await;
    }

    pub async fn create_response(
        &self,
        code: Code,
        reason: Option<bytesstr::BytesStr>,
    ) -> Result<OutgoingResponse> {
        let state = self.inner.state.lock().await;

        if let InviteSessionState::UasProvisional { dialog, invite, .. } = &*state {
            dialog.create_response(invite, code, reason)
        } else {
            Err(Error::new(Code::REQUEST_TERMINATED))
        }
    }

    pub async fn respond_provisional(&mut self, mut response: OutgoingResponse) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        if let InviteSessionState::UasProvisional { tsx, .. } = &mut *state {
            tsx.respond_provisional(&mut response).await
        } else {
            Err(Error::new(Code::REQUEST_TERMINATED))
        }
    }

    /// Answer the INVITE with a 2xx.
    ///
    /// Returns the session together with the outcome of waiting for the
    /// ACK. Timer H firing without an ACK is reported through
    /// [`AckOutcome::TimedOut`]; the caller still receives the session
    /// to end it properly.
    pub async fn respond_success(
        mut self,
        mut response: OutgoingResponse,
    ) -> Result<(Session, AckOutcome)> {
        // hold the state lock for the whole exchange so no other
        // request observes a half-established session
        let mut state = self.inner.state.lock().await;

        let (evt_sink, events) = mpsc::channel(4);
        let established = state.set_established(evt_sink);

        let Some((dialog, transaction, invite)) = established else {
            return Err(Error::new(Code::REQUEST_TERMINATED));
        };

        let (ack_sender, ack_recv) = oneshot::channel();
        *self.inner.awaited_ack.lock() = Some(AwaitedAck {
            cseq: invite.base_headers.cseq.cseq,
            ack_sender,
        });

        let session_timer = if self.peer_supports_timer() {
            self.timer_config.on_responding_success(&mut response, &invite)
        } else {
            SessionTimer::off()
        };

        let accepted = transaction.respond_success(response).await?;

        let outcome = receive_ack(accepted, ack_recv).await?;

        drop(state);

        let session = Session::new(
            self.endpoint.clone(),
            self.inner.clone(),
            Role::Uas,
            events,
            session_timer,
            self.usage_guard.take().expect("taken only here"),
            dialog,
        );

        Ok((session, outcome))
    }

    /// Refuse the INVITE with a final failure response
    pub async fn respond_failure(self, response: OutgoingResponse) -> Result<()> {
        if let Some((_, transaction, _)) = self.inner.state.lock().await.set_cancelled() {
            transaction.respond_failure(response).await
        } else {
            Err(Error::new(Code::REQUEST_TERMINATED))
        }
    }

    /// Like [`Acceptor::respond_failure`] for callers that cannot give
    /// up the acceptor, e.g. on a ring timeout inside a select
    pub async fn respond_failure_ref(&mut self, response: OutgoingResponse) -> Result<()> {
        if let Some((_, transaction, _)) = self.inner.state.lock().await.set_cancelled() {
            transaction.respond_failure(response).await
        } else {
            Err(Error::new(Code::REQUEST_TERMINATED))
        }
    }
}
