use super::timer::{SessionTimer, TimerRole};
use super::{create_ack, receive_ack, AckOutcome, AwaitedAck, Inner};
use crate::dialog::{Dialog, UsageGuard};
use sip_core::transaction::TsxResponse;
use sip_core::{Endpoint, Error, IncomingRequest, Result};
use sip_types::header::typed::{ContentType, ReferTo};
use sip_types::{Code, CodeKind, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uac,
    Uas,
}

/// An established INVITE session.
///
/// Must be driven via [`Session::drive`] to receive in-dialog requests
/// and keep the session timer honest.
#[derive(Debug)]
pub struct Session {
    pub endpoint: Endpoint,
    inner: Arc<Inner>,

    pub role: Role,

    usage_events: Receiver<UsageEvent>,

    session_timer: SessionTimer,

    // dropped before the dialog
    _usage_guard: UsageGuard,
    pub dialog: Dialog,
}

pub(super) enum UsageEvent {
    Request(IncomingRequest),
    Bye(IncomingRequest),
}

/// Event surfaced by [`Session::drive`]
pub enum SessionEvent<'s> {
    /// The refresh interval elapsed, this side must refresh now
    RefreshNeeded(RefreshNeeded<'s>),
    /// The peer sent a re-INVITE
    ReInviteReceived(ReInviteReceived<'s>),
    /// The peer sent an UPDATE
    UpdateReceived(UpdateReceived<'s>),
    /// The peer sent an INFO
    InfoReceived(InfoReceived<'s>),
    /// The peer asked for a transfer
    ReferReceived(ReferReceived<'s>),
    /// The peer sent a NOTIFY, e.g. transfer progress
    NotifyReceived(NotifyReceived<'s>),
    /// The peer ended the session
    Bye(ByeEvent<'s>),
    /// The session expired without a timer refresh
    Expired(ExpiredEvent<'s>),
    /// The session is gone
    Terminated,
}

/// Outcome of sending a re-INVITE or UPDATE
#[derive(Debug)]
pub enum RenegotiateOutcome {
    /// 2xx, acknowledged when the request was an INVITE
    Accepted(TsxResponse),
    /// Final failure that leaves the dialog alive
    Rejected(TsxResponse),
    /// 408 or 481, the dialog is dead and the session must end
    DialogTerminated(TsxResponse),
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        endpoint: Endpoint,
        inner: Arc<Inner>,
        role: Role,
        usage_events: Receiver<UsageEvent>,
        session_timer: SessionTimer,
        usage_guard: UsageGuard,
        dialog: Dialog,
    ) -> Self {
        Self {
            endpoint,
            inner,
            role,
            usage_events,
            session_timer,
            _usage_guard: usage_guard,
            dialog,
        }
    }

    pub fn peer_supports_timer(&self) -> bool {
        self.inner.peer_supports_timer
    }

    pub fn timer_role(&self) -> TimerRole {
        self.session_timer.role
    }

    pub async fn drive(&mut self) -> Result<SessionEvent<'_>> {
        select! {
            _ = self.session_timer.wait() => {
                self.handle_session_timer()
            }
            event = self.usage_events.recv() => {
                self.handle_usage_event(event)
            }
        }
    }

    /// End the session with a BYE
    pub async fn terminate(&mut self) -> Result<()> {
        self.inner.state.lock().await.set_terminated();

        let request = self.dialog.create_request(Method::Bye);
        let mut transaction = self.endpoint.send_request(request).await?;
        let response = transaction.receive_final().await?;

        match response.line.code.kind() {
            CodeKind::Success => Ok(()),
            _ => Err(Error::new(response.line.code)),
        }
    }

    /// Send a re-INVITE carrying `body` as the new offer.
    ///
    /// Refused while another INVITE or UPDATE transaction is pending on
    /// the dialog. A 491 is retried after the randomized backoff of
    /// RFC 3261 Section 14.1.
    pub async fn send_reinvite(
        &mut self,
        body: Option<(ContentType, bytes::Bytes)>,
    ) -> Result<RenegotiateOutcome> {
        self.send_renegotiate(Method::Invite, body).await
    }

    /// Send an UPDATE, usually as a session timer refresh
    pub async fn send_update(
        &mut self,
        body: Option<(ContentType, bytes::Bytes)>,
    ) -> Result<RenegotiateOutcome> {
        self.send_renegotiate(Method::Update, body).await
    }

    async fn send_renegotiate(
        &mut self,
        method: Method,
        body: Option<(ContentType, bytes::Bytes)>,
    ) -> Result<RenegotiateOutcome> {
        if self.dialog.uac_pending_reply || self.dialog.uas_pending_reply {
            // glare avoidance: only one INVITE/UPDATE may be pending
            return Err(Error::new(Code::REQUEST_PENDING));
        }

        self.dialog.uac_pending_reply = true;

        let result = self.send_renegotiate_inner(method, body).await;

        self.dialog.uac_pending_reply = false;

        result
    }

    async fn send_renegotiate_inner(
        &mut self,
        method: Method,
        body: Option<(ContentType, bytes::Bytes)>,
    ) -> Result<RenegotiateOutcome> {
        loop {
            let mut request = self.dialog.create_request(method.clone());

            if let Some((content_type, body)) = &body {
                request.headers.insert_named(content_type);
                request.body = body.clone();
            }

            let response = if method == Method::Invite {
                let mut transaction = self.endpoint.send_invite(request).await?;

                let mut response = None;

                while let Some(received) = transaction.receive().await? {
                    match received.line.code.kind() {
                        CodeKind::Provisional => continue,
                        _ => {
                            response = Some(received);
                            break;
                        }
                    }
                }

                response.ok_or_else(Error::request_timed_out)?
            } else {
                let mut transaction = self.endpoint.send_request(request).await?;

                transaction.receive_final().await?
            };

            let code = response.line.code;

            if code.kind() == CodeKind::Success {
                if method == Method::Invite {
                    let mut ack =
                        create_ack(&mut self.dialog, response.base_headers.cseq.cseq).await?;

                    self.endpoint.send_outgoing_request(&mut ack).await?;
                }

                self.session_timer.reset();

                return Ok(RenegotiateOutcome::Accepted(response));
            }

            if code == Code::REQUEST_PENDING {
                let delay = reattempt_delay(self.role);

                log::debug!("renegotiation glare, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;

                continue;
            }

            // only these kill the dialog, everything else leaves the
            // session running
            if code == Code::REQUEST_TIMEOUT
                || code == Code::CALL_OR_TRANSACTION_DOES_NOT_EXIST
            {
                return Ok(RenegotiateOutcome::DialogTerminated(response));
            }

            return Ok(RenegotiateOutcome::Rejected(response));
        }
    }

    /// Build a REFER asking the peer to call `refer_to`
    pub fn create_refer(&mut self, refer_to: ReferTo) -> sip_core::Request {
        let mut request = self.dialog.create_request(Method::Refer);

        request.headers.insert_named(&refer_to);

        request
    }

    fn handle_usage_event(&mut self, event: Option<UsageEvent>) -> Result<SessionEvent<'_>> {
        let Some(event) = event else {
            // the usage dropped its sender, the state is Terminated
            return Ok(SessionEvent::Terminated);
        };

        match event {
            UsageEvent::Bye(request) => {
                let transaction = self.endpoint.create_server_tsx(&request);

                Ok(SessionEvent::Bye(ByeEvent {
                    session: self,
                    bye: request,
                    transaction,
                }))
            }
            UsageEvent::Request(request) => match request.line.method {
                Method::Invite => {
                    self.session_timer.reset();
                    self.dialog.uas_pending_reply = true;

                    let transaction = self.endpoint.create_server_inv_tsx(&request);

                    Ok(SessionEvent::ReInviteReceived(ReInviteReceived {
                        session: self,
                        invite: request,
                        transaction,
                    }))
                }
                Method::Update => {
                    self.session_timer.reset();

                    let transaction = self.endpoint.create_server_tsx(&request);

                    Ok(SessionEvent::UpdateReceived(UpdateReceived {
                        session: self,
                        update: request,
                        transaction,
                    }))
                }
                Method::Info => {
                    let transaction = self.endpoint.create_server_tsx(&request);

                    Ok(SessionEvent::InfoReceived(InfoReceived {
                        session: self,
                        info: request,
                        transaction,
                    }))
                }
                Method::Refer => {
                    let transaction = self.endpoint.create_server_tsx(&request);

                    Ok(SessionEvent::ReferReceived(ReferReceived {
                        session: self,
                        refer: request,
                        transaction,
                    }))
                }
                Method::Notify => {
                    let transaction = self.endpoint.create_server_tsx(&request);

                    Ok(SessionEvent::NotifyReceived(NotifyReceived {
                        session: self,
                        notify: request,
                        transaction,
                    }))
                }
                _ => unreachable!("usage only forwards session methods"),
            },
        }
    }

    fn handle_session_timer(&mut self) -> Result<SessionEvent<'_>> {
        match self.session_timer.role {
            TimerRole::Off => unreachable!("timer never fires when off"),
            TimerRole::Refresher => {
                self.session_timer.reset();

                Ok(SessionEvent::RefreshNeeded(RefreshNeeded { session: self }))
            }
            TimerRole::Observer => Ok(SessionEvent::Expired(ExpiredEvent { session: self })),
        }
    }
}

/// Delay before retrying a request that hit 491 Request Pending.
///
/// The owner of the dialog's Call-ID backs off longer than the peer.
pub fn reattempt_delay(role: Role) -> Duration {
    use rand::Rng;

    let secs: f64 = match role {
        Role::Uac => rand::thread_rng().gen_range(2.1..4.0),
        Role::Uas => rand::thread_rng().gen_range(0.0..2.0),
    };

    Duration::from_secs_f64(secs)
}

pub struct RefreshNeeded<'s> {
    pub session: &'s mut Session,
}

impl RefreshNeeded<'_> {
    /// Refresh with a bodyless UPDATE
    pub async fn process_default(self) -> Result<()> {
        match self.session.send_update(None).await? {
            RenegotiateOutcome::Accepted(_) => Ok(()),
            RenegotiateOutcome::Rejected(response) => {
                log::warn!("session refresh rejected with {}", response.line.code);
                Ok(())
            }
            RenegotiateOutcome::DialogTerminated(response) => Err(Error::new(response.line.code)),
        }
    }
}

pub struct ExpiredEvent<'s> {
    pub session: &'s mut Session,
}

impl ExpiredEvent<'_> {
    /// The peer never refreshed, end the session
    pub async fn process_default(self) -> Result<()> {
        self.session.terminate().await
    }
}

pub struct ReInviteReceived<'s> {
    pub session: &'s mut Session,
    pub invite: IncomingRequest,
    pub transaction: sip_core::transaction::ServerInvTsx,
}

impl ReInviteReceived<'_> {
    /// Answer the re-INVITE and wait for its ACK
    pub async fn respond_success(
        self,
        response: sip_core::OutgoingResponse,
    ) -> Result<AckOutcome> {
        let (ack_sender, ack_recv) = oneshot::channel();

        *self.session.inner.awaited_ack.lock() = Some(AwaitedAck {
            cseq: self.invite.base_headers.cseq.cseq,
            ack_sender,
        });

        let accepted = self.transaction.respond_success(response).await?;

        let outcome = receive_ack(accepted, ack_recv).await;

        self.session.dialog.uas_pending_reply = false;

        outcome
    }

    pub async fn respond_failure(self, code: Code) -> Result<()> {
        let response = self.session.dialog.create_response(&self.invite, code, None)?;

        let result = self.transaction.respond_failure(response).await;

        self.session.dialog.uas_pending_reply = false;

        result
    }
}

pub struct UpdateReceived<'s> {
    pub session: &'s mut Session,
    pub update: IncomingRequest,
    pub transaction: sip_core::transaction::ServerTsx,
}

impl UpdateReceived<'_> {
    /// Answer the UPDATE, optionally with an SDP answer
    pub async fn respond_success(
        self,
        body: Option<(ContentType, bytes::Bytes)>,
    ) -> Result<()> {
        let mut response = self
            .session
            .dialog
            .create_response(&self.update, Code::OK, None)?;

        if let Some((content_type, body)) = body {
            response.msg.headers.insert_named(&content_type);
            response.msg.body = body;
        }

        self.transaction.respond(response).await
    }
}

pub struct InfoReceived<'s> {
    pub session: &'s mut Session,
    pub info: IncomingRequest,
    pub transaction: sip_core::transaction::ServerTsx,
}

impl InfoReceived<'_> {
    pub async fn respond(self, code: Code) -> Result<()> {
        let response = self.session.dialog.create_response(&self.info, code, None)?;

        self.transaction.respond(response).await
    }
}

pub struct ReferReceived<'s> {
    pub session: &'s mut Session,
    pub refer: IncomingRequest,
    pub transaction: sip_core::transaction::ServerTsx,
}

impl ReferReceived<'_> {
    pub fn refer_to(&self) -> Result<ReferTo> {
        Ok(self.refer.headers.get_named()?)
    }

    /// Accept the transfer with 202; the caller must send the progress
    /// NOTIFYs afterwards
    pub async fn accept(self) -> Result<()> {
        let response = self
            .session
            .dialog
            .create_response(&self.refer, Code::ACCEPTED, None)?;

        self.transaction.respond(response).await
    }

    pub async fn reject(self) -> Result<()> {
        self.respond_failure(Code::DECLINE).await
    }

    pub async fn respond_failure(self, code: Code) -> Result<()> {
        let response = self.session.dialog.create_response(&self.refer, code, None)?;

        self.transaction.respond(response).await
    }
}

pub struct NotifyReceived<'s> {
    pub session: &'s mut Session,
    pub notify: IncomingRequest,
    pub transaction: sip_core::transaction::ServerTsx,
}

impl NotifyReceived<'_> {
    pub async fn respond(self, code: Code) -> Result<()> {
        let response = self
            .session
            .dialog
            .create_response(&self.notify, code, None)?;

        self.transaction.respond(response).await
    }
}

pub struct ByeEvent<'s> {
    pub session: &'s mut Session,
    pub bye: IncomingRequest,
    pub transaction: sip_core::transaction::ServerTsx,
}

impl ByeEvent<'_> {
    /// Acknowledge the BYE with a 200
    pub async fn process_default(self) -> Result<()> {
        let response = self.session.dialog.create_response(&self.bye, Code::OK, None)?;

        self.transaction.respond(response).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reattempt_delay_ranges() {
        for _ in 0..50 {
            let uac = reattempt_delay(Role::Uac);
            assert!(uac >= Duration::from_secs_f64(2.1) && uac < Duration::from_secs(4));

            let uas = reattempt_delay(Role::Uas);
            assert!(uas < Duration::from_secs(2));
        }
    }
}
