//! Outgoing call setup

use crate::call::Call;
use crate::events::EndReason;
use crate::media::MediaBackend;
use crate::ua::{UaError, UserAgent};
use bytesstr::BytesStr;
use sip_auth::UacAuthSession;
use sip_core::transaction::TsxResponse;
use sip_types::header::typed::{Contact, ContentType};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::Code;
use sip_ua::cause::Cause;
use sip_ua::invite::initiator::{Initiator, Response};
use sip_ua::invite::{create_ack, session::Session};

pub(crate) const CONTENT_TYPE_SDP: ContentType =
    ContentType(BytesStr::from_static("application/sdp"));

/// Errors encountered while creating an outgoing call
#[derive(Debug, thiserror::Error)]
pub enum MakeCallError {
    #[error(transparent)]
    Ua(UaError),
    #[error(transparent)]
    Core(#[from] sip_core::Error),
    #[error("media backend failed: {0}")]
    Media(Box<dyn std::error::Error + Send + Sync>),
}

/// Progress of an outgoing call
pub enum OutboundEvent<M: MediaBackend> {
    /// A provisional response above 100 arrived
    Progress { code: Code },
    /// The call was answered and acknowledged
    Confirmed(Call<M>),
    /// The call did not come to pass
    Failed(EndReason),
}

/// An outgoing call between INVITE and the final response.
///
/// [`OutboundCall::terminate`] may be called at any point: before the
/// first provisional response the cancel reason is buffered and the
/// CANCEL goes out when a provisional arrives; a 2xx racing the cancel
/// is acknowledged and immediately released with a BYE.
pub struct OutboundCall<M: MediaBackend> {
    ua: UserAgent,
    initiator: Option<Initiator>,
    media: Option<M>,

    auth: UacAuthSession,
    authorized_once: bool,

    sent_offer: bool,
    early_media_applied: bool,
}

impl<M: MediaBackend> OutboundCall<M> {
    pub(crate) async fn make(
        ua: UserAgent,
        local_addr: NameAddr,
        contact: Contact,
        target: SipUri,
        mut media: M,
    ) -> Result<Self, MakeCallError> {
        let mut initiator = Initiator::new(
            ua.endpoint().clone(),
            ua.dialog_layer(),
            ua.invite_layer(),
            local_addr,
            contact,
            target,
        );

        initiator.timer_config = ua.session_timer_config();

        let offer = media
            .create_offer()
            .await
            .map_err(|e| MakeCallError::Media(Box::new(e)))?;

        let mut invite = initiator.create_invite();

        ua.apply_preloaded_routes(&mut invite.headers);

        invite.headers.insert_named(&CONTENT_TYPE_SDP);
        invite.body = bytes::Bytes::from(offer.to_string());

        initiator.send_invite(invite).await?;

        Ok(Self {
            ua,
            initiator: Some(initiator),
            media: Some(media),
            auth: UacAuthSession::default(),
            authorized_once: false,
            sent_offer: true,
            early_media_applied: false,
        })
    }

    /// Abandon the call.
    ///
    /// Maps to a buffered or immediate CANCEL depending on whether a
    /// provisional response was seen.
    pub async fn terminate(&mut self) -> Result<(), sip_core::Error> {
        self.initiator_mut().cancel().await
    }

    fn initiator_mut(&mut self) -> &mut Initiator {
        self.initiator
            .as_mut()
            .expect("outbound call is not driven after its final event")
    }

    /// Drive the call until it is confirmed or failed.
    ///
    /// Must be called repeatedly; provisional progress is surfaced
    /// between the calls.
    pub async fn next_event(&mut self) -> OutboundEvent<M> {
        loop {
            let received = match self.initiator_mut().receive().await {
                Ok(received) => received,
                Err(e) if e.is_timeout() => {
                    return OutboundEvent::Failed(EndReason::system(Cause::RequestTimeout));
                }
                Err(_) => {
                    return OutboundEvent::Failed(EndReason::system(Cause::ConnectionError));
                }
            };

            match received {
                Response::Provisional(response) => {
                    let code = response.line.code;

                    // 100 Trying is signalling noise, not user progress
                    if code.into_u16() > 100 {
                        self.apply_early_media(&response).await;

                        return OutboundEvent::Progress { code };
                    }
                }
                Response::Early(_early, response) => {
                    self.apply_early_media(&response).await;

                    return OutboundEvent::Progress {
                        code: response.line.code,
                    };
                }
                Response::Retransmission(response) => {
                    log::debug!(
                        "2xx retransmission for confirmed dialog, tag {:?}",
                        response.base_headers.to.tag
                    );
                }
                Response::Failure(response) => {
                    if let Some(event) = self.handle_failure(response).await {
                        return event;
                    }
                }
                Response::Session(session, response) => {
                    return self.handle_success(session, response).await;
                }
                Response::Finished => {
                    return OutboundEvent::Failed(EndReason::system(Cause::RequestTimeout));
                }
            }
        }
    }

    async fn apply_early_media(&mut self, response: &TsxResponse) {
        if self.early_media_applied || response.body.is_empty() || !self.sent_offer {
            return;
        }

        let Some(media) = &mut self.media else {
            return;
        };

        let Ok(sdp) = BytesStr::from_utf8_bytes(response.body.clone()) else {
            return;
        };

        // early media: the session stays unconfirmed
        if let Err(e) = media.set_remote_answer(sdp).await {
            log::warn!("failed to apply early media answer, {}", e);
            return;
        }

        self.early_media_applied = true;
    }

    /// Retry once on a digest challenge, otherwise map to a failure
    async fn handle_failure(&mut self, response: TsxResponse) -> Option<OutboundEvent<M>> {
        let code = response.line.code;

        let challenged = matches!(
            code,
            Code::UNAUTHORIZED | Code::PROXY_AUTHENTICATION_REQUIRED
        );

        if challenged && !self.authorized_once {
            let initiator = self
                .initiator
                .as_ref()
                .expect("outbound call is not driven after its final event");
            let transaction = initiator
                .transaction()
                .expect("a failure response implies a transaction");
            let request = transaction.request();

            let handled = self.auth.handle_authenticate(
                &response.headers,
                self.ua.credentials(),
                sip_auth::RequestParts {
                    line: &request.msg.line,
                    headers: &request.msg.headers,
                    body: &request.msg.body,
                },
            );

            if handled.is_ok() {
                self.authorized_once = true;

                let mut invite = self.initiator_mut().create_invite();

                self.ua.apply_preloaded_routes(&mut invite.headers);

                if let Some(media) = &mut self.media {
                    match media.create_offer().await {
                        Ok(offer) => {
                            invite.headers.insert_named(&CONTENT_TYPE_SDP);
                            invite.body = bytes::Bytes::from(offer.to_string());
                        }
                        Err(e) => {
                            log::warn!("media refused a new offer, {}", e);
                            return Some(OutboundEvent::Failed(EndReason::system(
                                Cause::InternalError,
                            )));
                        }
                    }
                }

                self.auth.authorize_request(&mut invite.headers);

                if let Err(e) = self.initiator_mut().send_invite(invite).await {
                    log::warn!("failed to retry INVITE with credentials, {}", e);
                    return Some(OutboundEvent::Failed(EndReason::system(
                        Cause::ConnectionError,
                    )));
                }

                return None;
            }
        }

        let canceled = self
            .initiator
            .as_ref()
            .map(|initiator| initiator.canceled())
            .unwrap_or(false);

        let reason = if canceled && code == Code::REQUEST_TERMINATED {
            EndReason::local(Cause::Canceled)
        } else {
            EndReason::remote(code)
        };

        Some(OutboundEvent::Failed(reason))
    }

    async fn handle_success(
        &mut self,
        mut session: Session,
        response: TsxResponse,
    ) -> OutboundEvent<M> {
        let canceled = self
            .initiator
            .as_ref()
            .map(|initiator| initiator.canceled())
            .unwrap_or(false);

        // a 2xx that raced the user's cancel is acknowledged and
        // immediately released
        if canceled {
            let _ = self.send_ack(&mut session, &response).await;
            let _ = session.terminate().await;

            return OutboundEvent::Failed(EndReason::local(Cause::Canceled));
        }

        if response.body.is_empty() {
            // no answer means no session; acknowledge, then release
            let _ = self.send_ack(&mut session, &response).await;
            let _ = session.terminate().await;

            return OutboundEvent::Failed(EndReason::system(Cause::BadMediaDescription));
        }

        let mut media = self.media.take().expect("media is present until confirmed");

        if !self.early_media_applied {
            let Ok(sdp) = BytesStr::from_utf8_bytes(response.body.clone()) else {
                let _ = self.send_ack(&mut session, &response).await;
                let _ = session.terminate().await;

                return OutboundEvent::Failed(EndReason::system(Cause::BadMediaDescription));
            };

            if let Err(e) = media.set_remote_answer(sdp).await {
                log::warn!("media rejected the answer, {}", e);

                let _ = self.send_ack(&mut session, &response).await;
                let _ = session.terminate().await;

                return OutboundEvent::Failed(EndReason::system(Cause::BadMediaDescription));
            }
        }

        let ack = match self.send_ack(&mut session, &response).await {
            Ok(ack) => ack,
            Err(e) => {
                log::warn!("failed to acknowledge the 2xx, {}", e);

                return OutboundEvent::Failed(EndReason::system(Cause::ConnectionError));
            }
        };

        // the INVITE transaction accepts 2xx retransmissions and forks
        // for a while longer; repeat the ACK for the former, release
        // the latter
        let initiator = self.initiator.take().expect("confirmed only once");
        tokio::spawn(absorb_late_responses(
            initiator,
            ack,
            self.ua.endpoint().clone(),
        ));

        OutboundEvent::Confirmed(Call::new(self.ua.clone(), session, media))
    }

    async fn send_ack(
        &mut self,
        session: &mut Session,
        response: &TsxResponse,
    ) -> Result<sip_core::OutgoingRequest, sip_core::Error> {
        let mut ack = create_ack(&mut session.dialog, response.base_headers.cseq.cseq).await?;

        session.endpoint.send_outgoing_request(&mut ack).await?;

        Ok(ack)
    }
}

async fn absorb_late_responses(
    mut initiator: Initiator,
    mut ack: sip_core::OutgoingRequest,
    endpoint: sip_core::Endpoint,
) {
    loop {
        match initiator.receive().await {
            Ok(Response::Retransmission(_)) => {
                if let Err(e) = endpoint.send_outgoing_request(&mut ack).await {
                    log::debug!("failed to repeat ACK, {}", e);
                }
            }
            Ok(Response::Session(mut fork, response)) => {
                // a forked 2xx: acknowledge it, then release it
                if let Ok(mut fork_ack) =
                    create_ack(&mut fork.dialog, response.base_headers.cseq.cseq).await
                {
                    let _ = endpoint.send_outgoing_request(&mut fork_ack).await;
                }

                if let Err(e) = fork.terminate().await {
                    log::debug!("failed to release forked dialog, {}", e);
                }
            }
            Ok(Response::Finished) | Err(_) => break,
            Ok(_) => {}
        }
    }
}
