//! Incoming call handling

use crate::call::Call;
use crate::events::EndReason;
use crate::media::MediaBackend;
use crate::outbound::CONTENT_TYPE_SDP;
use crate::ua::UserAgent;
use bytesstr::BytesStr;
use sip_types::header::typed::FromTo;
use sip_types::Code;
use sip_ua::cause::Cause;
use sip_ua::invite::acceptor::Acceptor;
use sip_ua::invite::AckOutcome;
use std::time::Duration;
use tokio::time::Instant;

/// Errors of answering or refusing an incoming call
#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error(transparent)]
    Core(#[from] sip_core::Error),
    #[error("media backend failed: {0}")]
    Media(Box<dyn std::error::Error + Send + Sync>),
    /// The call ended while or before being answered
    #[error("call ended: {0:?}")]
    Ended(EndReason),
}

/// Why the ringing phase ended without an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingOutcome {
    /// The caller gave up; 487 went out already
    Canceled,
    /// `no_answer_timeout` elapsed; 408 went out already
    NoAnswer,
}

/// An unanswered incoming call.
///
/// A 180 Ringing was sent on creation. The owner answers, rejects or
/// watches it until the caller cancels or the no-answer timeout fires.
pub struct IncomingCall {
    ua: Option<UserAgent>,
    acceptor: Acceptor,

    /// Caller identity from the INVITE's From header
    pub remote: FromTo,

    /// SDP offer of the INVITE; `None` means the offer will arrive in
    /// the ACK (late offer)
    pub sdp_offer: Option<BytesStr>,

    deadline: Instant,
}

impl IncomingCall {
    pub(crate) async fn new(
        mut acceptor: Acceptor,
        no_answer_timeout: Duration,
    ) -> Result<Self, sip_core::Error> {
        let remote = acceptor.peer_identity().clone();

        let sdp_offer = acceptor
            .invite_body()
            .filter(|body| !body.is_empty())
            .and_then(|body| BytesStr::from_utf8_bytes(body).ok());

        let ringing = acceptor.create_response(Code::RINGING, None).await?;
        acceptor.respond_provisional(ringing).await?;

        Ok(Self {
            ua: None,
            acceptor,
            remote,
            sdp_offer,
            deadline: Instant::now() + no_answer_timeout,
        })
    }

    pub(crate) fn attach_ua(&mut self, ua: UserAgent) {
        self.ua = Some(ua);
    }

    /// The INVITE came without a body, the answer goes into the 200 and
    /// the peer's SDP arrives in the ACK
    pub fn is_late_offer(&self) -> bool {
        self.sdp_offer.is_none()
    }

    /// Wait for the caller to cancel or the ring timeout to fire.
    ///
    /// Cancel-safe; answer or reject may still be called when neither
    /// happened yet.
    pub async fn watch(&mut self) -> RingOutcome {
        tokio::select! {
            _ = self.acceptor.cancelled() => RingOutcome::Canceled,
            _ = tokio::time::sleep_until(self.deadline) => {
                // ring timeout: the caller gets a 408
                if let Ok(response) = self
                    .acceptor
                    .create_response(Code::REQUEST_TIMEOUT, None)
                    .await
                {
                    if let Err(e) = self.acceptor.respond_failure_ref(response).await {
                        log::debug!("failed to answer 408 on ring timeout, {:?}", e);
                    }
                }

                RingOutcome::NoAnswer
            }
        }
    }

    /// Answer the call.
    ///
    /// With an offer at hand the media backend produces the answer for
    /// the 200; in late-offer mode the 200 carries a fresh offer and
    /// the SDP answer is required in the ACK; an ACK without one ends
    /// the call with a BYE.
    pub async fn answer<M: MediaBackend>(self, mut media: M) -> Result<Call<M>, AnswerError> {
        let ua = self
            .ua
            .clone()
            .expect("incoming call is always attached to its agent");

        let late_offer = self.is_late_offer();

        let sdp = match &self.sdp_offer {
            Some(offer) => media
                .create_answer(offer.clone())
                .await
                .map_err(|e| AnswerError::Media(Box::new(e)))?,
            None => media
                .create_offer()
                .await
                .map_err(|e| AnswerError::Media(Box::new(e)))?,
        };

        let mut response = self.acceptor.create_response(Code::OK, None).await?;

        response.msg.headers.insert_named(&CONTENT_TYPE_SDP);
        response.msg.body = bytes::Bytes::from(sdp.to_string());

        let (mut session, outcome) = self.acceptor.respond_success(response).await?;

        match outcome {
            AckOutcome::Ack(ack) => {
                if late_offer {
                    let answer = (!ack.body.is_empty())
                        .then(|| BytesStr::from_utf8_bytes(ack.body.clone()).ok())
                        .flatten();

                    let Some(answer) = answer else {
                        // late offer demands the answer in the ACK
                        let _ = session.terminate().await;

                        return Err(AnswerError::Ended(EndReason::local(Cause::MissingSdp)));
                    };

                    media
                        .set_remote_answer(answer)
                        .await
                        .map_err(|e| AnswerError::Media(Box::new(e)))?;
                }
            }
            AckOutcome::TimedOut => {
                // no ACK within Timer H, tear the session down
                let _ = session.terminate().await;

                return Err(AnswerError::Ended(EndReason::system(Cause::NoAck)));
            }
        }

        Ok(Call::new(ua, session, media))
    }

    /// Refuse the call, default status 480 Temporarily Unavailable
    pub async fn reject(self, code: Option<Code>) -> Result<(), sip_core::Error> {
        let code = code.unwrap_or(Code::TEMPORARILY_UNAVAILABLE);

        let response = self.acceptor.create_response(code, None).await?;

        self.acceptor.respond_failure(response).await
    }
}
