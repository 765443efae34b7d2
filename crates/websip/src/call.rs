//! An established call

use crate::events::EndReason;
use crate::media::{mangle_hold_directions, HoldState, MediaBackend, MediaEvent};
use crate::outbound::CONTENT_TYPE_SDP;
use crate::ua::UserAgent;
use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::header::typed::{ContentType, ReferTo, Replaces};
use sip_types::msg::StatusLine;
use sip_types::{Code, CodeKind};
use sip_ua::cause::Cause;
use sip_ua::invite::dtmf::{DtmfOptions, DtmfQueue, Tone, CONTENT_TYPE_DTMF};
use sip_ua::invite::session::{
    ReInviteReceived, RenegotiateOutcome, Session, SessionEvent,
};
use sip_ua::invite::AckOutcome;
use sip_ua::refer::{ReferNotifier, ReferProgress};
use tokio::time::Instant;

/// Errors of operations on an established call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Core(#[from] sip_core::Error),
    #[error("media backend failed: {0}")]
    Media(Box<dyn std::error::Error + Send + Sync>),
    #[error("media backend is busy, renegotiation is not possible")]
    MediaNotReady,
    #[error("invalid DTMF tones: {0}")]
    InvalidDtmf(#[from] sip_ua::invite::dtmf::InvalidTone),
    #[error("no transfer in progress")]
    NoTransfer,
    #[error("target is not a valid SIP uri")]
    InvalidTarget,
}

/// Event reported while the call runs
#[derive(Debug)]
pub enum CallEvent {
    /// The call is over; tear down media and drop the call
    Ended(EndReason),
    /// The peer put the call on hold or took it back
    RemoteHold { on: bool },
    /// A DTMF tone arrived over INFO
    DtmfReceived(Tone),
    /// A non-DTMF INFO arrived
    InfoReceived {
        content_type: Option<ContentType>,
        body: Bytes,
    },
    /// The peer asks this side to call another target (REFER).
    ///
    /// Accepting means placing a call to the target and relaying its
    /// progress with [`Call::notify_transfer_progress`].
    TransferRequested { refer_to: ReferTo },
    /// Progress NOTIFY for a transfer this side requested
    TransferProgress(StatusLine),
    /// An INVITE with Replaces wants to supersede this call
    ReplaceRequested { replaces: Replaces },
    /// The media engine reported a failure
    Media(MediaEvent),
}

/// A confirmed INVITE session together with its media engine.
///
/// [`Call::run`] must be polled continuously; every mutating operation
/// (`hold`, `send_dtmf`, `refer`, `terminate`) is a method on the call.
pub struct Call<M: MediaBackend> {
    ua: UserAgent,
    session: Session,
    media: M,

    hold: HoldState,
    audio_muted: bool,
    video_muted: bool,

    dtmf: DtmfQueue,
    dtmf_ready_at: Option<Instant>,

    transfer_notifier: Option<ReferNotifier>,
}

impl<M: MediaBackend> Call<M> {
    pub(crate) fn new(ua: UserAgent, session: Session, media: M) -> Self {
        Self {
            ua,
            session,
            media,
            hold: HoldState::default(),
            audio_muted: false,
            video_muted: false,
            dtmf: DtmfQueue::new(),
            dtmf_ready_at: None,
            transfer_notifier: None,
        }
    }

    pub fn media(&mut self) -> &mut M {
        &mut self.media
    }

    pub fn is_on_hold(&self) -> HoldState {
        self.hold
    }

    pub fn is_audio_muted(&self) -> bool {
        self.audio_muted
    }

    pub fn is_video_muted(&self) -> bool {
        self.video_muted
    }

    /// Mute flags only gate the local tracks, nothing is signalled
    pub fn set_audio_muted(&mut self, muted: bool) {
        self.audio_muted = muted;
    }

    pub fn set_video_muted(&mut self, muted: bool) {
        self.video_muted = muted;
    }

    /// Drive the call and return the next event
    pub async fn run(&mut self) -> Result<CallEvent, CallError> {
        loop {
            self.flush_dtmf().await?;

            let dtmf_wakeup = self.dtmf_ready_at;

            let event = tokio::select! {
                event = self.session.drive() => Some(event?),
                event = self.media.run() => {
                    let event = event.map_err(|e| CallError::Media(Box::new(e)))?;

                    return Ok(CallEvent::Media(event));
                }
                _ = wait_until(dtmf_wakeup), if dtmf_wakeup.is_some() => None,
            };

            let Some(event) = event else {
                // dtmf pacing fired, loop around to flush the queue
                continue;
            };

            match event {
                SessionEvent::RefreshNeeded(refresh) => {
                    refresh.process_default().await?;
                }
                SessionEvent::ReInviteReceived(event) => {
                    if let Some(call_event) =
                        handle_reinvite(event, &mut self.media, &mut self.hold).await?
                    {
                        return Ok(call_event);
                    }
                }
                SessionEvent::UpdateReceived(event) => {
                    // session refresh; an offer would arrive in a
                    // re-INVITE instead
                    event.respond_success(None).await?;
                }
                SessionEvent::InfoReceived(event) => {
                    let content_type = event.info.headers.get_named::<ContentType>().ok();

                    let is_dtmf = content_type
                        .as_ref()
                        .map(|ct| *ct == CONTENT_TYPE_DTMF)
                        .unwrap_or(false);

                    let body = event.info.body.clone();

                    event.respond(Code::OK).await?;

                    if is_dtmf {
                        if let Some(tone) = sip_ua::invite::dtmf::parse_dtmf_body(&body) {
                            return Ok(CallEvent::DtmfReceived(tone));
                        }

                        log::debug!("discarding malformed dtmf-relay body");
                        continue;
                    }

                    return Ok(CallEvent::InfoReceived { content_type, body });
                }
                SessionEvent::ReferReceived(event) => {
                    let refer_to = match event.refer_to() {
                        Ok(refer_to) => refer_to,
                        Err(e) => {
                            log::debug!("REFER without usable target, {}", e);
                            event.respond_failure(Code::BAD_REQUEST).await?;
                            continue;
                        }
                    };

                    let notifier = ReferNotifier::new(&event.refer);

                    event.accept().await?;

                    // the implicit subscription starts with 100 Trying
                    notifier
                        .notify(&mut self.session.dialog, Code::TRYING, false)
                        .await?;

                    self.transfer_notifier = Some(notifier);

                    return Ok(CallEvent::TransferRequested { refer_to });
                }
                SessionEvent::NotifyReceived(event) => {
                    match ReferProgress::from_notify(&event.notify) {
                        Ok(progress) => {
                            event.respond(Code::OK).await?;

                            return Ok(CallEvent::TransferProgress(progress.status_line));
                        }
                        Err(_) => {
                            event.respond(Code::OK).await?;
                        }
                    }
                }
                SessionEvent::Bye(event) => {
                    event.process_default().await?;

                    self.dtmf.clear();
                    self.media.close().await;

                    return Ok(CallEvent::Ended(EndReason::remote_cause(Cause::Bye)));
                }
                SessionEvent::Expired(event) => {
                    event.process_default().await?;

                    self.dtmf.clear();
                    self.media.close().await;

                    return Ok(CallEvent::Ended(EndReason::system(Cause::RequestTimeout)));
                }
                SessionEvent::Terminated => {
                    self.dtmf.clear();
                    self.media.close().await;

                    return Ok(CallEvent::Ended(EndReason::remote_cause(Cause::Bye)));
                }
            }
        }
    }

    /// Put the call on hold or take it back.
    ///
    /// Sends a re-INVITE whose offer has its direction attributes
    /// rewritten accordingly.
    pub async fn hold(&mut self, on: bool) -> Result<(), CallError> {
        if self.hold.local == on {
            return Ok(());
        }

        if !self.media.ready() {
            return Err(CallError::MediaNotReady);
        }

        let previous = self.hold;
        self.hold.local = on;

        let offer = self
            .media
            .create_offer()
            .await
            .map_err(|e| CallError::Media(Box::new(e)))?;

        let offer = mangle_hold_directions(&offer, self.hold);

        let outcome = self
            .session
            .send_reinvite(Some((CONTENT_TYPE_SDP, Bytes::from(offer))))
            .await;

        match outcome {
            Ok(RenegotiateOutcome::Accepted(response)) => {
                if !response.body.is_empty() {
                    if let Ok(answer) = BytesStr::from_utf8_bytes(response.body.clone()) {
                        self.media
                            .set_remote_answer(answer)
                            .await
                            .map_err(|e| CallError::Media(Box::new(e)))?;
                    }
                }

                Ok(())
            }
            Ok(RenegotiateOutcome::Rejected(response)) => {
                self.hold = previous;

                log::warn!("hold re-INVITE rejected with {}", response.line.code);
                Ok(())
            }
            Ok(RenegotiateOutcome::DialogTerminated(_)) | Err(_) => {
                self.hold = previous;

                Err(CallError::Core(sip_core::Error::new(
                    Code::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
                )))
            }
        }
    }

    /// Queue DTMF tones for sending over INFO
    pub fn send_dtmf(&mut self, tones: &str, options: DtmfOptions) -> Result<(), CallError> {
        self.dtmf.enqueue(tones, options)?;
        Ok(())
    }

    async fn flush_dtmf(&mut self) -> Result<(), CallError> {
        let due = match self.dtmf_ready_at {
            Some(ready_at) => Instant::now() >= ready_at,
            None => true,
        };

        if !due || self.dtmf.is_empty() {
            if self.dtmf.is_empty() && due {
                self.dtmf_ready_at = None;
            }

            return Ok(());
        }

        let Some((tone, hold_off)) = self.dtmf.next_tone() else {
            self.dtmf_ready_at = None;
            return Ok(());
        };

        let mut request = self.session.dialog.create_request(sip_types::Method::Info);

        request.headers.insert_named(&CONTENT_TYPE_DTMF);
        request.body = tone.body();

        let mut transaction = self.session.endpoint.send_request(request).await?;

        // the final response only matters for logging
        tokio::spawn(async move {
            match transaction.receive_final().await {
                Ok(response) if response.line.code.kind() != CodeKind::Success => {
                    log::debug!("DTMF INFO rejected with {}", response.line.code);
                }
                Ok(_) => {}
                Err(e) => log::debug!("DTMF INFO failed, {}", e),
            }
        });

        self.dtmf_ready_at = Some(Instant::now() + hold_off);

        Ok(())
    }

    /// Ask the peer to call `target` instead (blind transfer).
    ///
    /// Progress arrives as [`CallEvent::TransferProgress`].
    pub async fn refer(&mut self, target: &str) -> Result<(), CallError> {
        let target = sip_ua::refer::normalize_target(target, self.ua.domain())
            .ok_or(CallError::InvalidTarget)?;

        let refer_to = ReferTo::new(sip_types::uri::NameAddr::uri(target));

        let request = self.session.create_refer(refer_to);

        let mut transaction = self.session.endpoint.send_request(request).await?;
        let response = transaction.receive_final().await?;

        if response.line.code.kind() != CodeKind::Success {
            return Err(CallError::Core(sip_core::Error::new(response.line.code)));
        }

        Ok(())
    }

    /// Relay progress of an accepted incoming transfer as a sipfrag
    /// NOTIFY; `terminal` closes the implicit subscription
    pub async fn notify_transfer_progress(
        &mut self,
        code: Code,
        terminal: bool,
    ) -> Result<(), CallError> {
        let notifier = self.transfer_notifier.as_ref().ok_or(CallError::NoTransfer)?;

        notifier
            .notify(&mut self.session.dialog, code, terminal)
            .await?;

        if terminal {
            self.transfer_notifier = None;
        }

        Ok(())
    }

    /// End the call with a BYE and close the media engine
    pub async fn terminate(mut self) -> Result<(), CallError> {
        self.dtmf.clear();

        let result = self.session.terminate().await;

        self.media.close().await;

        result.map_err(CallError::Core)
    }
}

async fn handle_reinvite<M: MediaBackend>(
    event: ReInviteReceived<'_>,
    media: &mut M,
    hold: &mut HoldState,
) -> Result<Option<CallEvent>, CallError> {
    // an INVITE with Replaces wants to supersede this call; the owner
    // decides what happens with it
    if let Ok(replaces) = event.invite.headers.get_named::<Replaces>() {
        event.respond_failure(Code::NOT_ACCEPTABLE_HERE).await?;

        return Ok(Some(CallEvent::ReplaceRequested { replaces }));
    }

    let offer = (!event.invite.body.is_empty())
        .then(|| BytesStr::from_utf8_bytes(event.invite.body.clone()).ok())
        .flatten();

    match offer {
        Some(offer) => {
            let remote_hold = sdp_requests_hold(&offer);

            let answer = match media.create_answer(offer).await {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("media refused the re-INVITE offer, {}", e);
                    event.respond_failure(Code::NOT_ACCEPTABLE_HERE).await?;
                    return Ok(None);
                }
            };

            let mut response = event
                .session
                .dialog
                .create_response(&event.invite, Code::OK, None)?;

            response.msg.headers.insert_named(&CONTENT_TYPE_SDP);
            response.msg.body = Bytes::from(answer.to_string());

            let _ = event.respond_success(response).await?;

            if remote_hold != hold.remote {
                hold.remote = remote_hold;

                return Ok(Some(CallEvent::RemoteHold { on: remote_hold }));
            }

            Ok(None)
        }
        None => {
            // late offer: our offer goes into the 200, the answer must
            // come back in the ACK
            let offer = media
                .create_offer()
                .await
                .map_err(|e| CallError::Media(Box::new(e)))?;

            let offer = mangle_hold_directions(&offer, *hold);

            let mut response = event
                .session
                .dialog
                .create_response(&event.invite, Code::OK, None)?;

            response.msg.headers.insert_named(&CONTENT_TYPE_SDP);
            response.msg.body = Bytes::from(offer);

            let outcome = event.respond_success(response).await?;

            if let AckOutcome::Ack(ack) = outcome {
                let answer = (!ack.body.is_empty())
                    .then(|| BytesStr::from_utf8_bytes(ack.body.clone()).ok())
                    .flatten();

                match answer {
                    Some(answer) => {
                        media
                            .set_remote_answer(answer)
                            .await
                            .map_err(|e| CallError::Media(Box::new(e)))?;
                    }
                    None => log::warn!("re-INVITE ACK carried no SDP answer, keeping old media"),
                }
            }

            Ok(None)
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Does the offer ask us to stop sending, i.e. put us on hold
fn sdp_requests_hold(sdp: &str) -> bool {
    let mut saw_direction = false;

    for line in sdp.lines() {
        let line = line.trim_end();

        match line {
            "a=sendonly" | "a=inactive" => saw_direction = true,
            "a=sendrecv" | "a=recvonly" => return false,
            _ => {}
        }
    }

    saw_direction
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hold_detection() {
        assert!(sdp_requests_hold("v=0\r\nm=audio 9 RTP 0\r\na=sendonly\r\n"));
        assert!(sdp_requests_hold("v=0\r\nm=audio 9 RTP 0\r\na=inactive\r\n"));
        assert!(!sdp_requests_hold("v=0\r\nm=audio 9 RTP 0\r\na=sendrecv\r\n"));

        // mixed directions are not a hold
        assert!(!sdp_requests_hold(
            "v=0\r\na=sendonly\r\nm=video 9 RTP 0\r\na=sendrecv\r\n"
        ));

        // no direction attribute defaults to sendrecv
        assert!(!sdp_requests_hold("v=0\r\nm=audio 9 RTP 0\r\n"));
    }
}
