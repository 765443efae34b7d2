use super::session::{Role, Session};
use super::timer::SessionTimerConfig;
use super::{Inner, InviteLayer, InviteSessionState, InviteUsage};
use crate::dialog::{ClientDialogBuilder, Dialog, DialogLayer};
use bytesstr::BytesStr;
use parking_lot as pl;
use sip_core::transaction::{ClientInvTsx, TsxResponse};
use sip_core::{Endpoint, Error, LayerKey, Request, Result};
use sip_types::header::typed::{Contact, Supported};
use sip_types::header::HeaderError;
use sip_types::uri::{NameAddr, SipUri};
use sip_types::Name;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Response surfaced while driving an outgoing INVITE
#[derive(Debug)]
pub enum Response {
    /// 100, or a 1xx without a To-tag or Contact
    Provisional(TsxResponse),
    /// Final failure
    Failure(TsxResponse),
    /// 1xx with a To-tag created an early dialog
    Early(Early, TsxResponse),
    /// 2xx created a session
    Session(Session, TsxResponse),
    /// Retransmitted 2xx of an already confirmed dialog; the ACK must
    /// be repeated, nothing else
    Retransmission(TsxResponse),
    /// The transaction terminated
    Finished,
}

/// Drives an outgoing INVITE until a session exists.
///
/// Cancels issued before any provisional response are buffered and put
/// on the wire once the first provisional arrives.
pub struct Initiator {
    dialog_builder: ClientDialogBuilder,

    transaction: Option<ClientInvTsx>,

    /// Early dialogs by To-tag; responses matching one are forwarded
    early_list: Vec<(BytesStr, mpsc::Sender<EarlyEvent>)>,

    /// To-tags of dialogs confirmed by a 2xx
    confirmed_list: Vec<BytesStr>,

    /// `cancel()` was called before the first provisional arrived
    pending_cancel: bool,

    /// A CANCEL for the INVITE is on the wire
    canceled: bool,

    got_provisional: bool,

    pub timer_config: SessionTimerConfig,

    invite_layer: LayerKey<InviteLayer>,
}

impl Initiator {
    pub fn new(
        endpoint: Endpoint,
        dialog_layer: LayerKey<DialogLayer>,
        invite_layer: LayerKey<InviteLayer>,
        local_addr: NameAddr,
        local_contact: Contact,
        target: SipUri,
    ) -> Self {
        let dialog_builder =
            ClientDialogBuilder::new(endpoint, dialog_layer, local_addr, local_contact, target);

        Self {
            dialog_builder,
            transaction: None,
            early_list: vec![],
            confirmed_list: vec![],
            pending_cancel: false,
            canceled: false,
            got_provisional: false,
            timer_config: SessionTimerConfig::default(),
            invite_layer,
        }
    }

    pub fn create_invite(&mut self) -> Request {
        let mut request = self.dialog_builder.create_invite();

        if self.timer_config.enabled {
            request.headers.insert_named(&Supported::new("timer"));
            self.timer_config.populate_request(&mut request);
        }

        request
    }

    pub async fn send_invite(&mut self, request: Request) -> Result<(), Error> {
        let transaction = self
            .dialog_builder
            .endpoint
            .send_invite(request)
            .await?;

        self.transaction = Some(transaction);

        Ok(())
    }

    /// Whether `cancel()` was called
    pub fn canceled(&self) -> bool {
        self.canceled || self.pending_cancel
    }

    pub fn call_id(&self) -> &BytesStr {
        &self.dialog_builder.call_id.0
    }

    pub fn from_tag(&self) -> Option<&BytesStr> {
        self.dialog_builder.local_fromto.tag.as_ref()
    }

    /// Cancel the pending INVITE.
    ///
    /// Before any provisional response the cancel is only recorded; the
    /// CANCEL request goes out when the first provisional arrives.
    pub async fn cancel(&mut self) -> Result<(), Error> {
        if self.canceled || self.pending_cancel {
            return Ok(());
        }

        if self.got_provisional {
            self.send_cancel_now().await
        } else {
            self.pending_cancel = true;
            Ok(())
        }
    }

    async fn send_cancel_now(&mut self) -> Result<(), Error> {
        let request = self.dialog_builder.create_cancel();

        let transaction = self
            .transaction
            .as_ref()
            .expect("cancel is only reachable after send_invite");

        transaction.cancel(request).await?;

        self.pending_cancel = false;
        self.canceled = true;

        Ok(())
    }

    pub fn transaction(&self) -> Option<&ClientInvTsx> {
        self.transaction.as_ref()
    }

    pub async fn receive(&mut self) -> Result<Response, Error> {
        loop {
            let transaction = self
                .transaction
                .as_mut()
                .expect("receive is only valid after send_invite");

            let Some(response) = transaction.receive().await? else {
                return Ok(Response::Finished);
            };

            let code = response.line.code.into_u16();

            // the first provisional (100 included) flushes a buffered
            // cancel onto the wire
            if code < 200 && !self.got_provisional {
                self.got_provisional = true;

                if self.pending_cancel {
                    self.send_cancel_now().await?;
                }
            }

            if code <= 100 {
                return Ok(Response::Provisional(response));
            }

            if code >= 300 {
                for (_, early) in self.early_list.drain(..) {
                    if early.send(EarlyEvent::Terminate).await.is_err() {
                        log::warn!("early dialog receiver gone before termination");
                    }
                }

                return Ok(Response::Failure(response));
            }

            let Some(to_tag) = response.base_headers.to.tag.as_ref() else {
                log::warn!("ignoring response without To-tag");

                if code >= 200 {
                    continue;
                }

                return Ok(Response::Provisional(response));
            };

            if self.confirmed_list.contains(to_tag) {
                return Ok(Response::Retransmission(response));
            }

            // responses of a known early dialog are forwarded to it;
            // when its handle was dropped the response falls through to
            // the regular handling below so a 2xx still creates the
            // session
            let response = if let Some(idx) =
                self.early_list.iter().position(|(tag, _)| tag == to_tag)
            {
                let (_, tx) = &self.early_list[idx];

                match tx.send(EarlyEvent::Response(response)).await {
                    Ok(()) => continue,
                    Err(mpsc::error::SendError(event)) => {
                        self.early_list.remove(idx);

                        match event {
                            EarlyEvent::Response(response) => response,
                            EarlyEvent::Terminate => unreachable!("only responses are sent here"),
                        }
                    }
                }
            } else {
                response
            };

            match code {
                101..=199 => {
                    if !response.headers.contains(&Name::CONTACT) {
                        return Ok(Response::Provisional(response));
                    }

                    let early = self.create_early_dialog(&response)?;

                    return Ok(Response::Early(early, response));
                }
                200..=299 => {
                    let session = self.create_session(&response)?;

                    return Ok(Response::Session(session, response));
                }
                _ => unreachable!(),
            }
        }
    }

    fn create_early_dialog(&mut self, response: &TsxResponse) -> Result<Early, HeaderError> {
        let dialog = self.dialog_builder.create_dialog_from_response(response)?;

        let to_tag = dialog
            .peer_fromto
            .tag
            .clone()
            .expect("early dialogs always have a peer tag");

        let (tx, response_rx) = mpsc::channel(4);

        self.early_list.push((to_tag, tx));

        Ok(Early {
            endpoint: self.dialog_builder.endpoint.clone(),
            dialog: Some(dialog),
            response_rx,
            timer_config: self.timer_config,
            invite_layer: self.invite_layer,
        })
    }

    fn create_session(&mut self, response: &TsxResponse) -> Result<Session, HeaderError> {
        let dialog = self.dialog_builder.create_dialog_from_response(response)?;

        if let Some(to_tag) = &response.base_headers.to.tag {
            self.confirmed_list.push(to_tag.clone());
        }

        create_uac_session(
            self.dialog_builder.endpoint.clone(),
            self.invite_layer,
            self.timer_config,
            dialog,
            response,
        )
    }
}

fn peer_supports_timer(response: &TsxResponse) -> bool {
    response
        .headers
        .get_all_named::<Supported>()
        .unwrap_or_default()
        .iter()
        .any(|ext| ext.0 == "timer")
}

fn create_uac_session(
    endpoint: Endpoint,
    invite_layer: LayerKey<InviteLayer>,
    timer_config: SessionTimerConfig,
    dialog: Dialog,
    response: &TsxResponse,
) -> Result<Session, HeaderError> {
    let (evt_sink, usage_events) = mpsc::channel(4);

    let inner = Arc::new(Inner {
        invite_layer,
        state: Mutex::new(InviteSessionState::Established { evt_sink }),
        peer_supports_timer: peer_supports_timer(response),
        awaited_ack: pl::Mutex::new(None),
    });

    let usage_guard = dialog
        .register_usage(InviteUsage {
            inner: inner.clone(),
        })
        .expect("dialog was just created");

    let session_timer = timer_config.timer_from_response(response);

    Ok(Session::new(
        endpoint,
        inner,
        Role::Uac,
        usage_events,
        session_timer,
        usage_guard,
        dialog,
    ))
}

#[derive(Debug)]
enum EarlyEvent {
    Response(TsxResponse),
    Terminate,
}

/// An early dialog created by a provisional response
#[derive(Debug)]
pub struct Early {
    endpoint: Endpoint,
    dialog: Option<Dialog>,

    response_rx: mpsc::Receiver<EarlyEvent>,

    timer_config: SessionTimerConfig,

    invite_layer: LayerKey<InviteLayer>,
}

#[derive(Debug)]
pub enum EarlyResponse {
    Provisional(TsxResponse),
    Success(Session, TsxResponse),
    /// The INVITE failed, the early dialog is gone
    Terminated,
}

impl Early {
    /// The SDP of the provisional response that created this dialog may
    /// be applied as early media by the caller
    pub async fn receive(&mut self) -> Result<EarlyResponse, Error> {
        match self
            .response_rx
            .recv()
            .await
            .expect("initiator outlives its earlies")
        {
            EarlyEvent::Response(response) => match response.line.code.into_u16() {
                101..=199 => Ok(EarlyResponse::Provisional(response)),
                200..=299 => {
                    let dialog = self.dialog.take().expect("success consumes the dialog");

                    let session = create_uac_session(
                        self.endpoint.clone(),
                        self.invite_layer,
                        self.timer_config,
                        dialog,
                        &response,
                    )?;

                    Ok(EarlyResponse::Success(session, response))
                }
                _ => unreachable!("initiator only forwards 101..=299"),
            },
            EarlyEvent::Terminate => Ok(EarlyResponse::Terminated),
        }
    }
}
