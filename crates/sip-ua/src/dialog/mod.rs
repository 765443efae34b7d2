//! RFC 3261 Section 12 dialog state

use crate::util::random_sequence_number;
use bytesstr::BytesStr;
use sip_core::{Endpoint, IncomingRequest, LayerKey, OutgoingResponse, Request, Result};
use sip_types::header::typed::{CSeq, CallID, Contact, FromTo};
use sip_types::{Code, Method, Name};

mod client_builder;
mod key;
mod layer;

pub use client_builder::ClientDialogBuilder;
pub use key::DialogKey;
pub use layer::{register_usage, DialogLayer, Usage, UsageGuard};

pub(crate) use layer::DialogEntry;

/// An established or early dialog.
///
/// Owns the sequence numbers, tags, route set and remote target used to
/// build every in-dialog request. The glare flags gate concurrent
/// INVITE/UPDATE transactions per RFC 3261 Section 14.1.
#[derive(Debug)]
pub struct Dialog {
    pub endpoint: Endpoint,

    dialog_layer: LayerKey<DialogLayer>,

    /// Local CSeq, incremented for every request except ACK and CANCEL
    pub local_cseq: u32,

    /// CSeq of the INVITE this dialog was created from; ACK and CANCEL
    /// reuse it
    pub invite_cseq: u32,

    /// From header of locally built requests, tag always present
    pub local_fromto: FromTo,

    /// To header of locally built requests
    pub peer_fromto: FromTo,

    pub local_contact: Contact,

    /// Remote target, requests inside the dialog are sent to its URI
    pub peer_contact: Contact,

    pub call_id: CallID,

    /// Route set learned from Record-Route, applied to every request
    pub route_set: Vec<sip_types::header::typed::Route>,

    pub secure: bool,

    /// A local INVITE/UPDATE awaits its final response
    pub uac_pending_reply: bool,

    /// A remote INVITE/UPDATE awaits our final response
    pub uas_pending_reply: bool,
}

impl Dialog {
    /// Create a dialog from an incoming request, which may still be early
    #[allow(clippy::too_many_arguments)]
    pub fn new_server(
        endpoint: Endpoint,
        dialog_layer: LayerKey<DialogLayer>,
        request: &IncomingRequest,
        local_contact: Contact,
        peer_contact: Contact,
    ) -> Self {
        assert!(request.base_headers.to.tag.is_some());

        let route_set = request
            .headers
            .get_all(Name::RECORD_ROUTE)
            .unwrap_or_default()
            .into_iter()
            .map(|rr: sip_types::header::typed::RecordRoute| rr.into())
            .collect();

        let dialog = Self {
            endpoint,
            dialog_layer,
            local_cseq: random_sequence_number(),
            invite_cseq: request.base_headers.cseq.cseq,

            // from/to are mirrored on the server side
            local_fromto: request.base_headers.to.clone(),
            peer_fromto: request.base_headers.from.clone(),
            local_contact,
            peer_contact,
            call_id: request.base_headers.call_id.clone(),
            route_set,
            secure: dialog_secure(request),
            uac_pending_reply: false,
            uas_pending_reply: false,
        };

        let entry = DialogEntry::new(Some(request.base_headers.cseq.cseq));

        dialog.endpoint[dialog_layer]
            .dialogs
            .lock()
            .insert(dialog.key(), entry);

        dialog
    }

    pub fn key(&self) -> DialogKey {
        DialogKey {
            call_id: self.call_id.0.clone(),
            local_tag: self
                .local_fromto
                .tag
                .clone()
                .expect("dialog always has a local tag"),
            peer_tag: self.peer_fromto.tag.clone(),
        }
    }

    pub fn register_usage<U: Usage>(&self, usage: U) -> Option<UsageGuard> {
        register_usage(
            self.endpoint.clone(),
            self.dialog_layer,
            self.key(),
            usage,
        )
    }

    /// Build an in-dialog request.
    ///
    /// ACK and CANCEL inherit the INVITE's CSeq, everything else
    /// increments the dialog-local sequence number.
    pub fn create_request(&mut self, method: Method) -> Request {
        let uri = self.peer_contact.addr().map(|addr| addr.uri.clone());

        let mut request = Request::new(
            method.clone(),
            uri.unwrap_or_else(|| self.peer_fromto.uri.uri.clone()),
        );

        let cseq = match method {
            Method::Ack | Method::Cancel => self.invite_cseq,
            _ => {
                self.local_cseq += 1;
                self.local_cseq
            }
        };

        request
            .headers
            .insert_named(&sip_types::header::typed::MaxForwards(70));
        request.headers.insert_type(Name::FROM, &self.local_fromto);
        request.headers.insert_type(Name::TO, &self.peer_fromto);
        request.headers.insert_named(&self.call_id);
        request.headers.insert_named(&CSeq::new(cseq, method));

        for route in &self.route_set {
            request.headers.insert_named(route);
        }

        request.headers.insert_named(&self.local_contact);

        request
    }

    /// Build a response to an in-dialog request
    pub fn create_response(
        &self,
        request: &IncomingRequest,
        code: Code,
        reason: Option<BytesStr>,
    ) -> Result<OutgoingResponse> {
        let mut response = self.endpoint.create_response(request, code, reason);

        // replies carry our tag, except 100 which has none
        if code == Code::TRYING {
            response
                .msg
                .headers
                .edit(Name::TO, |to: &mut FromTo| to.tag = None)?;
        } else {
            let tag = self.local_fromto.tag.clone();

            response
                .msg
                .headers
                .edit(Name::TO, |to: &mut FromTo| to.tag = tag)?;
        }

        if request.line.method == Method::Invite {
            let code = code.into_u16();

            if let 101..=399 | 485 = code {
                if !response.msg.headers.contains(&Name::CONTACT) {
                    response.msg.headers.insert_named(&self.local_contact);
                }
            }

            if let 180..=189 | 200..=299 | 405 = code {
                for allow in self.endpoint.allowed() {
                    response.msg.headers.insert_named(allow);
                }
            }

            if let 200..=299 = code {
                for supported in self.endpoint.supported() {
                    response.msg.headers.insert_named(supported);
                }
            }
        }

        Ok(response)
    }
}

fn dialog_secure(request: &IncomingRequest) -> bool {
    request.line.uri.sips
}

impl Drop for Dialog {
    fn drop(&mut self) {
        self.endpoint[self.dialog_layer]
            .dialogs
            .lock()
            .remove(&self.key());
    }
}
