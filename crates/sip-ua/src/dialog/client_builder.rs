use super::{Dialog, DialogEntry, DialogLayer};
use crate::util::{random_sequence_number, random_string};
use sip_core::transaction::TsxResponse;
use sip_core::{Endpoint, LayerKey, Request};
use sip_types::header::typed::{CSeq, CallID, Contact, FromTo, MaxForwards, RecordRoute};
use sip_types::header::HeaderError;
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{CodeKind, Method, Name};

/// Collects the state of a dialog a local INVITE is about to create.
///
/// Early and confirmed dialogs are split off this builder for every
/// response carrying a To-tag.
#[derive(Debug)]
pub struct ClientDialogBuilder {
    pub endpoint: Endpoint,
    pub dialog_layer: LayerKey<DialogLayer>,
    pub local_cseq: u32,
    pub invite_cseq: u32,
    pub local_fromto: FromTo,
    pub peer_fromto: FromTo,
    pub local_contact: Contact,
    pub call_id: CallID,
    pub target: SipUri,
    pub secure: bool,
}

impl ClientDialogBuilder {
    pub fn new(
        endpoint: Endpoint,
        dialog_layer: LayerKey<DialogLayer>,
        local_addr: NameAddr,
        local_contact: Contact,
        target: SipUri,
    ) -> Self {
        let local_cseq = random_sequence_number();

        Self {
            endpoint,
            dialog_layer,
            local_cseq,
            invite_cseq: local_cseq,
            local_fromto: FromTo::new(local_addr, Some(random_string())),
            peer_fromto: FromTo::new(NameAddr::uri(target.clone()), None),
            local_contact,
            call_id: CallID::new(random_string()),
            secure: target.sips,
            target,
        }
    }

    /// Each call allocates a fresh CSeq, a retried INVITE (e.g. after a
    /// digest challenge) goes out with the next sequence number
    pub fn create_invite(&mut self) -> Request {
        self.local_cseq += 1;
        self.invite_cseq = self.local_cseq;
        self.create_request(Method::Invite)
    }

    /// CANCEL for the pending INVITE, same CSeq number
    pub fn create_cancel(&mut self) -> Request {
        let mut request = Request::new(Method::Cancel, self.target.clone());

        request.headers.insert_named(&MaxForwards(70));
        request.headers.insert_type(Name::FROM, &self.local_fromto);
        request.headers.insert_type(Name::TO, &self.peer_fromto);
        request.headers.insert_named(&self.call_id);
        request
            .headers
            .insert_named(&CSeq::new(self.invite_cseq, Method::Cancel));

        request
    }

    fn create_request(&mut self, method: Method) -> Request {
        let mut request = Request::new(method.clone(), self.target.clone());

        request.headers.insert_named(&MaxForwards(70));
        request.headers.insert_type(Name::FROM, &self.local_fromto);
        request.headers.insert_type(Name::TO, &self.peer_fromto);
        request.headers.insert_named(&self.call_id);
        request
            .headers
            .insert_named(&CSeq::new(self.local_cseq, method));
        request.headers.insert_named(&self.local_contact);

        request
    }

    /// Split a dialog off a response with a To-tag.
    ///
    /// Provisional responses create early dialogs, success responses
    /// confirmed ones.
    pub fn create_dialog_from_response(
        &mut self,
        response: &TsxResponse,
    ) -> Result<Dialog, HeaderError> {
        assert!(response.base_headers.to.tag.is_some());

        let peer_contact = match response.line.code.kind() {
            CodeKind::Provisional | CodeKind::Success => response.headers.get_named()?,
            _ => unreachable!("dialogs come from 1xx and 2xx responses"),
        };

        // the route set of a UAC dialog is the reversed Record-Route
        let mut route_set: Vec<RecordRoute> =
            response.headers.get_all(Name::RECORD_ROUTE).unwrap_or_default();
        route_set.reverse();

        let dialog = Dialog {
            endpoint: self.endpoint.clone(),
            dialog_layer: self.dialog_layer,
            local_cseq: self.local_cseq,
            invite_cseq: self.invite_cseq,
            local_fromto: self.local_fromto.clone(),
            peer_fromto: response.base_headers.to.clone(),
            local_contact: self.local_contact.clone(),
            peer_contact,
            call_id: self.call_id.clone(),
            route_set: route_set.into_iter().map(Into::into).collect(),
            secure: self.secure,
            uac_pending_reply: false,
            uas_pending_reply: false,
        };

        let entry = DialogEntry::new(None);

        self.endpoint[self.dialog_layer]
            .dialogs
            .lock()
            .insert(dialog.key(), entry);

        Ok(dialog)
    }
}
