//! Registrar client: periodic REGISTER with refresh, 423 handling and
//! GRUU extraction

use crate::util::{random_sequence_number, random_string};
use bytesstr::BytesStr;
use sip_core::transaction::TsxResponse;
use sip_core::Request;
use sip_types::header::typed::{CSeq, CallID, Contact, Expires, FromTo, MaxForwards, MinExpires};
use sip_types::uri::{NameAddr, Param, Params, SipUri};
use sip_types::{CodeKind, Method, Name};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// How early before the binding expiry the refresh REGISTER is sent
const REFRESH_MARGIN: Duration = Duration::from_secs(3);

/// Which bindings an unregister removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveBinding {
    /// Keep registering
    No,
    /// Remove this UA's contact
    Current,
    /// `Contact: *`, remove every binding of the address of record
    All,
}

/// State of the registration with one registrar.
///
/// One Call-ID with a strictly increasing CSeq for the whole lifetime,
/// at most one REGISTER in flight.
pub struct Registration {
    registrar: SipUri,

    to: FromTo,
    from: FromTo,

    cseq: u32,
    call_id: CallID,

    /// Contact offered when registering
    contact: Contact,

    /// Contact learned from `pub-gruu`/`temp-gruu`, preferred over the
    /// plain contact once present
    gruu_contact: Option<Contact>,

    /// Expiry requested from the registrar
    requested_expires: Duration,

    /// Expiry granted by the registrar
    granted_expires: Duration,

    refresh_at: Option<Instant>,

    registered: bool,
}

impl Registration {
    /// `instance_id` is the `urn:uuid:...` carried as `+sip.instance`
    pub fn new(
        id: NameAddr,
        contact_addr: NameAddr,
        registrar: SipUri,
        instance_id: String,
        expires: Duration,
    ) -> Self {
        let contact_params = Params::new()
            .with(Param::value("reg-id", "1"))
            .with(Param::value("+sip.instance", format!("\"<{}>\"", instance_id)));

        Self {
            registrar,
            to: FromTo::new(id.clone(), None),
            from: FromTo::new(id, Some(random_string())),
            cseq: random_sequence_number(),
            call_id: CallID::new(random_string()),
            contact: Contact::with_params(contact_addr, contact_params),
            gruu_contact: None,
            requested_expires: expires,
            granted_expires: expires,
            refresh_at: None,
            registered: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The contact other components should place into their requests,
    /// the GRUU once the registrar handed one out
    pub fn contact(&self) -> &Contact {
        self.gruu_contact.as_ref().unwrap_or(&self.contact)
    }

    pub fn create_register(&mut self, remove_binding: RemoveBinding) -> Request {
        let mut request = Request::new(Method::Register, self.registrar.clone());

        request.headers.insert_named(&MaxForwards(70));
        request.headers.insert_type(Name::FROM, &self.from);
        request.headers.insert_type(Name::TO, &self.to);
        request.headers.insert_named(&self.call_id);

        self.cseq += 1;
        request
            .headers
            .insert_named(&CSeq::new(self.cseq, Method::Register));

        match remove_binding {
            RemoveBinding::No => {
                request
                    .headers
                    .insert_named(&Expires(self.requested_expires.as_secs() as u32));
                request.headers.insert_named(&self.contact);
            }
            RemoveBinding::Current => {
                request.headers.insert_named(&Expires(0));
                request.headers.insert_named(&self.contact);
            }
            RemoveBinding::All => {
                request.headers.insert_named(&Expires(0));
                request.headers.insert_named(&Contact::Star);
            }
        }

        request
    }

    /// Digest a 2xx to a REGISTER.
    ///
    /// Finds our binding among the returned contacts to learn the
    /// granted expiry, schedules the refresh and picks up GRUUs.
    pub fn receive_success_response(&mut self, response: &TsxResponse) {
        assert_eq!(response.line.code.kind(), CodeKind::Success);

        let own_uri = match self.contact.addr() {
            Some(addr) => &addr.uri,
            None => return,
        };

        let contacts: Vec<Contact> = response.headers.get_all_named().unwrap_or_default();

        let own_binding = contacts
            .iter()
            .find(|contact| {
                contact
                    .addr()
                    .map(|addr| addr.uri.compare(own_uri))
                    .unwrap_or(false)
            });

        let expires_secs = own_binding
            .and_then(|contact| contact.params()?.get_val("expires")?.parse::<u64>().ok())
            .or_else(|| {
                response
                    .headers
                    .get_named::<Expires>()
                    .ok()
                    .map(|e| u64::from(e.0))
            })
            .unwrap_or(self.requested_expires.as_secs());

        if let Some(binding) = own_binding {
            self.take_gruu(binding);
        }

        self.granted_expires = Duration::from_secs(expires_secs);
        self.registered = true;

        let refresh_in = self.granted_expires.saturating_sub(REFRESH_MARGIN);
        self.refresh_at = Some(Instant::now() + refresh_in);
    }

    fn take_gruu(&mut self, binding: &Contact) {
        let Some(params) = binding.params() else {
            return;
        };

        let gruu = params
            .get_val("temp-gruu")
            .or_else(|| params.get_val("pub-gruu"));

        let Some(gruu) = gruu else {
            return;
        };

        match gruu.as_str().parse::<SipUri>() {
            Ok(uri) => {
                self.gruu_contact = Some(Contact::new(NameAddr::uri(uri)));
            }
            Err(_) => log::warn!("registrar returned an unparsable gruu, ignoring"),
        }
    }

    /// Whether this UA holds a public GRUU usable across transport loss
    pub fn has_gruu(&self) -> bool {
        self.gruu_contact.is_some()
    }

    /// Expiry granted by the registrar in the last 2xx
    pub fn granted_expires(&self) -> Duration {
        self.granted_expires
    }

    /// When the next refresh REGISTER is due
    pub fn refresh_deadline(&self) -> Option<Instant> {
        self.refresh_at
    }

    /// Digest a 423 Interval Too Brief.
    ///
    /// Returns `true` when `Min-Expires` raised the interval and the
    /// REGISTER should be retried once.
    pub fn receive_interval_too_brief(&mut self, response: &TsxResponse) -> bool {
        let Ok(min_expires) = response.headers.get_named::<MinExpires>() else {
            return false;
        };

        self.requested_expires = Duration::from_secs(u64::from(min_expires.0));

        true
    }

    /// Drop all registration state after a failure or transport loss;
    /// nothing is sent
    pub fn mark_unregistered(&mut self) {
        self.registered = false;
        self.refresh_at = None;
    }

    /// Cancel the refresh timer, used after unregistering
    pub fn cancel_refresh(&mut self) {
        self.refresh_at = None;
    }

    /// Wait until the binding needs its refresh; never resolves while
    /// unregistered
    pub async fn wait_for_expiry(&mut self) {
        match self.refresh_at {
            Some(refresh_at) => sleep_until(refresh_at).await,
            None => std::future::pending().await,
        }
    }

    /// From-tag of the REGISTER requests, used to match responses
    pub fn from_tag(&self) -> Option<&BytesStr> {
        self.from.tag.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sip_types::header::typed::CSeq;

    fn registration() -> Registration {
        let id = NameAddr::uri("sip:alice@example.com".parse().unwrap());
        let contact = NameAddr::uri("sip:alice@abc.invalid".parse().unwrap());

        Registration::new(
            id,
            contact,
            "sip:example.com".parse().unwrap(),
            "urn:uuid:0f7d60ef-2c31-4e23-a0a4-90a9c9d7e1b2".to_string(),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn register_request_shape() {
        let mut registration = registration();

        let request = registration.create_register(RemoveBinding::No);

        assert_eq!(request.line.method, Method::Register);
        assert_eq!(
            request.headers.get_named::<Expires>().unwrap(),
            Expires(600)
        );

        let contact: Contact = request.headers.get_named().unwrap();
        let params = contact.params().unwrap();

        assert_eq!(params.get_val("reg-id").unwrap(), "1");
        assert!(params
            .get_val("+sip.instance")
            .unwrap()
            .contains("urn:uuid:"));
    }

    #[test]
    fn cseq_strictly_increases() {
        let mut registration = registration();

        let first = registration
            .create_register(RemoveBinding::No)
            .headers
            .get_named::<CSeq>()
            .unwrap();
        let second = registration
            .create_register(RemoveBinding::No)
            .headers
            .get_named::<CSeq>()
            .unwrap();

        assert!(second.cseq > first.cseq);
    }

    #[test]
    fn unregister_all_uses_star() {
        let mut registration = registration();

        let request = registration.create_register(RemoveBinding::All);

        assert_eq!(request.headers.get_named::<Expires>().unwrap(), Expires(0));
        assert!(matches!(
            request.headers.get_named::<Contact>().unwrap(),
            Contact::Star
        ));
    }
}
