//! The four transaction state machines of RFC 3261 Section 17
//!
//! Transactions are owned driver objects: sending a request returns a
//! client transaction which must be polled for responses, incoming
//! requests are wrapped into server transactions which send the
//! responses. Messages are matched to live transactions by [`TsxKey`].

use crate::BaseHeaders;
use bytes::Bytes;
use bytesstr::BytesStr;
use parking_lot::Mutex;
use sip_types::msg::{MessageLine, StatusLine};
use sip_types::Headers;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

mod client;
mod client_inv;
mod key;
mod registration;
mod server;
mod server_inv;

pub(crate) use registration::TsxRegistration;

pub use client::ClientTsx;
pub use client_inv::ClientInvTsx;
pub use key::TsxKey;
pub use server::ServerTsx;
pub use server_inv::{Accepted, ServerInvTsx};

pub mod consts {
    use std::time::Duration;

    pub const T1: Duration = Duration::from_millis(500);
    pub const T2: Duration = Duration::from_secs(4);
    pub const T4: Duration = Duration::from_secs(5);

    /// Timer B, F and H: the bound on waiting for a final response or ACK
    pub const TIMEOUT: Duration = Duration::from_secs(32);

    pub const RFC3261_BRANCH_PREFIX: &str = "z9hG4bK";
}

/// Event delivered into a live transaction
#[derive(Debug)]
pub(crate) enum TsxEvent {
    Message(TsxMessage),
    TransportFailed,
}

#[derive(Default)]
pub(crate) struct Transactions {
    map: Mutex<HashMap<TsxKey, UnboundedSender<TsxEvent>>>,
}

impl Transactions {
    pub(crate) fn get_tsx_handler(&self, key: &TsxKey) -> Option<UnboundedSender<TsxEvent>> {
        self.map.lock().get(key).cloned()
    }

    pub(crate) fn register_transaction(&self, key: TsxKey, sender: UnboundedSender<TsxEvent>) {
        self.map.lock().insert(key, sender);
    }

    pub(crate) fn remove_transaction(&self, key: &TsxKey) {
        self.map.lock().remove(key);
    }

    /// Tell every live transaction that the transport is gone
    pub(crate) fn transport_failed(&self) {
        for sender in self.map.lock().values() {
            let _ = sender.send(TsxEvent::TransportFailed);
        }
    }
}

/// Response received inside a transaction
#[derive(Debug)]
pub struct TsxResponse {
    pub line: StatusLine,
    pub base_headers: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

/// Message received inside a transaction context
#[derive(Debug)]
pub struct TsxMessage {
    pub line: MessageLine,
    pub base_headers: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

pub fn generate_branch() -> BytesStr {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    consts::RFC3261_BRANCH_PREFIX
        .bytes()
        .chain(thread_rng().sample_iter(Alphanumeric).take(23))
        .map(char::from)
        .collect::<String>()
        .into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branch_has_magic_cookie() {
        let branch = generate_branch();

        assert!(branch.starts_with(consts::RFC3261_BRANCH_PREFIX));
        assert_eq!(branch.len(), consts::RFC3261_BRANCH_PREFIX.len() + 23);
        assert_ne!(branch, generate_branch());
    }
}
