use bytesstr::BytesStr;
use sip_core::IncomingRequest;
use std::fmt;

/// Dialog identifier: Call-ID plus both tags.
///
/// On incoming requests the peer's tag is the From-tag and ours the
/// To-tag; locally created dialogs store them the other way around.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DialogKey {
    pub call_id: BytesStr,
    pub local_tag: BytesStr,
    pub peer_tag: Option<BytesStr>,
}

impl DialogKey {
    /// Key of the dialog an incoming request belongs to
    pub fn from_incoming(request: &IncomingRequest) -> Option<Self> {
        let local_tag = request.base_headers.to.tag.clone()?;

        Some(Self {
            call_id: request.base_headers.call_id.0.clone(),
            local_tag,
            peer_tag: request.base_headers.from.tag.clone(),
        })
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.call_id, self.local_tag)?;

        if let Some(peer_tag) = &self.peer_tag {
            write!(f, ":{}", peer_tag)?;
        }

        Ok(())
    }
}
