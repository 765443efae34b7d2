use super::consts::RFC3261_BRANCH_PREFIX;
use super::generate_branch;
use crate::BaseHeaders;
use bytesstr::BytesStr;
use sip_types::header::HeaderError;
use sip_types::msg::MessageLine;
use sip_types::{Method, Name};
use std::fmt;

/// Transaction key matching messages to a live transaction.
///
/// Client keys are generated with a fresh branch, server keys are
/// derived from the incoming request's top Via branch. INVITE and ACK
/// share a key so transaction-level ACKs reach the INVITE transaction.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TsxKey {
    role: Role,
    branch: BytesStr,
    method: Option<Method>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

fn filter_method(method: &Method) -> Option<Method> {
    Some(method)
        .filter(|&m| !matches!(m, Method::Invite | Method::Ack))
        .cloned()
}

impl TsxKey {
    pub fn client(method: &Method) -> Self {
        Self {
            role: Role::Client,
            branch: generate_branch(),
            method: filter_method(method),
        }
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn is_invite(&self) -> bool {
        self.method.is_none()
    }

    pub fn branch(&self) -> &BytesStr {
        &self.branch
    }

    fn from_headers(headers: &BaseHeaders, role: Role) -> Result<Self, HeaderError> {
        let branch = headers
            .top_via
            .params
            .get_val("branch")
            .filter(|b| b.starts_with(RFC3261_BRANCH_PREFIX))
            .ok_or_else(|| HeaderError::malformed(Name::VIA))?;

        Ok(Self {
            role,
            branch: branch.clone(),
            method: filter_method(&headers.cseq.method),
        })
    }

    /// Derive the key for any received message
    pub fn from_message_parts(
        line: &MessageLine,
        headers: &BaseHeaders,
    ) -> Result<Self, HeaderError> {
        match line {
            MessageLine::Request(_) => Self::from_headers(headers, Role::Server),
            MessageLine::Response(_) => Self::from_headers(headers, Role::Client),
        }
    }
}

impl fmt::Display for TsxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Client => "client",
            Role::Server => "server",
        };

        let method = self.method.as_ref().unwrap_or(&Method::Invite);

        write!(f, "{}:{}:{}", role, self.branch, method)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invite_and_ack_share_a_key() {
        let invite = TsxKey {
            role: Role::Server,
            branch: "z9hG4bKabc".into(),
            method: filter_method(&Method::Invite),
        };

        let ack = TsxKey {
            role: Role::Server,
            branch: "z9hG4bKabc".into(),
            method: filter_method(&Method::Ack),
        };

        assert_eq!(invite, ack);
        assert!(invite.is_invite());
    }

    #[test]
    fn client_keys_are_unique() {
        assert_ne!(TsxKey::client(&Method::Bye), TsxKey::client(&Method::Bye));
    }
}
