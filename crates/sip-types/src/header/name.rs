use bytesstr::BytesStr;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A header name with case-insensitive equality.
///
/// Known names carry their canonical print form; unknown names keep the
/// spelling they were received with. Compact forms are folded into their
/// long form when converting from a string.
#[derive(Debug, Clone)]
pub struct Name(Repr);

#[derive(Debug, Clone)]
enum Repr {
    Std(&'static str),
    Custom(BytesStr),
}

macro_rules! names {
    ($($const_name:ident = $print:literal $(, $compact:literal)?;)*) => {
        impl Name {
            $(pub const $const_name: Name = Name(Repr::Std($print));)*

            fn from_lookup(s: &str) -> Option<Name> {
                $(
                    if s.eq_ignore_ascii_case($print) {
                        return Some(Name::$const_name);
                    }

                    $(
                        if s.eq_ignore_ascii_case($compact) {
                            return Some(Name::$const_name);
                        }
                    )?
                )*

                None
            }
        }
    };
}

names! {
    VIA = "Via", "v";
    FROM = "From", "f";
    TO = "To", "t";
    CALL_ID = "Call-ID", "i";
    CSEQ = "CSeq";
    CONTACT = "Contact", "m";
    MAX_FORWARDS = "Max-Forwards";
    CONTENT_TYPE = "Content-Type", "c";
    CONTENT_LENGTH = "Content-Length", "l";
    EXPIRES = "Expires";
    MIN_EXPIRES = "Min-Expires";
    ALLOW = "Allow";
    ACCEPT = "Accept";
    SUPPORTED = "Supported", "k";
    REQUIRE = "Require";
    ROUTE = "Route";
    RECORD_ROUTE = "Record-Route";
    SESSION_EXPIRES = "Session-Expires", "x";
    MIN_SE = "Min-SE";
    EVENT = "Event", "o";
    SUBSCRIPTION_STATE = "Subscription-State";
    REFER_TO = "Refer-To", "r";
    REFERRED_BY = "Referred-By", "b";
    REPLACES = "Replaces";
    WWW_AUTHENTICATE = "WWW-Authenticate";
    AUTHORIZATION = "Authorization";
    PROXY_AUTHENTICATE = "Proxy-Authenticate";
    PROXY_AUTHORIZATION = "Proxy-Authorization";
    USER_AGENT = "User-Agent";
    SUBJECT = "Subject", "s";
    TIMESTAMP = "Timestamp";
}

impl Name {
    pub fn as_str(&self) -> &str {
        match &self.0 {
            Repr::Std(s) => s,
            Repr::Custom(s) => s,
        }
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::from_lookup(s).unwrap_or_else(|| Name(Repr::Custom(BytesStr::from(s))))
    }
}

impl From<BytesStr> for Name {
    fn from(s: BytesStr) -> Self {
        Name::from_lookup(&s).unwrap_or(Name(Repr::Custom(s)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.as_str().bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_and_case_fold() {
        assert_eq!(Name::from("i"), Name::CALL_ID);
        assert_eq!(Name::from("VIA"), Name::VIA);
        assert_eq!(Name::from("x-custom"), Name::from("X-Custom"));
        assert_eq!(Name::from("call-id").as_str(), "Call-ID");
    }
}
