use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::IResult;
use crate::uri::{NameAddr, Params};
use crate::Name;
use bytes::Bytes;
use nom::bytes::complete::tag;
use std::fmt;

/// `Contact` header, either a concrete address or the `*` wildcard used
/// to clear every registered binding
#[derive(Debug, Clone)]
pub enum Contact {
    Star,
    Address {
        addr: NameAddr,
        params: Params,
    },
}

impl Contact {
    pub fn new(addr: NameAddr) -> Self {
        Self::Address {
            addr,
            params: Params::new(),
        }
    }

    pub fn with_params(addr: NameAddr, params: Params) -> Self {
        Self::Address { addr, params }
    }

    pub fn addr(&self) -> Option<&NameAddr> {
        match self {
            Self::Star => None,
            Self::Address { addr, .. } => Some(addr),
        }
    }

    pub fn params(&self) -> Option<&Params> {
        match self {
            Self::Star => None,
            Self::Address { params, .. } => Some(params),
        }
    }
}

impl ConstNamed for Contact {
    const NAME: Name = Name::CONTACT;
}

impl HeaderParse for Contact {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        if let Ok((rem, _)) = tag::<_, _, nom::error::Error<&str>>("*")(i.trim_start()) {
            return Ok((rem, Self::Star));
        }

        let (i, addr) = NameAddr::parse(src, i)?;
        let (i, params) = Params::parse(src, i)?;

        Ok((i, Self::Address { addr, params }))
    }
}

impl PrintHeader for Contact {
    fn print(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Star => f.write_str("*"),
            Self::Address { addr, params } => write!(f, "{}{}", addr, params),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(input: &'static str) -> Contact {
        let src = Bytes::from_static(input.as_bytes());
        let (_, contact) = Contact::parse(&src, input).unwrap();
        contact
    }

    #[test]
    fn star() {
        assert!(matches!(parse("*"), Contact::Star));
    }

    #[test]
    fn binding_with_params() {
        let contact = parse("<sip:alice@ws1.example.com>;reg-id=1;expires=600");

        let params = contact.params().unwrap();
        assert_eq!(params.get_val("reg-id").unwrap(), "1");
        assert_eq!(params.get_val("expires").unwrap(), "600");
    }

    #[test]
    fn gruu_params_survive() {
        let contact = parse(
            "<sip:alice@example.com>;pub-gruu=\"sip:alice@example.com;gr=urn:uuid:f81d\";+sip.instance=\"<urn:uuid:f81d>\"",
        );

        let params = contact.params().unwrap();
        assert_eq!(
            params.get_val("pub-gruu").unwrap(),
            "sip:alice@example.com;gr=urn:uuid:f81d"
        );
    }
}
