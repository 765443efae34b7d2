use crate::header::{HeaderParse, PrintHeader};
use crate::parse::IResult;
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

/// Value of the `From` and `To` headers.
///
/// Inserted under an explicit [`crate::Name`] since both headers share
/// this shape.
#[derive(Debug, Clone)]
pub struct FromTo {
    pub uri: NameAddr,
    pub tag: Option<BytesStr>,
    pub params: Params,
}

impl FromTo {
    pub fn new(uri: NameAddr, tag: Option<BytesStr>) -> Self {
        Self {
            uri,
            tag,
            params: Params::new(),
        }
    }
}

impl HeaderParse for FromTo {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, uri) = NameAddr::parse(src, i)?;
        let (i, mut params) = Params::parse(src, i)?;

        Ok((
            i,
            Self {
                uri,
                tag: params.take("tag"),
                params,
            },
        ))
    }
}

impl PrintHeader for FromTo {
    fn print(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FromTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uri.fmt(f)?;

        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }

        self.params.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_to() {
        let input = "Bob <sip:bob@example.com>;tag=abc123";
        let src = Bytes::from_static(input.as_bytes());

        let (rem, from) = FromTo::parse(&src, input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(from.tag.unwrap(), "abc123");
        assert!(from.params.is_empty());
    }

    #[test]
    fn print_keeps_extra_params() {
        let input = "<sip:bob@example.com>;tag=a;x=1";
        let src = Bytes::from_static(input.as_bytes());

        let (_, from) = FromTo::parse(&src, input).unwrap();

        assert_eq!(from.to_string(), "<sip:bob@example.com>;tag=a;x=1");
    }
}
