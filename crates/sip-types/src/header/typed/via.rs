use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::host::HostPort;
use crate::parse::{token, whitespace, IResult};
use crate::uri::{Param, Params};
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::{tag, take_while, take_while1};
use std::fmt;

/// `Via` header
#[derive(Debug, Clone)]
pub struct Via {
    pub transport: BytesStr,
    pub sent_by: HostPort,
    pub params: Params,
}

impl Via {
    pub fn new(
        transport: impl Into<BytesStr>,
        sent_by: impl Into<HostPort>,
        branch: impl Into<BytesStr>,
    ) -> Self {
        Self {
            transport: transport.into(),
            sent_by: sent_by.into(),
            params: Params::new().with(Param::value("branch", branch)),
        }
    }

    pub fn branch(&self) -> Option<&BytesStr> {
        self.params.get_val("branch")
    }
}

impl ConstNamed for Via {
    const NAME: Name = Name::VIA;
}

impl HeaderParse for Via {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, _) = tag("SIP/2.0/")(i)?;
        let (i, transport) = take_while1(token)(i)?;
        let (i, _) = take_while(whitespace)(i)?;
        let (i, sent_by) = HostPort::parse(src, i)?;
        let (i, params) = Params::parse(src, i)?;

        Ok((
            i,
            Self {
                transport: BytesStr::from_parse(src, transport),
                sent_by,
                params,
            },
        ))
    }
}

impl PrintHeader for Via {
    fn print(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}{}", self.transport, self.sent_by, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::Host;

    #[test]
    fn via() {
        let input = "SIP/2.0/WS df7jal23ls0d.invalid;branch=z9hG4bKabc;rport";
        let src = Bytes::from_static(input.as_bytes());

        let (rem, via) = Via::parse(&src, input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(via.transport, "WS");
        assert_eq!(
            via.sent_by.host,
            Host::Name(BytesStr::from_static("df7jal23ls0d.invalid"))
        );
        assert_eq!(via.branch().unwrap(), "z9hG4bKabc");
    }

    #[test]
    fn via_print() {
        let via = Via::new("WS", HostPort::host_name("node.invalid"), "z9hG4bKxyz");

        assert_eq!(via.to_string(), "SIP/2.0/WS node.invalid;branch=z9hG4bKxyz");
    }
}
