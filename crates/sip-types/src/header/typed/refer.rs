use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::IResult;
use crate::uri::{NameAddr, Params};
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

/// `Refer-To` header carrying the transfer target
#[derive(Debug, Clone)]
pub struct ReferTo {
    pub addr: NameAddr,
    pub params: Params,
}

impl ReferTo {
    pub fn new(addr: NameAddr) -> Self {
        Self {
            addr,
            params: Params::new(),
        }
    }
}

impl ConstNamed for ReferTo {
    const NAME: Name = Name::REFER_TO;
}

impl HeaderParse for ReferTo {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, addr) = NameAddr::parse(src, i)?;
        let (i, params) = Params::parse(src, i)?;

        Ok((i, Self { addr, params }))
    }
}

impl PrintHeader for ReferTo {
    fn print(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ReferTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.addr, self.params)
    }
}

/// `Replaces` header identifying the dialog a new INVITE replaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaces {
    pub call_id: BytesStr,
    pub to_tag: BytesStr,
    pub from_tag: BytesStr,
    pub early_only: bool,
}

impl ConstNamed for Replaces {
    const NAME: Name = Name::REPLACES;
}

impl HeaderParse for Replaces {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let end = i
            .find(';')
            .unwrap_or(i.len());

        let call_id = i[..end].trim();

        if call_id.is_empty() {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::TakeWhile1,
            )));
        }

        let (rem, params) = Params::parse(src, &i[end..])?;

        let (to_tag, from_tag) = match (params.get_val("to-tag"), params.get_val("from-tag")) {
            (Some(to_tag), Some(from_tag)) => (to_tag.clone(), from_tag.clone()),
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    i,
                    nom::error::ErrorKind::Verify,
                )))
            }
        };

        Ok((
            rem,
            Self {
                call_id: BytesStr::from_parse(src, call_id),
                to_tag,
                from_tag,
                early_only: params.contains("early-only"),
            },
        ))
    }
}

impl PrintHeader for Replaces {
    fn print(&self) -> String {
        let mut s = format!(
            "{};to-tag={};from-tag={}",
            self.call_id, self.to_tag, self.from_tag
        );

        if self.early_only {
            s.push_str(";early-only");
        }

        s
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn refer_to_with_replaces_header_param() {
        let input = "<sip:carol@chicago.example.com?Replaces=call1%3Bto-tag%3Da%3Bfrom-tag%3Db>";
        let src = Bytes::from_static(input.as_bytes());

        let (_, refer_to) = ReferTo::parse(&src, input).unwrap();

        assert_eq!(refer_to.addr.uri.user.as_ref().unwrap(), "carol");
        assert!(refer_to.addr.uri.header_params.get("Replaces").is_some());
    }

    #[test]
    fn replaces_round_trip() {
        let input = "12adf2f34456gs5;to-tag=12345;from-tag=54321;early-only";
        let src = Bytes::from_static(input.as_bytes());

        let (_, replaces) = Replaces::parse(&src, input).unwrap();

        assert_eq!(replaces.call_id, "12adf2f34456gs5");
        assert_eq!(replaces.to_tag, "12345");
        assert_eq!(replaces.from_tag, "54321");
        assert!(replaces.early_only);
        assert_eq!(replaces.print(), input);
    }
}
