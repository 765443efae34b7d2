use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::{digit, whitespace, IResult};
use crate::{Method, Name};
use bytes::Bytes;
use nom::bytes::complete::{take_while, take_while1};
use nom::combinator::map_res;
use std::str::FromStr;

/// `CSeq` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub cseq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(cseq: u32, method: Method) -> Self {
        Self { cseq, method }
    }
}

impl ConstNamed for CSeq {
    const NAME: Name = Name::CSEQ;
}

impl HeaderParse for CSeq {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, cseq) = map_res(take_while1(digit), u32::from_str)(i)?;
        let (i, _) = take_while(whitespace)(i)?;
        let (i, method) = Method::parse(src, i)?;

        Ok((i, Self { cseq, method }))
    }
}

impl PrintHeader for CSeq {
    fn print(&self) -> String {
        format!("{} {}", self.cseq, self.method)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_print() {
        let src = Bytes::from_static(b"4711 INVITE");
        let (rem, cseq) = CSeq::parse(&src, "4711 INVITE").unwrap();

        assert!(rem.is_empty());
        assert_eq!(cseq, CSeq::new(4711, Method::Invite));
        assert_eq!(cseq.print(), "4711 INVITE");
    }
}
