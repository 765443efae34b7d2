use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::IResult;
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

/// `Call-ID` header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallID(pub BytesStr);

impl CallID {
    pub fn new(id: impl Into<BytesStr>) -> Self {
        Self(id.into())
    }
}

impl ConstNamed for CallID {
    const NAME: Name = Name::CALL_ID;
}

impl HeaderParse for CallID {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        Ok(("", Self(BytesStr::from_parse(src, i.trim()))))
    }
}

impl PrintHeader for CallID {
    fn print(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for CallID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
