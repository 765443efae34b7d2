use super::from_str_header;
use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::IResult;
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

/// `Content-Type` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType(pub BytesStr);

impl ConstNamed for ContentType {
    const NAME: Name = Name::CONTENT_TYPE;
}

impl HeaderParse for ContentType {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        Ok(("", Self(BytesStr::from_parse(src, i.trim()))))
    }
}

impl PrintHeader for ContentType {
    fn print(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

from_str_header!(
    /// `Content-Length` header
    ContentLength,
    Name::CONTENT_LENGTH,
    usize
);
