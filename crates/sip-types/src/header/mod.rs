//! Header container, names and typed header implementations

use crate::parse::IResult;
use bytes::Bytes;

pub mod headers;
pub(crate) mod name;
pub mod typed;

use name::Name;

/// Error produced by typed header access
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("missing header {0}")]
    Missing(Name),
    #[error("malformed header {0}")]
    Malformed(Name),
}

impl HeaderError {
    pub fn missing(name: Name) -> Self {
        Self::Missing(name)
    }

    pub fn malformed(name: Name) -> Self {
        Self::Malformed(name)
    }
}

/// Assign a constant header name to a typed header
pub trait ConstNamed {
    const NAME: Name;
}

/// Parse a typed header from a single header value.
///
/// `src` is the buffer the value was sliced from, so implementations can
/// create cheap [`bytesstr::BytesStr`] references into it.
pub trait HeaderParse: Sized {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self>;
}

/// Print a typed header into a header value.
///
/// `CSV` headers are joined with `, ` into one line when inserted
/// repeatedly, all others produce one line per value.
pub trait PrintHeader {
    const CSV: bool = false;

    fn print(&self) -> String;
}
