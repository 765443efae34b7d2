use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::{token, IResult};
use crate::uri::Params;
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;
use std::fmt;

/// `Event` header of the SIP events framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub package: BytesStr,
    pub id: Option<BytesStr>,
}

impl Event {
    pub fn new(package: impl Into<BytesStr>) -> Self {
        Self {
            package: package.into(),
            id: None,
        }
    }
}

impl ConstNamed for Event {
    const NAME: Name = Name::EVENT;
}

impl HeaderParse for Event {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, package) = take_while1(token)(i)?;
        let (i, mut params) = Params::parse(src, i)?;

        Ok((
            i,
            Self {
                package: BytesStr::from_parse(src, package),
                id: params.take("id"),
            },
        ))
    }
}

impl PrintHeader for Event {
    fn print(&self) -> String {
        match &self.id {
            Some(id) => format!("{};id={}", self.package, id),
            None => self.package.to_string(),
        }
    }
}

/// State of a subscription carried in NOTIFY requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active { expires: Option<u32> },
    Pending,
    Terminated,
}

impl ConstNamed for SubscriptionState {
    const NAME: Name = Name::SUBSCRIPTION_STATE;
}

impl HeaderParse for SubscriptionState {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, state) = take_while1(token)(i)?;
        let (i, params) = Params::parse(src, i)?;

        let state = if state.eq_ignore_ascii_case("active") {
            Self::Active {
                expires: params
                    .get_val("expires")
                    .and_then(|v| v.parse().ok()),
            }
        } else if state.eq_ignore_ascii_case("pending") {
            Self::Pending
        } else {
            Self::Terminated
        };

        Ok((i, state))
    }
}

impl PrintHeader for SubscriptionState {
    fn print(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active { expires: Some(expires) } => {
                write!(f, "active;expires={}", expires)
            }
            Self::Active { expires: None } => f.write_str("active"),
            Self::Pending => f.write_str("pending"),
            Self::Terminated => f.write_str("terminated;reason=noresource"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_refer() {
        let input = "refer;id=93809824";
        let src = Bytes::from_static(input.as_bytes());

        let (_, event) = Event::parse(&src, input).unwrap();

        assert_eq!(event.package, "refer");
        assert_eq!(event.id.unwrap(), "93809824");
    }

    #[test]
    fn subscription_state() {
        let input = "active;expires=60";
        let src = Bytes::from_static(input.as_bytes());

        let (_, state) = SubscriptionState::parse(&src, input).unwrap();

        assert_eq!(state, SubscriptionState::Active { expires: Some(60) });
    }
}
