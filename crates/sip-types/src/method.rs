use crate::parse::{token, IResult};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;
use std::fmt;

/// A SIP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Cancel,
    Bye,
    Options,
    Message,
    Info,
    Update,
    Refer,
    Notify,
    Other(BytesStr),
}

pub use Method::{
    Ack as ACK, Bye as BYE, Cancel as CANCEL, Info as INFO, Invite as INVITE, Message as MESSAGE,
    Notify as NOTIFY, Options as OPTIONS, Refer as REFER, Register as REGISTER, Update as UPDATE,
};

impl Method {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (rem, m) = take_while1(token)(i)?;
        Ok((rem, Self::from_parse(src, m)))
    }

    pub fn from_parse(src: &Bytes, i: &str) -> Self {
        match i {
            "REGISTER" => Self::Register,
            "INVITE" => Self::Invite,
            "ACK" => Self::Ack,
            "CANCEL" => Self::Cancel,
            "BYE" => Self::Bye,
            "OPTIONS" => Self::Options,
            "MESSAGE" => Self::Message,
            "INFO" => Self::Info,
            "UPDATE" => Self::Update,
            "REFER" => Self::Refer,
            "NOTIFY" => Self::Notify,
            _ => Self::Other(BytesStr::from_parse(src, i)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Register => "REGISTER",
            Self::Invite => "INVITE",
            Self::Ack => "ACK",
            Self::Cancel => "CANCEL",
            Self::Bye => "BYE",
            Self::Options => "OPTIONS",
            Self::Message => "MESSAGE",
            Self::Info => "INFO",
            Self::Update => "UPDATE",
            Self::Refer => "REFER",
            Self::Notify => "NOTIFY",
            Self::Other(m) => m,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_known_and_other() {
        let src = Bytes::from_static(b"SNAPSHOT sip:x SIP/2.0");

        assert_eq!(Method::from_parse(&src, "INVITE"), Method::Invite);

        let (rem, m) = Method::parse(&src, "SNAPSHOT sip:x SIP/2.0").unwrap();
        assert_eq!(m, Method::Other(BytesStr::from_static("SNAPSHOT")));
        assert_eq!(rem, " sip:x SIP/2.0");
    }
}
