// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{NodeId, ParseError, Request, Timestamp};
use std::fmt;
use std::str::FromStr;

/// The two messages peers exchange. A `Request` is broadcast to every other
/// peer when a node wants the resource; a `Reply` is the permission one peer
/// grants another, either right away or once it's done with the resource.
///
/// On the wire each message is one whitespace-separated line:
///
/// ```text
/// REQ <timestamp> <sender>
/// OK <sender>
/// ```
///
/// A reply carries no timestamp.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Message {
    Request { timestamp: Timestamp, from: NodeId },
    Reply { from: NodeId },
}

impl Message {
    pub fn request(req: Request) -> Self {
        Message::Request {
            timestamp: req.timestamp,
            from: req.node,
        }
    }

    pub fn reply(from: NodeId) -> Self {
        Message::Reply { from }
    }

    pub fn sender(&self) -> NodeId {
        match self {
            Message::Request { from, .. } | Message::Reply { from } => *from,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request { timestamp, from } => write!(f, "REQ {} {}", timestamp, from),
            Message::Reply { from } => write!(f, "OK {}", from),
        }
    }
}

fn int_field<'a, T, I>(fields: &mut I, field: &'static str) -> Result<T, ParseError>
where
    T: FromStr,
    I: Iterator<Item = &'a str>,
{
    let s = fields.next().ok_or(ParseError::MissingField(field))?;
    s.parse().map_err(|_| ParseError::BadInteger {
        field,
        value: s.to_string(),
    })
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.split_whitespace();
        let msg = match fields.next() {
            None => return Err(ParseError::Empty),
            Some("REQ") => {
                let timestamp = int_field(&mut fields, "timestamp")?;
                let from = int_field(&mut fields, "sender")?;
                Message::Request { timestamp, from }
            }
            Some("OK") => Message::Reply {
                from: int_field(&mut fields, "sender")?,
            },
            Some(other) => return Err(ParseError::UnknownKind(other.to_string())),
        };
        match fields.next() {
            Some(extra) => Err(ParseError::TrailingInput(extra.to_string())),
            None => Ok(msg),
        }
    }
}
