// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{NodeId, Timestamp};
use std::fmt;

/// A standing claim to the resource: the Lamport time at which it was issued
/// and the id of the node that issued it.
///
/// Requests are totally ordered by timestamp and then by node id, and the
/// _smaller_ request is the one with priority. The derived `Ord` is exactly
/// that order, since fields compare lexicographically in declaration order;
/// keep `timestamp` first.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Request {
    pub timestamp: Timestamp,
    pub node: NodeId,
}

impl Request {
    pub fn new(timestamp: Timestamp, node: NodeId) -> Self {
        Request { timestamp, node }
    }

    /// True iff `self` should be granted before `other`.
    pub fn has_priority_over(&self, other: &Request) -> bool {
        self < other
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.timestamp, self.node)
    }
}
