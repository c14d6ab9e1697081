// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::clock::MAX_TIMESTAMP;
use crate::{Error, LogicalClock, Message, NodeId, Request, Result, Timestamp};
use im::OrdSet as ArcOrdSet;
use itertools::Itertools;
use tracing::{debug, trace};

// Nodes _could_ be implemented as a blocking object that owns its sockets,
// but then nothing can capture, inspect or clone the protocol variables, and
// we want to hook Nodes up to explicit-state model checkers, which pretty
// much requires snapshotting state.
//
// So instead the protocol is an explicit state machine: every operation
// consumes at most one input, pushes some number of messages on an outgoing
// queue, and possibly performs a `NodeState` transition. Routing the
// outgoing queue, and serializing calls, is the caller's job.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Idle,       // Not interested in the resource.
    Requesting, // Request broadcast; collecting replies.
    InCs,       // Holding the resource.
}

/// A message together with the peer it's addressed to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Envelope {
    pub to: NodeId,
    pub message: Message,
}

/// `Node`s are the participants in Ricart–Agrawala mutual exclusion over a
/// fixed group of `nodes` peers with ids `0..nodes`.
///
/// A node wanting the resource calls `request`, which broadcasts a
/// timestamped request, and is granted the resource (its state becomes
/// `InCs`) once every other peer has replied. Meanwhile every request it
/// receives from a peer is either answered immediately or, if the node is
/// using the resource or has an older claim to it, deferred until `exit`.
///
/// All communication is assumed to be (eventually) reliable. A lost reply
/// leaves its addressee waiting forever; nothing here retries.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Node {
    // Fixed for the node's lifetime.
    pub(crate) id: NodeId,
    pub(crate) nodes: usize,

    // Protocol state.
    pub(crate) clock: LogicalClock,
    pub(crate) state: NodeState,
    pub(crate) pending: Option<Request>,
    pub(crate) deferred: ArcOrdSet<NodeId>,
    pub(crate) quorum: ArcOrdSet<NodeId>,

    // History variable, for purposes of model checking.
    pub(crate) grants: u64,
}

impl Node {
    pub fn new(id: NodeId, nodes: usize) -> Result<Self> {
        if id >= nodes {
            return Err(Error::UnknownNode { id, nodes });
        }
        Ok(Node {
            id,
            nodes,
            clock: LogicalClock::new(),
            state: NodeState::Idle,
            pending: None,
            deferred: ArcOrdSet::new(),
            quorum: ArcOrdSet::new(),
            grants: 0,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The node's own outstanding request, if it's requesting or holding the
    /// resource.
    pub fn pending(&self) -> Option<Request> {
        self.pending
    }

    /// Peers owed a reply once the resource is released.
    pub fn deferred(&self) -> &ArcOrdSet<NodeId> {
        &self.deferred
    }

    /// Peers that have replied to the current request.
    pub fn quorum(&self) -> &ArcOrdSet<NodeId> {
        &self.quorum
    }

    /// Number of times this node has been granted the resource.
    pub fn grants(&self) -> u64 {
        self.grants
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> {
        let id = self.id;
        (0..self.nodes).filter(move |p| *p != id)
    }

    pub fn is_peer(&self, id: NodeId) -> bool {
        id < self.nodes && id != self.id
    }

    /// Checks an inbound message before it's handed to `receive`: it must
    /// come from a peer, and a request's timestamp must leave the clock room
    /// to keep ticking. Rejected messages should be dropped unapplied.
    pub fn check_inbound(&self, m: &Message) -> Result<()> {
        let from = m.sender();
        if from == self.id {
            return Err(Error::FromSelf(from));
        }
        if !self.is_peer(from) {
            return Err(Error::UnknownNode {
                id: from,
                nodes: self.nodes,
            });
        }
        match *m {
            Message::Request { timestamp, .. } if timestamp > MAX_TIMESTAMP => {
                Err(Error::TimestampOutOfRange { from, timestamp })
            }
            _ => Ok(()),
        }
    }

    fn send(&self, to: NodeId, message: Message, outgoing: &mut Vec<Envelope>) {
        trace!("node {} queued {} for {}", self.id, message, to);
        outgoing.push(Envelope { to, message });
    }

    /// Starts a new request: Idle -> Requesting. Broadcasts the request to
    /// every peer and returns it. With no peers the node is granted the
    /// resource on the spot.
    pub fn request(&mut self, outgoing: &mut Vec<Envelope>) -> Result<Request> {
        if self.state != NodeState::Idle {
            return Err(self.misuse("request"));
        }
        let ts = self.clock.tick().ok_or(Error::ClockExhausted(self.id))?;
        self.quorum.clear();
        let req = Request::new(ts, self.id);
        self.pending = Some(req);
        self.state = NodeState::Requesting;
        debug!("node {} requesting with {}", self.id, req);
        for peer in self.peers() {
            self.send(peer, Message::request(req), outgoing);
        }
        self.try_enter();
        Ok(req)
    }

    /// Consumes one inbound message. Total over every message and state:
    /// requests are answered or deferred, replies are counted.
    pub fn receive(&mut self, m: &Message, outgoing: &mut Vec<Envelope>) {
        match *m {
            Message::Request { timestamp, from } => {
                self.arbitrate(Request::new(timestamp, from), outgoing)
            }
            Message::Reply { from } => self.count_reply(from),
        }
    }

    /// Whether `incoming` has to wait for this node to finish with the
    /// resource.
    pub fn should_defer(&self, incoming: &Request) -> bool {
        match (self.state, &self.pending) {
            (NodeState::InCs, _) => true,
            (NodeState::Requesting, Some(own)) => own.has_priority_over(incoming),
            _ => false,
        }
    }

    fn arbitrate(&mut self, incoming: Request, outgoing: &mut Vec<Envelope>) {
        self.clock.observe(incoming.timestamp);
        if self.should_defer(&incoming) {
            debug!(
                "node {} in {:?} defers {}",
                self.id, self.state, incoming
            );
            self.deferred.insert(incoming.node);
        } else {
            trace!("node {} grants {}", self.id, incoming);
            self.send(incoming.node, Message::reply(self.id), outgoing);
        }
    }

    fn count_reply(&mut self, from: NodeId) {
        // Counted whatever the state. A late reply is a harmless no-op add.
        if self.quorum.insert(from).is_none() {
            trace!(
                "node {} has replies from [{}]",
                self.id,
                self.quorum.iter().join(", ")
            );
            self.try_enter();
        }
    }

    // Return true if every peer has replied to the current request.
    fn have_quorum(&self) -> bool {
        self.peers().all(|p| self.quorum.contains(&p))
    }

    fn try_enter(&mut self) {
        if self.state == NodeState::Requesting && self.have_quorum() {
            self.state = NodeState::InCs;
            self.grants += 1;
            debug!("node {} entered critical section", self.id);
        }
    }

    /// Releases the resource: InCs -> Idle. Replies once to every deferred
    /// peer and returns the request that was granted.
    pub fn exit(&mut self, outgoing: &mut Vec<Envelope>) -> Result<Request> {
        let req = match (self.state, self.pending) {
            (NodeState::InCs, Some(req)) => req,
            _ => return Err(self.misuse("exit")),
        };
        let deferred = std::mem::take(&mut self.deferred);
        debug!(
            "node {} leaving critical section, replying to [{}]",
            self.id,
            deferred.iter().join(", ")
        );
        for peer in deferred.iter() {
            self.send(*peer, Message::reply(self.id), outgoing);
        }
        self.pending = None;
        self.state = NodeState::Idle;
        Ok(req)
    }

    fn misuse(&self, op: &'static str) -> Error {
        Error::InvalidTransition {
            id: self.id,
            op,
            state: self.state,
        }
    }
}
