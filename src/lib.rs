// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate implements the Ricart–Agrawala algorithm for distributed mutual
 * exclusion: a fixed group of N peers takes turns holding a shared resource
 * without any central lock manager. It has some desirable properties:
 *
 *   - It's small. Two message kinds, three states, one round-trip per
 *     critical section: a request is broadcast to every peer and the
 *     critical section is entered once every peer has replied.
 *
 *   - It needs no synchronized clocks. Requests are ordered by Lamport
 *     timestamps, with ties broken by peer id, which is a total order every
 *     peer computes identically and locally.
 *
 *   - It's starvation-free, provided messages are eventually delivered and
 *     every critical section finishes.
 *
 * The price is that every peer has to hear from every other peer on every
 * request, so a single unreachable peer stalls everyone waiting on it. There
 * is no fault tolerance here, and no membership changes.
 *
 * The protocol core is [`Node`], an explicit state machine that consumes
 * messages and pushes outgoing [`Envelope`]s, with no I/O of its own. The
 * [`runtime`] module wraps it in a lock and a condition variable, hooks it up
 * to a [`Transport`] and runs the periodic driver loop; the [`monitor`]
 * module is a small line-oriented log aggregator the peers report to.
 *
 * ## Reference
 *
 * Glenn Ricart, Ashok K. Agrawala. An Optimal Algorithm for Mutual Exclusion
 * in Computer Networks. Communications of the ACM 24(1), 1981.
 *
 * Leslie Lamport. Time, Clocks, and the Ordering of Events in a Distributed
 * System. Communications of the ACM 21(7), 1978.
 */

pub type NodeId = usize;
pub type Timestamp = u64;

pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod monitor;
pub mod node;
pub mod request;
pub mod runtime;
pub mod transport;
pub mod workload;

pub use clock::LogicalClock;
pub use config::Config;
pub use error::{ConfigError, Error, ParseError, Result};
pub use message::Message;
pub use monitor::{Monitor, MonitorClient};
pub use node::{Envelope, Node, NodeState};
pub use request::Request;
pub use runtime::{Driver, NodeHandle};
pub use transport::{Addressing, TcpTransport, Transport};
pub use workload::Workload;
