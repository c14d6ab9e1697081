// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{NodeId, NodeState, Timestamp};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A caller drove the state machine out of order, eg. `exit` while not
    /// holding the resource. Inbound messages never produce this.
    #[error("node {id} cannot {op} while {state:?}")]
    InvalidTransition {
        id: NodeId,
        op: &'static str,
        state: NodeState,
    },

    #[error("node {id} is not a member of a {nodes}-node system")]
    UnknownNode { id: NodeId, nodes: usize },

    #[error("node {0} received a message from itself")]
    FromSelf(NodeId),

    #[error("node {from} sent timestamp {timestamp}, beyond what a clock can follow")]
    TimestampOutOfRange { from: NodeId, timestamp: Timestamp },

    #[error("node {0} has run out of timestamps")]
    ClockExhausted(NodeId),
}

/// Reasons a wire line fails to parse.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("bad {field} field {value:?}")]
    BadInteger { field: &'static str, value: String },

    #[error("unexpected trailing input {0:?}")]
    TrailingInput(String),

    #[error("line longer than {0} bytes")]
    TooLong(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("node count must be a positive integer, got {0:?}")]
    BadNodeCount(String),

    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),

    #[error("empty workload range {min}..={max}")]
    EmptyWorkload { min: u64, max: u64 },

    #[error("request probability {0} is outside [0, 1]")]
    BadProbability(f64),

    #[error("send_attempts must be at least 1")]
    NoSendAttempts,

    #[error("bad host address {0:?}")]
    BadHost(String),

    #[error("node {id} has no port above base port {base}")]
    PortOverflow { id: NodeId, base: u16 },

    #[error("node {id} would listen on the monitor's port {port}")]
    PortClash { id: NodeId, port: u16 },

    #[error("cannot read {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}
