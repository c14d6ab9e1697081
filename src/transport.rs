// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Config, ConfigError, Error, Message, NodeId, ParseError, Result};
use std::convert::TryFrom;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::trace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
// Well above the longest valid wire line.
const MAX_LINE: usize = 128;

/// Point-to-point delivery of protocol messages to peers by id. Sends are
/// synchronous; a failed send is reported to the caller and not retried
/// beyond whatever the implementation does internally.
pub trait Transport: Send + Sync {
    fn send(&self, to: NodeId, message: &Message) -> Result<()>;
}

/// Where everything listens: node `i` on `base_port + i`, the monitor on
/// its own fixed port, all on one host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Addressing {
    pub host: IpAddr,
    pub base_port: u16,
    pub monitor_port: u16,
}

impl Addressing {
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Addressing {
            host: config.host_addr()?,
            base_port: config.base_port,
            monitor_port: config.monitor_port,
        })
    }

    pub fn node(&self, id: NodeId) -> std::result::Result<SocketAddr, ConfigError> {
        let overflow = || ConfigError::PortOverflow {
            id,
            base: self.base_port,
        };
        let offset = u16::try_from(id).map_err(|_| overflow())?;
        let port = self.base_port.checked_add(offset).ok_or_else(overflow)?;
        Ok(SocketAddr::new(self.host, port))
    }

    pub fn monitor(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.monitor_port)
    }
}

/// Writes one message as one line on a fresh connection.
pub fn write_line(addr: SocketAddr, line: &str) -> std::io::Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    writeln!(stream, "{}", line)?;
    stream.flush()
}

/// Reads the single message carried by an inbound connection. `Ok(None)`
/// means the peer connected and hung up without writing anything.
pub fn read_message(stream: &TcpStream) -> Result<Option<Message>> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut line = String::new();
    let n = BufReader::new(stream.take(MAX_LINE as u64)).read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if n == MAX_LINE && !line.ends_with('\n') {
        return Err(ParseError::TooLong(MAX_LINE).into());
    }
    Ok(Some(line.parse()?))
}

/// The one-connection-per-message TCP transport.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    addressing: Addressing,
    attempts: u32,
    backoff: Duration,
}

impl TcpTransport {
    pub fn new(addressing: Addressing) -> Self {
        TcpTransport {
            addressing,
            attempts: 1,
            backoff: Duration::from_millis(0),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(TcpTransport::new(Addressing::from_config(config)?)
            .with_retry(config.send_attempts, config.retry_backoff()))
    }

    /// Makes up to `attempts` tries per message, sleeping `backoff` between
    /// them. An `attempts` of zero is treated as one.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }
}

impl Transport for TcpTransport {
    fn send(&self, to: NodeId, message: &Message) -> Result<()> {
        let addr = self.addressing.node(to)?;
        let line = message.to_string();
        let mut attempt = 1;
        loop {
            match write_line(addr, &line) {
                Ok(()) => {
                    trace!("sent {:?} to {}", line, addr);
                    return Ok(());
                }
                Err(e) if attempt < self.attempts => {
                    trace!("attempt {} sending to {} failed: {}", attempt, addr, e);
                    attempt += 1;
                    thread::sleep(self.backoff);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}
