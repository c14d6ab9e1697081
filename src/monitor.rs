// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! The monitor is a passive log aggregator: nodes send it single lines of
//! text describing what they're doing, and it prints every line it gets.
//! Reporting is fire-and-forget; a node never waits on, or fails because
//! of, the monitor.

use crate::transport::write_line;
use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// Somewhere to send progress lines.
pub trait Monitor: Send + Sync {
    fn report(&self, line: &str);
}

/// Reports to a monitor server over TCP, one connection per line.
#[derive(Clone, Debug)]
pub struct MonitorClient {
    addr: SocketAddr,
}

impl MonitorClient {
    pub fn new(addr: SocketAddr) -> Self {
        MonitorClient { addr }
    }
}

impl Monitor for MonitorClient {
    fn report(&self, line: &str) {
        if let Err(e) = write_line(self.addr, line) {
            trace!("monitor at {} dropped {:?}: {}", self.addr, line, e);
        }
    }
}

/// Where the server puts the lines it receives.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

pub fn stdout_sink() -> LineSink {
    Arc::new(|line: &str| println!("[monitor] {}", line))
}

/// Accepts connections forever, each on its own thread. A connection may
/// carry any number of lines.
pub fn serve(listener: TcpListener, sink: LineSink) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let sink = Arc::clone(&sink);
                thread::spawn(move || drain(stream, sink));
            }
            Err(e) => debug!("monitor accept failed: {}", e),
        }
    }
}

fn drain(stream: TcpStream, sink: LineSink) {
    for line in BufReader::new(stream).lines() {
        match line {
            Ok(line) => sink(&line),
            Err(e) => {
                debug!("monitor connection failed: {}", e);
                return;
            }
        }
    }
}

/// Starts the monitor on its own thread. Failing to bind is fatal for the
/// monitor thread only: it logs and exits, and nobody restarts it.
pub fn spawn_monitor(addr: SocketAddr, sink: LineSink) -> JoinHandle<()> {
    thread::spawn(move || match TcpListener::bind(addr) {
        Ok(listener) => {
            info!("monitor listening on {}", addr);
            serve(listener, sink);
        }
        Err(e) => error!("monitor cannot listen on {}: {}", addr, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    fn recording() -> (LineSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&lines);
        let sink: LineSink = Arc::new(move |s: &str| l.lock().push(s.to_string()));
        (sink, lines)
    }

    fn wait_for(lines: &Mutex<Vec<String>>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while lines.lock().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn collects_lines_from_many_senders() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let (sink, lines) = recording();
        thread::spawn(move || serve(listener, sink));

        let senders: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || MonitorClient::new(addr).report(&format!("hello {}", i)))
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }
        // One connection carrying two lines.
        let mut stream = TcpStream::connect(addr).unwrap();
        writeln!(stream, "first\nsecond").unwrap();
        drop(stream);

        wait_for(&lines, 10);
        let mut got = lines.lock().clone();
        got.sort();
        assert_eq!(got.len(), 10);
        assert!(got.contains(&"hello 7".to_string()));
        assert!(got.contains(&"first".to_string()));
        assert!(got.contains(&"second".to_string()));
    }

    #[test]
    fn reporting_to_nobody_is_harmless() {
        let addr = {
            let l = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            l.local_addr().unwrap()
        };
        MonitorClient::new(addr).report("into the void");
    }
}
