// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Running `Node`s for real: a lock around each node's protocol state, a
//! listener feeding inbound messages into it, and a driver loop that
//! periodically wants the resource, waits for it, uses it and gives it back.

use crate::monitor::{spawn_monitor, stdout_sink};
use crate::transport::read_message;
use crate::{
    Addressing, Config, Envelope, Message, Monitor, MonitorClient, Node, NodeId, NodeState,
    Request, Result, TcpTransport, Transport, Workload,
};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Timing and workload of the driver loop.
#[derive(Clone, Debug)]
pub struct Driver {
    pub think_interval: Duration,
    pub request_probability: f64,
    pub workload: Workload,
}

impl Driver {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Driver {
            think_interval: config.think_interval(),
            request_probability: config.request_probability,
            workload: Workload::from_config(config)?,
        })
    }
}

struct Shared {
    node: Mutex<Node>,
    // Signalled whenever an inbound message has been applied.
    changed: Condvar,
    transport: Arc<dyn Transport>,
    monitor: Arc<dyn Monitor>,
}

/// A running node. Every read or write of the protocol state happens under
/// one lock, and the lock is never held across I/O or sleeps: outgoing
/// messages are collected under the lock and sent after releasing it.
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    shared: Arc<Shared>,
}

impl NodeHandle {
    pub fn new(node: Node, transport: Arc<dyn Transport>, monitor: Arc<dyn Monitor>) -> Self {
        NodeHandle {
            id: node.id(),
            shared: Arc::new(Shared {
                node: Mutex::new(node),
                changed: Condvar::new(),
                transport,
                monitor,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// A copy of the protocol state as of now.
    pub fn snapshot(&self) -> Node {
        self.shared.node.lock().clone()
    }

    pub fn report(&self, line: &str) {
        self.shared.monitor.report(line);
    }

    fn dispatch(&self, outgoing: Vec<Envelope>) {
        for env in outgoing {
            if let Err(e) = self.shared.transport.send(env.to, &env.message) {
                warn!("node {} dropped {} for node {}: {}", self.id, env.message, env.to, e);
                self.report(&format!(
                    "[node {}] failed to send {} to node {}: {}",
                    self.id, env.message, env.to, e
                ));
            }
        }
    }

    /// Applies one inbound message. Messages from outside the system or from
    /// this node itself, and requests with runaway timestamps, are rejected
    /// untouched.
    pub fn deliver(&self, message: Message) -> Result<()> {
        let mut outgoing = Vec::new();
        {
            let mut node = self.shared.node.lock();
            node.check_inbound(&message)?;
            node.receive(&message, &mut outgoing);
        }
        self.shared.changed.notify_all();
        self.dispatch(outgoing);
        Ok(())
    }

    /// Broadcasts a request and blocks until every peer has replied. The
    /// lock is released while waiting, so peers' requests keep being
    /// answered or deferred.
    pub fn acquire(&self) -> Result<Request> {
        let mut outgoing = Vec::new();
        let req = self.shared.node.lock().request(&mut outgoing)?;
        self.dispatch(outgoing);
        let mut node = self.shared.node.lock();
        while node.state() != NodeState::InCs {
            self.shared.changed.wait(&mut node);
        }
        debug!("node {} granted {}", self.id, req);
        Ok(req)
    }

    /// Gives the resource back, answering every deferred peer.
    pub fn release(&self) -> Result<Request> {
        let mut outgoing = Vec::new();
        let req = self.shared.node.lock().exit(&mut outgoing)?;
        self.dispatch(outgoing);
        Ok(req)
    }

    /// Acquires, runs `workload`, releases. Returns the number of values the
    /// workload printed.
    pub fn run_critical_section<R: Rng>(&self, workload: &Workload, rng: &mut R) -> Result<u64> {
        let req = self.acquire()?;
        let k = workload.run(rng, self.id, req, &*self.shared.monitor);
        self.release()?;
        Ok(k)
    }

    /// One decision of the driver loop: maybe want the resource, and if so
    /// use it. Returns the workload size if the resource was used.
    pub fn step<R: Rng>(&self, driver: &Driver, rng: &mut R) -> Result<Option<u64>> {
        if rng.gen_bool(driver.request_probability) {
            Ok(Some(self.run_critical_section(&driver.workload, rng)?))
        } else {
            self.report(&format!("[node {}] does not want the resource", self.id));
            Ok(None)
        }
    }

    /// The driver loop. Only returns on an error, which means a bug.
    pub fn run<R: Rng>(&self, driver: &Driver, rng: &mut R) -> Result<()> {
        loop {
            thread::sleep(driver.think_interval);
            self.step(driver, rng)?;
        }
    }

    /// Handles one inbound connection, which carries one message.
    pub fn accept(&self, stream: TcpStream) {
        let result = match read_message(&stream) {
            Ok(Some(message)) => {
                trace!("node {} received {}", self.id, message);
                self.deliver(message)
            }
            Ok(None) => {
                trace!("node {} got an empty connection", self.id);
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("node {} discarded inbound message: {}", self.id, e);
            self.report(&format!("[node {}] discarded inbound message: {}", self.id, e));
        }
    }
}

/// Accepts connections forever, handling each on its own thread.
pub fn serve(listener: TcpListener, handle: NodeHandle) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handle = handle.clone();
                thread::spawn(move || handle.accept(stream));
            }
            Err(e) => warn!("node {} accept failed: {}", handle.id(), e),
        }
    }
}

/// Binds `addr` and serves `handle` on a background thread.
pub fn listen(handle: &NodeHandle, addr: SocketAddr) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)?;
    info!("node {} listening on {}", handle.id(), addr);
    handle.report(&format!("[node {}] listening on {}", handle.id(), addr));
    let handle = handle.clone();
    Ok(thread::spawn(move || serve(listener, handle)))
}

/// Starts node `id` of the configured system on its own thread: listener
/// first, then the driver loop. If the listener can't bind, the node thread
/// logs it and ends; nothing restarts it.
pub fn spawn_node(config: &Config, id: NodeId) -> Result<JoinHandle<()>> {
    let addressing = Addressing::from_config(config)?;
    let addr = addressing.node(id)?;
    let driver = Driver::from_config(config)?;
    let handle = NodeHandle::new(
        Node::new(id, config.nodes)?,
        Arc::new(TcpTransport::from_config(config)?),
        Arc::new(MonitorClient::new(addressing.monitor())),
    );
    let thread = thread::Builder::new()
        .name(format!("node-{}", id))
        .spawn(move || {
            if let Err(e) = listen(&handle, addr) {
                error!("node {} cannot listen on {}: {}", id, addr, e);
                handle.report(&format!("[node {}] cannot listen on {}: {}", id, addr, e));
                return;
            }
            let mut rng = StdRng::from_entropy();
            if let Err(e) = handle.run(&driver, &mut rng) {
                error!("node {} stopped: {}", id, e);
            }
        })?;
    Ok(thread)
}

/// Starts the monitor, gives it a moment to come up, then starts every
/// node, and waits on them all (which, short of failures, is forever).
pub fn launch(config: &Config) -> Result<()> {
    config.validate()?;
    let addressing = Addressing::from_config(config)?;
    let monitor = spawn_monitor(addressing.monitor(), stdout_sink());
    thread::sleep(config.monitor_startup());
    let nodes = (0..config.nodes)
        .map(|id| spawn_node(config, id))
        .collect::<Result<Vec<_>>>()?;
    for (id, node) in nodes.into_iter().enumerate() {
        if node.join().is_err() {
            error!("node {} panicked", id);
        }
    }
    if monitor.join().is_err() {
        error!("monitor panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Delivers straight into the addressee's handle, on the sender's thread.
    #[derive(Default)]
    struct Loopback {
        handles: RwLock<Vec<NodeHandle>>,
    }

    impl Transport for Loopback {
        fn send(&self, to: NodeId, message: &Message) -> Result<()> {
            let target = self.handles.read().get(to).cloned();
            match target {
                Some(h) => h.deliver(*message),
                None => Err(Error::UnknownNode {
                    id: to,
                    nodes: self.handles.read().len(),
                }),
            }
        }
    }

    /// Tracks how many nodes are between "entering" and "leaving" at once.
    #[derive(Default)]
    struct Occupancy {
        inside: AtomicUsize,
        most: AtomicUsize,
        entries: AtomicUsize,
    }

    impl Monitor for Occupancy {
        fn report(&self, line: &str) {
            if line.contains("entering critical section") {
                let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
                self.most.fetch_max(now, Ordering::SeqCst);
                self.entries.fetch_add(1, Ordering::SeqCst);
            } else if line.contains("leaving critical section") {
                self.inside.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn cluster(n: usize, monitor: Arc<Occupancy>) -> Vec<NodeHandle> {
        let net = Arc::new(Loopback::default());
        let handles: Vec<NodeHandle> = (0..n)
            .map(|id| {
                NodeHandle::new(Node::new(id, n).unwrap(), net.clone(), monitor.clone())
            })
            .collect();
        *net.handles.write() = handles.clone();
        handles
    }

    #[test]
    fn lone_node_is_granted_immediately() {
        let handles = cluster(1, Arc::new(Occupancy::default()));
        let req = handles[0].acquire().unwrap();
        assert_eq!(req, Request::new(1, 0));
        assert_eq!(handles[0].snapshot().state(), NodeState::InCs);
        assert_eq!(handles[0].release().unwrap(), req);
        assert_eq!(handles[0].snapshot().state(), NodeState::Idle);
    }

    #[test]
    fn contending_threads_never_overlap() {
        let monitor = Arc::new(Occupancy::default());
        let handles = cluster(4, monitor.clone());
        let workload = Workload::new(1, 3, Duration::from_millis(1)).unwrap();
        let rounds = 5;
        let threads: Vec<_> = handles
            .iter()
            .cloned()
            .map(|h| {
                let workload = workload.clone();
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(h.id() as u64);
                    for _ in 0..rounds {
                        h.run_critical_section(&workload, &mut rng).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(monitor.most.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.entries.load(Ordering::SeqCst), 4 * rounds);
        for h in &handles {
            let node = h.snapshot();
            assert_eq!(node.grants(), rounds as u64);
            assert_eq!(node.state(), NodeState::Idle);
            assert!(node.deferred().is_empty());
            assert_eq!(node.pending(), None);
        }
    }

    #[test]
    fn bogus_senders_are_rejected() {
        let handles = cluster(2, Arc::new(Occupancy::default()));
        assert!(matches!(
            handles[0].deliver(Message::Reply { from: 9 }),
            Err(Error::UnknownNode { id: 9, nodes: 2 })
        ));
        assert!(matches!(
            handles[0].deliver(Message::Request { timestamp: 3, from: 0 }),
            Err(Error::FromSelf(0))
        ));
        assert!(matches!(
            handles[0].deliver(Message::Request { timestamp: u64::MAX, from: 1 }),
            Err(Error::TimestampOutOfRange { from: 1, .. })
        ));
        // None of them touched the clock or the quorum, and the node can
        // still request.
        let node = handles[0].snapshot();
        assert_eq!(node.now(), 0);
        assert!(node.quorum().is_empty());
        assert_eq!(handles[0].acquire().unwrap(), Request::new(1, 0));
    }

    #[test]
    fn release_without_acquire_is_misuse() {
        let handles = cluster(2, Arc::new(Occupancy::default()));
        assert!(matches!(
            handles[1].release(),
            Err(Error::InvalidTransition { id: 1, op: "exit", state: NodeState::Idle })
        ));
    }

    #[test]
    fn step_respects_probability() {
        let monitor = Arc::new(Occupancy::default());
        let handles = cluster(2, monitor.clone());
        let mut driver = Driver {
            think_interval: Duration::from_millis(0),
            request_probability: 0.0,
            workload: Workload::new(2, 2, Duration::from_millis(0)).unwrap(),
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(handles[0].step(&driver, &mut rng).unwrap(), None);
        driver.request_probability = 1.0;
        assert_eq!(handles[0].step(&driver, &mut rng).unwrap(), Some(2));
        assert_eq!(monitor.entries.load(Ordering::SeqCst), 1);
    }
}
