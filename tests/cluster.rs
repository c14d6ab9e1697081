// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ricart::runtime::serve;
use ricart::transport::write_line;
use ricart::{Addressing, Monitor, Node, NodeHandle, NodeState, TcpTransport, Workload};
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Every line reported, plus how many nodes were inside at once.
#[derive(Default)]
struct Recorder {
    lines: Mutex<Vec<String>>,
    inside: Mutex<(usize, usize)>,
}

impl Monitor for Recorder {
    fn report(&self, line: &str) {
        {
            let mut inside = self.inside.lock();
            if line.contains("entering critical section") {
                inside.0 += 1;
                inside.1 = inside.1.max(inside.0);
            } else if line.contains("leaving critical section") {
                inside.0 -= 1;
            }
        }
        self.lines.lock().push(line.to_string());
    }
}

impl Recorder {
    fn count(&self, needle: &str) -> usize {
        self.lines.lock().iter().filter(|l| l.contains(needle)).count()
    }

    fn most_inside(&self) -> usize {
        self.inside.lock().1
    }
}

/// Binds `n` consecutive loopback ports, moving the block until one is free.
fn bind_block(n: usize) -> (Addressing, Vec<TcpListener>) {
    let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let start = 20000 + (std::process::id() % 2000) as u16 * 16;
    for base_port in (start..60000).step_by(16) {
        let listeners: Vec<_> = (0..n)
            .map(|i| TcpListener::bind((host, base_port + i as u16)))
            .collect();
        if listeners.iter().all(|l| l.is_ok()) {
            let listeners = listeners.into_iter().filter_map(|l| l.ok()).collect();
            let addressing = Addressing {
                host,
                base_port,
                monitor_port: base_port + 15,
            };
            return (addressing, listeners);
        }
    }
    panic!("no free block of {} ports", n);
}

fn tcp_cluster(n: usize, monitor: Arc<Recorder>) -> (Addressing, Vec<NodeHandle>) {
    let (addressing, listeners) = bind_block(n);
    let transport = Arc::new(
        TcpTransport::new(addressing).with_retry(3, Duration::from_millis(20)),
    );
    let handles: Vec<NodeHandle> = (0..n)
        .map(|id| NodeHandle::new(Node::new(id, n).unwrap(), transport.clone(), monitor.clone()))
        .collect();
    for (listener, handle) in listeners.into_iter().zip(handles.iter().cloned()) {
        thread::spawn(move || serve(listener, handle));
    }
    (addressing, handles)
}

fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    f()
}

#[test]
fn nodes_take_turns_over_tcp() {
    let monitor = Arc::new(Recorder::default());
    let (_, handles) = tcp_cluster(3, monitor.clone());
    let workload = Workload::new(1, 3, Duration::from_millis(2)).unwrap();
    let rounds = 3;
    let threads: Vec<_> = handles
        .iter()
        .cloned()
        .map(|h| {
            let workload = workload.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + h.id() as u64);
                for _ in 0..rounds {
                    h.run_critical_section(&workload, &mut rng).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(monitor.most_inside(), 1);
    assert_eq!(monitor.count("entering critical section"), 3 * rounds);
    assert_eq!(monitor.count("failed to send"), 0);
    for h in &handles {
        let node = h.snapshot();
        assert_eq!(node.grants(), rounds as u64);
        assert_eq!(node.state(), NodeState::Idle);
        // Each node saw at least the other nodes' requests.
        assert!(node.now() >= rounds as u64);
    }
}

#[test]
fn garbage_on_the_wire_is_reported_and_ignored() {
    let monitor = Arc::new(Recorder::default());
    let (addressing, handles) = tcp_cluster(2, monitor.clone());
    let addr = addressing.node(0).unwrap();
    write_line(addr, "HELLO 1 2").unwrap();
    write_line(addr, "REQ 5 7").unwrap();
    assert!(wait_until(|| monitor.count("discarded inbound message") == 2));

    let node = handles[0].snapshot();
    assert_eq!(node.state(), NodeState::Idle);
    assert_eq!(node.now(), 0);

    // The node is still perfectly usable afterwards.
    let mut rng = StdRng::seed_from_u64(9);
    let workload = Workload::new(1, 1, Duration::from_millis(0)).unwrap();
    handles[0].run_critical_section(&workload, &mut rng).unwrap();
    assert_eq!(handles[0].snapshot().grants(), 1);
}
