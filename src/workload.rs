// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Config, ConfigError, Monitor, NodeId, Request};
use rand::Rng;
use std::thread;
use std::time::Duration;

/// The simulated work a node does while it holds the resource: it prints a
/// random number of consecutive values, starting at its request's
/// timestamp, to the monitor, pausing after each one. Bounding the count
/// bounds the time spent holding the resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    min: u64,
    max: u64,
    pause: Duration,
}

impl Workload {
    pub fn new(min: u64, max: u64, pause: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::EmptyWorkload { min, max });
        }
        Ok(Workload { min, max, pause })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Workload::new(config.workload_min, config.workload_max, config.pause())
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min..=self.max)
    }

    /// Runs the critical section for `request` and returns how many values
    /// were printed. Must only be called while holding the resource.
    pub fn run<R: Rng>(
        &self,
        rng: &mut R,
        node: NodeId,
        request: Request,
        monitor: &dyn Monitor,
    ) -> u64 {
        let k = self.draw(rng);
        monitor.report(&format!(
            "[node {}] --- entering critical section, printing {} values ---",
            node, k
        ));
        for i in 0..k {
            let value = request.timestamp.saturating_add(i);
            monitor.report(&format!("[node {}] value {}", node, value));
            thread::sleep(self.pause);
        }
        monitor.report(&format!("[node {}] ___ leaving critical section ___", node));
        k
    }
}
