// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Configuration for a simulated cluster: how many nodes, where they listen,
//! and the timing of the driver loop and critical-section workload.
//!
//! Defaults can be overridden by a JSON file named in `RICART_CONFIG`, and
//! the node count by the single command-line argument.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV: &str = "RICART_CONFIG";

mod defaults {
    pub fn nodes() -> usize { 6 }
    pub fn host() -> String { "127.0.0.1".to_string() }
    pub fn base_port() -> u16 { 5000 }
    pub fn monitor_port() -> u16 { 6000 }

    // Driver loop.
    pub fn think_interval_millis() -> u64 { 2000 }
    pub fn request_probability() -> f64 { 0.5 }

    // Critical-section workload.
    pub fn workload_min() -> u64 { 1 }
    pub fn workload_max() -> u64 { 10 }
    pub fn pause_millis() -> u64 { 500 }

    // Bootstrap and transport.
    pub fn monitor_startup_millis() -> u64 { 1000 }
    pub fn send_attempts() -> u32 { 1 }
    pub fn retry_backoff_millis() -> u64 { 100 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of nodes in the system.
    #[serde(default = "defaults::nodes")]
    pub nodes: usize,
    /// Address every node and the monitor listen on.
    #[serde(default = "defaults::host")]
    pub host: String,
    /// Node `i` listens on `base_port + i`.
    #[serde(default = "defaults::base_port")]
    pub base_port: u16,
    #[serde(default = "defaults::monitor_port")]
    pub monitor_port: u16,
    /// Period between a node's decisions to want the resource (milliseconds)
    #[serde(default = "defaults::think_interval_millis")]
    pub think_interval_millis: u64,
    /// Chance of wanting the resource at each decision.
    #[serde(default = "defaults::request_probability")]
    pub request_probability: f64,
    /// Bounds on the number of values printed per critical section.
    #[serde(default = "defaults::workload_min")]
    pub workload_min: u64,
    #[serde(default = "defaults::workload_max")]
    pub workload_max: u64,
    /// Pause after each printed value (milliseconds)
    #[serde(default = "defaults::pause_millis")]
    pub pause_millis: u64,
    /// Delay between starting the monitor and starting nodes (milliseconds)
    #[serde(default = "defaults::monitor_startup_millis")]
    pub monitor_startup_millis: u64,
    /// Total tries per outgoing message; 1 means no retry.
    #[serde(default = "defaults::send_attempts")]
    pub send_attempts: u32,
    #[serde(default = "defaults::retry_backoff_millis")]
    pub retry_backoff_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            nodes: defaults::nodes(),
            host: defaults::host(),
            base_port: defaults::base_port(),
            monitor_port: defaults::monitor_port(),
            think_interval_millis: defaults::think_interval_millis(),
            request_probability: defaults::request_probability(),
            workload_min: defaults::workload_min(),
            workload_max: defaults::workload_max(),
            pause_millis: defaults::pause_millis(),
            monitor_startup_millis: defaults::monitor_startup_millis(),
            send_attempts: defaults::send_attempts(),
            retry_backoff_millis: defaults::retry_backoff_millis(),
        }
    }
}

/// Parses the node-count argument: a positive integer.
pub fn parse_node_count(arg: &str) -> Result<usize, ConfigError> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::BadNodeCount(arg.to_string())),
    }
}

impl Config {
    /// Defaults, overlaid with the file named in `RICART_CONFIG` if set.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Config::from_file(PathBuf::from(path)),
            None => Ok(Config::default()),
        }
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) => return Err(ConfigError::File { path, source }),
        };
        Config::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies the command-line arguments (at most a node count) and
    /// validates the result.
    pub fn with_args<S: AsRef<str>>(mut self, args: &[S]) -> Result<Self, ConfigError> {
        match args {
            [] => (),
            [count] => self.nodes = parse_node_count(count.as_ref())?,
            [_, extra, ..] => {
                return Err(ConfigError::UnexpectedArgument(extra.as_ref().to_string()))
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes == 0 {
            return Err(ConfigError::BadNodeCount(self.nodes.to_string()));
        }
        if self.workload_min == 0 || self.workload_min > self.workload_max {
            return Err(ConfigError::EmptyWorkload {
                min: self.workload_min,
                max: self.workload_max,
            });
        }
        if !(0.0..=1.0).contains(&self.request_probability) {
            return Err(ConfigError::BadProbability(self.request_probability));
        }
        if self.send_attempts == 0 {
            return Err(ConfigError::NoSendAttempts);
        }
        let last = self.nodes - 1;
        if last > usize::from(u16::MAX - self.base_port) {
            return Err(ConfigError::PortOverflow {
                id: last,
                base: self.base_port,
            });
        }
        if let Some(offset) = self.monitor_port.checked_sub(self.base_port) {
            if usize::from(offset) <= last {
                return Err(ConfigError::PortClash {
                    id: usize::from(offset),
                    port: self.monitor_port,
                });
            }
        }
        self.host_addr()?;
        Ok(())
    }

    pub fn host_addr(&self) -> Result<IpAddr, ConfigError> {
        self.host
            .parse()
            .map_err(|_| ConfigError::BadHost(self.host.clone()))
    }

    // Duration getters
    pub fn think_interval(&self) -> Duration { Duration::from_millis(self.think_interval_millis) }
    pub fn pause(&self) -> Duration { Duration::from_millis(self.pause_millis) }
    pub fn monitor_startup(&self) -> Duration { Duration::from_millis(self.monitor_startup_millis) }
    pub fn retry_backoff(&self) -> Duration { Duration::from_millis(self.retry_backoff_millis) }
}
