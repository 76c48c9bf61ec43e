// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Runtime tuning for the adapter. Everything here lives outside the NBD
/// protocol; the kernel never sees these values.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Shared worker pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Session teardown behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Sizing of the process-wide worker pool.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PoolConfig {
    #[serde(rename = "Workers")]
    /// Number of executor tasks servicing requests.
    pub workers: usize,

    #[serde(rename = "QueueDepth")]
    /// Slots in the submission queue; a full queue falls back to inline
    /// execution on the ingress task.
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 32,
            queue_depth: 256,
        }
    }
}

/// Session teardown behavior.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ShutdownConfig {
    #[serde(rename = "DrainPollSecs", with = "serde_secs")]
    /// Interval between drain checks while waiting for outstanding
    /// requests to complete.
    pub drain_poll: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_poll: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.pool.workers >= 1, "Workers must be >= 1");
        ensure!(self.pool.queue_depth >= 1, "QueueDepth must be >= 1");
        ensure!(
            self.shutdown.drain_poll > Duration::ZERO,
            "DrainPollSecs must be > 0"
        );
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
