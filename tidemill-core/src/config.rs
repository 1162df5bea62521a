use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Master declares a container dead after `interval * timeout_multiplier` of silence.
    pub timeout_multiplier: u32,
    /// Container terminates itself after `interval * watchdog_multiplier` without a
    /// successful heartbeat.
    pub watchdog_multiplier: u32,
}

impl HeartbeatConfig {
    pub fn timeout(&self) -> Duration {
        self.interval * self.timeout_multiplier
    }

    pub fn watchdog(&self) -> Duration {
        self.interval * self.watchdog_multiplier
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout_multiplier: 3,
            watchdog_multiplier: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// `None` disables the periodic generator; windows are then stepped manually.
    pub window_size: Option<Duration>,
    /// How long a window may stay open before the clock reports a stall.
    pub stall_deadline: Duration,
}

impl WindowConfig {
    pub fn manual() -> Self {
        Self {
            window_size: None,
            ..Self::default()
        }
    }

    pub fn periodic(window_size: Duration) -> Self {
        Self {
            window_size: Some(window_size),
            ..Self::default()
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: Some(Duration::from_millis(500)),
            stall_deadline: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub heartbeat: HeartbeatConfig,
    pub window: WindowConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoints retained per operator; the most recent is never retired early.
    pub retained: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { retained: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    pub heartbeat: HeartbeatConfig,
    pub container: ContainerConfig,
    /// Redeployments allowed per operator after operator faults before it is failed permanently.
    pub max_operator_retries: u32,
    pub num_containers: usize,
}

impl MasterConfig {
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.container.heartbeat = heartbeat.clone();
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.container.window = window;
        self
    }

    pub fn with_num_containers(mut self, num_containers: usize) -> Self {
        self.num_containers = num_containers;
        self
    }

    pub fn with_max_operator_retries(mut self, retries: u32) -> Self {
        self.max_operator_retries = retries;
        self
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            container: ContainerConfig::default(),
            max_operator_retries: 3,
            num_containers: 1,
        }
    }
}
