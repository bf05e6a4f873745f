//! Configuration system for the core.
//!
//! This module defines every knob governing queue sizes, port/FU
//! topology, commit discipline, memory-dependence policy, fusion mode,
//! repeater, and the deadlock watchdog threshold. Configuration is
//! supplied as JSON (an embedder builds `Config` however it likes — CLI
//! parsing is the embedder's job, not the core's) or via `Config::default()`.

use serde::Deserialize;

/// Baseline knob values used when a field is omitted from the supplied
/// JSON.
mod defaults {
    /// In-flight Mop capacity of the reorder buffer.
    pub const ROB_SIZE: usize = 128;
    /// In-flight load capacity.
    pub const LDQ_SIZE: usize = 48;
    /// In-flight store capacity (covers both the live and senior regions).
    pub const STQ_SIZE: usize = 48;
    /// Number of execution ports.
    pub const NUM_EXEC_PORTS: usize = 6;
    /// IO-DPM payload pipe depth (AGEN / DL1-STQ / writeback-select).
    pub const PAYLOAD_DEPTH: usize = 3;
    /// IO-DPM commit buffer depth.
    pub const COMMIT_BUFFER_SIZE: usize = 32;
    /// Max uops retired per cycle.
    pub const COMMIT_WIDTH: usize = 4;
    /// Max branches retired per cycle.
    pub const BRANCH_LIMIT: usize = 2;
    /// Cycles a delayed jeclear waits before firing (0 = immediate).
    pub const JECLEAR_DELAY: u64 = 0;
    /// Extra latency added to FP-class functional units.
    pub const FP_PENALTY: u64 = 2;
    /// Cycles with no completion before the deadlock watchdog trips.
    pub const DEADLOCK_THRESHOLD: u64 = 10_000;
    /// Cycles the watchdog flag must stay set before `Core` forces a
    /// pipe-flush on the oldest live Mop.
    pub const DEADLOCK_GRACE_PERIOD: u64 = 256;
    /// Default per-FU-class pipeline latency.
    pub const FU_LATENCY: u64 = 1;
    /// Default per-FU-class issue rate (cycles between consecutive issues).
    pub const FU_ISSUE_RATE: u64 = 1;
    /// Default magic-FU (profiling marker) latency.
    pub const MAGIC_LATENCY: u64 = 1;
}

/// Which scheduling discipline the execute/commit stages use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Backend {
    /// Fixed-stage payload pipes, in-program-order issue (`can_issue_IO`).
    #[default]
    IoDpm,
    /// Reservation-station-style age-ordered ready lists, min-heap ALU pipes.
    Stm,
}

/// Memory-dependence prediction policy consulted by
/// `check_load_issue_conditions` when a store's address is unknown
/// (the STA-unknown case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemDepPolicy {
    /// Never speculate past an unresolved store address — always stall.
    #[default]
    Conservative,
    /// Always speculate that the unresolved store does not alias.
    AlwaysSpeculate,
    /// Simple per-PC store-set predictor (allow/deny history).
    StoreSet,
}

/// A functional-unit class a uop may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FuClass {
    Int,
    Load,
    Store,
    Fp,
    Branch,
    /// Single-slot unit reserved for profiling-marker Mops.
    Magic,
}

/// Every [`FuClass`] variant, in a fixed order — the full crossbar a
/// port falls back to when `ExecConfig::port_bindings` doesn't name it.
pub const ALL_FU_CLASSES: [FuClass; 6] = [
    FuClass::Int,
    FuClass::Load,
    FuClass::Store,
    FuClass::Fp,
    FuClass::Branch,
    FuClass::Magic,
];

/// Per-FU-class timing: pipeline latency and issue throttling.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FuConfig {
    /// Cycles from issue to completion.
    #[serde(default = "FuConfig::default_latency")]
    pub latency: u64,
    /// Minimum cycles between two issues to the same FU instance
    /// (models non-pipelined/throttled units).
    #[serde(default = "FuConfig::default_issue_rate")]
    pub issue_rate: u64,
    /// How many independent pipes of this class each port hosts.
    #[serde(default = "FuConfig::default_capacity")]
    pub capacity: usize,
}

impl FuConfig {
    fn default_latency() -> u64 {
        defaults::FU_LATENCY
    }
    fn default_issue_rate() -> u64 {
        defaults::FU_ISSUE_RATE
    }
    fn default_capacity() -> usize {
        1
    }
}

impl Default for FuConfig {
    fn default() -> Self {
        Self {
            latency: defaults::FU_LATENCY,
            issue_rate: defaults::FU_ISSUE_RATE,
            capacity: 1,
        }
    }
}

/// ROB / LDQ / STQ sizing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "QueueConfig::default_rob")]
    pub rob_size: usize,
    #[serde(default = "QueueConfig::default_ldq")]
    pub ldq_size: usize,
    #[serde(default = "QueueConfig::default_stq")]
    pub stq_size: usize,
}

impl QueueConfig {
    fn default_rob() -> usize {
        defaults::ROB_SIZE
    }
    fn default_ldq() -> usize {
        defaults::LDQ_SIZE
    }
    fn default_stq() -> usize {
        defaults::STQ_SIZE
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rob_size: defaults::ROB_SIZE,
            ldq_size: defaults::LDQ_SIZE,
            stq_size: defaults::STQ_SIZE,
        }
    }
}

/// Repeater (HELIX critical-section memory) configuration.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct RepeaterConfig {
    /// When false, `is_repeated` accesses fall straight through to DL1.
    #[serde(default)]
    pub enabled: bool,
    /// When true, a repeatable access also races a parallel DL1 request;
    /// the loser is dropped via `action_id` mismatch.
    #[serde(default)]
    pub race_dl1: bool,
}

/// Fusion-rule bitfield controlling which adjacent uop pairs the oracle
/// is allowed to fuse at decode.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "FusionConfig::default_true")]
    pub load_op: bool,
    #[serde(default = "FusionConfig::default_true")]
    pub op_store: bool,
    #[serde(default)]
    pub load_op_store: bool,
}

impl FusionConfig {
    fn default_true() -> bool {
        true
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            load_op: true,
            op_store: true,
            load_op_store: false,
        }
    }
}

/// Execute-stage configuration: ports, per-class FU timing, and the
/// LDQ/STQ policies that shape scheduling.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "ExecConfig::default_ports")]
    pub num_exec_ports: usize,
    /// IO-DPM payload pipe depth; unused by the STM backend.
    #[serde(default = "ExecConfig::default_payload_depth")]
    pub payload_depth: usize,
    /// IO-DPM commit-buffer depth; unused by the STM backend.
    #[serde(default = "ExecConfig::default_commit_buffer")]
    pub commit_buffer_size: usize,

    #[serde(default = "ExecConfig::default_int")]
    pub int: FuConfig,
    #[serde(default = "ExecConfig::default_load")]
    pub load: FuConfig,
    #[serde(default = "ExecConfig::default_store")]
    pub store: FuConfig,
    #[serde(default = "ExecConfig::default_fp")]
    pub fp: FuConfig,
    #[serde(default = "ExecConfig::default_branch")]
    pub branch: FuConfig,
    #[serde(default = "ExecConfig::default_magic")]
    pub magic: FuConfig,

    /// Extra cycles added to `fp`'s latency (kept distinct from
    /// `fp.latency` so a profile can tune the penalty independently).
    #[serde(default = "ExecConfig::default_fp_penalty")]
    pub fp_penalty: u64,

    #[serde(default)]
    pub memdep: MemDepPolicy,

    /// When true, a load that hit the partial-forward stall waits for
    /// the blocking store to retire rather than re-probing the STQ
    /// every cycle (`throttle_partial = true` means *do* throttle).
    #[serde(default = "ExecConfig::default_true")]
    pub throttle_partial: bool,

    #[serde(default)]
    pub repeater: RepeaterConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    /// Per-port FU-class bindings (§4.2/§4.3): `port_bindings[i]` lists
    /// the classes port `i` may host. A port whose index has no entry
    /// here (including every port, by default) falls back to
    /// [`ALL_FU_CLASSES`] — a full crossbar, matching this field's
    /// absence from a config file.
    #[serde(default)]
    pub port_bindings: Vec<Vec<FuClass>>,
}

impl ExecConfig {
    fn default_ports() -> usize {
        defaults::NUM_EXEC_PORTS
    }
    fn default_payload_depth() -> usize {
        defaults::PAYLOAD_DEPTH
    }
    fn default_commit_buffer() -> usize {
        defaults::COMMIT_BUFFER_SIZE
    }
    fn default_int() -> FuConfig {
        FuConfig {
            latency: 1,
            issue_rate: 1,
            capacity: 2,
        }
    }
    fn default_load() -> FuConfig {
        FuConfig {
            latency: 2,
            issue_rate: 1,
            capacity: 2,
        }
    }
    fn default_store() -> FuConfig {
        FuConfig {
            latency: 1,
            issue_rate: 1,
            capacity: 1,
        }
    }
    fn default_fp() -> FuConfig {
        FuConfig {
            latency: 4,
            issue_rate: 1,
            capacity: 1,
        }
    }
    fn default_branch() -> FuConfig {
        FuConfig {
            latency: 1,
            issue_rate: 1,
            capacity: 1,
        }
    }
    fn default_magic() -> FuConfig {
        FuConfig {
            latency: defaults::MAGIC_LATENCY,
            issue_rate: 1,
            capacity: 1,
        }
    }
    fn default_fp_penalty() -> u64 {
        defaults::FP_PENALTY
    }
    fn default_true() -> bool {
        true
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            num_exec_ports: defaults::NUM_EXEC_PORTS,
            payload_depth: defaults::PAYLOAD_DEPTH,
            commit_buffer_size: defaults::COMMIT_BUFFER_SIZE,
            int: Self::default_int(),
            load: Self::default_load(),
            store: Self::default_store(),
            fp: Self::default_fp(),
            branch: Self::default_branch(),
            magic: Self::default_magic(),
            fp_penalty: defaults::FP_PENALTY,
            memdep: MemDepPolicy::default(),
            throttle_partial: true,
            repeater: RepeaterConfig::default(),
            fusion: FusionConfig::default(),
            port_bindings: Vec::new(),
        }
    }
}

/// Commit-stage discipline.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CommitConfig {
    #[serde(default = "CommitConfig::default_width")]
    pub width: usize,
    #[serde(default = "CommitConfig::default_branch_limit")]
    pub branch_limit: usize,
    #[serde(default = "CommitConfig::default_jeclear_delay")]
    pub jeclear_delay: u64,
}

impl CommitConfig {
    fn default_width() -> usize {
        defaults::COMMIT_WIDTH
    }
    fn default_branch_limit() -> usize {
        defaults::BRANCH_LIMIT
    }
    fn default_jeclear_delay() -> u64 {
        defaults::JECLEAR_DELAY
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            width: defaults::COMMIT_WIDTH,
            branch_limit: defaults::BRANCH_LIMIT,
            jeclear_delay: defaults::JECLEAR_DELAY,
        }
    }
}

/// Root configuration structure for one core.
///
/// # Examples
///
/// ```
/// use zpipe_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.queues.rob_size, 128);
/// assert_eq!(config.commit.branch_limit, 2);
/// ```
///
/// ```
/// use zpipe_core::config::{Backend, Config};
///
/// let json = r#"{
///     "backend": "Stm",
///     "queues": { "rob_size": 192, "ldq_size": 64, "stq_size": 64 },
///     "commit": { "width": 6, "branch_limit": 1, "jeclear_delay": 3 },
///     "deadlock_threshold": 20000
/// }"#;
///
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.backend, Backend::Stm);
/// assert_eq!(config.queues.rob_size, 192);
/// assert_eq!(config.commit.jeclear_delay, 3);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default = "Config::default_deadlock_threshold")]
    pub deadlock_threshold: u64,
    /// See [`defaults::DEADLOCK_GRACE_PERIOD`].
    #[serde(default = "Config::default_deadlock_grace_period")]
    pub deadlock_grace_period: u64,
}

impl Config {
    fn default_deadlock_threshold() -> u64 {
        defaults::DEADLOCK_THRESHOLD
    }
    fn default_deadlock_grace_period() -> u64 {
        defaults::DEADLOCK_GRACE_PERIOD
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            queues: QueueConfig::default(),
            exec: ExecConfig::default(),
            commit: CommitConfig::default(),
            deadlock_threshold: defaults::DEADLOCK_THRESHOLD,
            deadlock_grace_period: defaults::DEADLOCK_GRACE_PERIOD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let c = Config::default();
        assert_eq!(c.backend, Backend::IoDpm);
        assert_eq!(c.queues.rob_size, 128);
        assert_eq!(c.exec.num_exec_ports, 6);
        assert_eq!(c.commit.width, 4);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{ "commit": { "width": 8 } }"#;
        let c: Config = serde_json::from_str(json).unwrap();
        assert_eq!(c.commit.width, 8);
        assert_eq!(c.commit.branch_limit, 2); // default, unaffected
        assert_eq!(c.queues.rob_size, 128); // default, unaffected
    }
}
