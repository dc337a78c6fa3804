/*!
 * System Limits and Constants
 *
 * Fixed table sizes and datapath tuning constants. Table sizes match the
 * device's resource ceilings so ids returned by the hardware index directly
 * into the per-domain arrays.
 */

use std::time::Duration;

// =============================================================================
// DEVICE TABLES
// =============================================================================

/// Maximum number of devices in the process-wide registry
pub const MAX_NUM_DEVICES: usize = 32;

/// Scheduling domains per device
pub const MAX_NUM_DOMAINS: usize = 32;

/// Load-balanced ports per device (port ids are device-global)
pub const MAX_NUM_LDB_PORTS: usize = 64;

/// Directed ports per device
pub const MAX_NUM_DIR_PORTS: usize = 64;

/// Load-balanced queues per device
pub const MAX_NUM_LDB_QUEUES: usize = 32;

/// Directed queues per device (one per directed port)
pub const MAX_NUM_DIR_QUEUES: usize = MAX_NUM_DIR_PORTS;

/// Software credit pools per domain, per traffic type
pub const NUM_LDB_CREDIT_POOLS: usize = 64;
pub const NUM_DIR_CREDIT_POOLS: usize = 64;

/// Highest valid queue-to-port link priority
pub const MAX_LINK_PRIORITY: u8 = 7;

/// Atomic inflights reserved for each load-balanced queue
pub const NUM_ATM_INFLIGHTS_PER_LDB_QUEUE: u32 = 16;

/// Device-wide QID inflights
pub const NUM_QID_INFLIGHTS: u32 = 2048;

// =============================================================================
// DATAPATH
// =============================================================================

/// Entries per hardware burst (one 64-byte cache line)
/// [PERF] The device accepts exactly four 16-byte QEs per doorbell write
pub const QE_BURST_SIZE: usize = 4;

/// Default number of credits moved between a pool and a port cache at once
pub const DEFAULT_CREDIT_BATCH_SIZE: u32 = 32;

/// Default number of REL commands issued per burst by `release`
pub const DEFAULT_RELEASE_BATCH_SIZE: usize = QE_BURST_SIZE;

/// Smallest and largest consumer queue depth a port may request
pub const MIN_CQ_DEPTH: u32 = 1;
pub const MAX_CQ_DEPTH: u32 = 1024;

// =============================================================================
// ALERTS
// =============================================================================

/// Aux data carried by the synthetic user alert that stops an alert thread
pub const DOMAIN_USER_ALERT_RESET: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Upper bound on a single wait for the alert thread to exit during reset.
/// The wait loops until the thread reports exit; this only bounds the
/// interval between progress logs.
pub const ALERT_EXIT_LOG_INTERVAL: Duration = Duration::from_secs(1);
