//! Real-time environment acceptance tests.
//!
//! The interesting paths of `init_realtime` need privileges (root,
//! CAP_SYS_NICE, or a nonzero RLIMIT_RTPRIO); those tests skip
//! themselves on unprivileged runners. The degraded paths, which are
//! what most deployments actually hit first, run everywhere.

use station_common::config::{RealtimeConfig, SchedPolicy};
use station_timing::realtime::{check_rt_capabilities, init_realtime};

use super::common::check_rt_prerequisites;

#[test]
fn test_cpu_affinity_applies_without_privileges() {
    // SCHED_OTHER plus affinity needs no privileges: pinning the
    // calibration thread still works on locked-down deployments.
    let config = RealtimeConfig {
        enabled: true,
        policy: SchedPolicy::Other,
        priority: 0,
        cpu_affinity: Some(vec![0]),
        lock_memory: false,
    };

    let status = init_realtime(&config).unwrap();
    assert_eq!(status.scheduler_policy, Some(SchedPolicy::Other));
    assert_eq!(status.scheduler_priority, None);
    assert_eq!(status.cpu_affinity, Some(vec![0]));
    assert!(!status.memory_locked);
}

#[test]
fn test_fifo_scheduling_with_privileges() {
    if let Err(reason) = check_rt_prerequisites() {
        eprintln!("Skipping FIFO scheduling test: {reason}");
        return;
    }

    // Stay within RLIMIT_RTPRIO when capable but not root.
    let caps = check_rt_capabilities();
    let priority = if caps.is_root {
        10
    } else {
        caps.rtprio_limit.unwrap_or(0).clamp(1, 10) as u8
    };

    let config = RealtimeConfig {
        enabled: true,
        policy: SchedPolicy::Fifo,
        priority,
        cpu_affinity: None,
        lock_memory: false,
    };

    // Each test runs on its own thread, so the FIFO policy dies with it.
    let status = init_realtime(&config).unwrap();
    assert_eq!(status.scheduler_policy, Some(SchedPolicy::Fifo));
    assert_eq!(status.scheduler_priority, Some(priority));
}

#[test]
fn test_memory_lock_reported_when_permitted() {
    let caps = check_rt_capabilities();
    if !caps.can_lock_memory() {
        eprintln!("Skipping memory lock test: RLIMIT_MEMLOCK is finite and not root");
        return;
    }

    let config = RealtimeConfig {
        enabled: true,
        policy: SchedPolicy::Other,
        priority: 0,
        cpu_affinity: None,
        lock_memory: true,
    };

    let status = init_realtime(&config).unwrap();
    assert!(status.memory_locked);
}

#[test]
fn test_unprivileged_fifo_degrades_to_status() {
    let caps = check_rt_capabilities();
    if caps.can_use_rt_scheduling() {
        eprintln!("Skipping degraded-path test: RT privileges are available");
        return;
    }

    let config = RealtimeConfig {
        enabled: true,
        policy: SchedPolicy::Fifo,
        priority: 50,
        cpu_affinity: None,
        lock_memory: false,
    };

    // EPERM downgrades to a warning and an empty status, never an error:
    // the daemon must come up on unprivileged hosts.
    let status = init_realtime(&config).unwrap();
    assert_eq!(status.scheduler_policy, None);
    assert_eq!(status.scheduler_priority, None);
    assert!(!status.memory_locked);
}
