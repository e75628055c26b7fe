//! # Module Trait
//!
//! A module is a named, long-lived task with its own inbox on the bus. Modules belong
//! to exactly one group and are started by the [`Core`](crate::runtime::Core) runtime,
//! which hands each one the shared [`BusContext`].
//!
//! `start` should loop on [`BusContext::receive`] and return once it yields
//! [`BusError::ShutDown`](crate::BusError::ShutDown). `cleanup` runs after the
//! shutdown grace period.

use crate::context::BusContext;
use crate::error::ModuleError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// When a module's `start` is re-invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartKind {
    /// Restart whenever `start` returns, panics or fails.
    Always,
    /// Restart only when `start` fails or panics.
    OnFailure,
}

/// How a module is restarted by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicy {
    #[serde(rename = "policy")]
    pub kind: RestartKind,
    /// Maximum number of restarts, `0` means unbounded.
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_interval_second")]
    pub interval_second: u64,
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
    #[serde(default = "default_interval_limit")]
    pub interval_limit: u64,
}

fn default_interval_second() -> u64 {
    1
}

fn default_growth_rate() -> f64 {
    2.0
}

fn default_interval_limit() -> u64 {
    30
}

/// Result of one `start` invocation, as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Returned,
    Failed(String),
    Panicked,
}

impl RestartPolicy {
    pub fn always() -> Self {
        Self {
            kind: RestartKind::Always,
            retries: 0,
            interval_second: default_interval_second(),
            growth_rate: default_growth_rate(),
            interval_limit: default_interval_limit(),
        }
    }

    pub fn on_failure() -> Self {
        Self {
            kind: RestartKind::OnFailure,
            ..Self::always()
        }
    }

    pub fn should_restart(&self, outcome: &StartOutcome) -> bool {
        match self.kind {
            RestartKind::Always => true,
            RestartKind::OnFailure => !matches!(outcome, StartOutcome::Returned),
        }
    }

    /// Whether another restart is allowed after `attempts` restarts.
    pub fn allows(&self, attempts: u32) -> bool {
        self.retries == 0 || attempts < self.retries
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_secs(self.interval_second)
    }

    /// `min(interval_limit, current * max(1, growth_rate))`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.growth_rate.max(1.0));
        grown.min(Duration::from_secs(self.interval_limit))
    }
}

/// Contract every module hosted on the bus implements.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn group(&self) -> &str;

    /// Disabled modules are never registered and may not send or receive.
    fn enabled(&self) -> bool {
        true
    }

    fn restart_policy(&self) -> Option<RestartPolicy> {
        None
    }

    /// Runs the module until shutdown.
    async fn start(&self, ctx: BusContext) -> Result<(), ModuleError>;

    /// Called once after shutdown, when the grace period is over.
    async fn cleanup(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_failure_does_not_restart_clean_return() {
        let policy = RestartPolicy::on_failure();
        assert!(!policy.should_restart(&StartOutcome::Returned));
        assert!(policy.should_restart(&StartOutcome::Panicked));
        assert!(policy.should_restart(&StartOutcome::Failed("boom".into())));
        assert!(RestartPolicy::always().should_restart(&StartOutcome::Returned));
    }

    #[test]
    fn interval_grows_up_to_limit() {
        let policy = RestartPolicy {
            interval_second: 1,
            growth_rate: 2.0,
            interval_limit: 3,
            ..RestartPolicy::always()
        };
        let first = policy.next_interval(policy.initial_interval());
        let second = policy.next_interval(first);
        assert_eq!(first, Duration::from_secs(2));
        assert_eq!(second, Duration::from_secs(3));
        assert_eq!(policy.next_interval(second), Duration::from_secs(3));
    }

    #[test]
    fn growth_below_one_keeps_interval() {
        let policy = RestartPolicy {
            interval_second: 5,
            growth_rate: 0.5,
            interval_limit: 60,
            ..RestartPolicy::always()
        };
        assert_eq!(
            policy.next_interval(policy.initial_interval()),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn retries_zero_is_unbounded() {
        let unbounded = RestartPolicy::always();
        assert!(unbounded.allows(10_000));
        let bounded = RestartPolicy {
            retries: 2,
            ..RestartPolicy::always()
        };
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
    }

    #[test]
    fn policy_deserializes_from_camel_case() {
        let raw = r#"{"policy":"onFailure","retries":3,"intervalSecond":2,"growthRate":1.5,"intervalLimit":10}"#;
        let policy: RestartPolicy = serde_json::from_str(raw).unwrap();
        assert_eq!(policy.kind, RestartKind::OnFailure);
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.interval_second, 2);
        assert_eq!(policy.interval_limit, 10);
    }
}
