//! Scaling and rebalance policy configuration.
//!
//! Policies are validated at construction time through builders, so the
//! decision engines can assume every policy they see is internally
//! consistent.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Scaling policy for a node group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePolicy {
    /// CPU threshold (percent) below which a node counts as underutilized.
    pub cpu_underutil_percent: f64,
    /// Memory threshold (percent) below which a node counts as underutilized.
    pub memory_underutil_percent: f64,
    /// How long the scale-down condition must hold continuously before acting.
    pub stabilization_window: Duration,
    /// Quiet period required after any scaling action before a scale-up.
    pub scale_up_cooldown: Duration,
    /// Quiet period required after any scaling action before a scale-down.
    pub scale_down_cooldown: Duration,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            cpu_underutil_percent: 30.0,
            memory_underutil_percent: 30.0,
            stabilization_window: Duration::from_secs(600),
            scale_up_cooldown: Duration::from_secs(300),
            scale_down_cooldown: Duration::from_secs(600),
        }
    }
}

impl ScalePolicy {
    /// Creates a new scale policy builder.
    #[must_use]
    pub fn builder() -> ScalePolicyBuilder {
        ScalePolicyBuilder::new()
    }

    /// Validates this policy.
    ///
    /// # Errors
    ///
    /// Returns error if any threshold is outside `(0, 100]`.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cpu_underutil_percent", self.cpu_underutil_percent),
            ("memory_underutil_percent", self.memory_underutil_percent),
        ] {
            if value <= 0.0 || value > 100.0 {
                return Err(CoreError::InvalidScalePolicy {
                    reason: format!("{name} must be between 0 and 100, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`ScalePolicy`].
#[derive(Debug)]
pub struct ScalePolicyBuilder {
    policy: ScalePolicy,
}

impl Default for ScalePolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalePolicyBuilder {
    /// Creates a builder seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: ScalePolicy::default(),
        }
    }

    /// Sets the CPU underutilization threshold (percent).
    #[must_use]
    pub const fn cpu_underutil_percent(mut self, percent: f64) -> Self {
        self.policy.cpu_underutil_percent = percent;
        self
    }

    /// Sets the memory underutilization threshold (percent).
    #[must_use]
    pub const fn memory_underutil_percent(mut self, percent: f64) -> Self {
        self.policy.memory_underutil_percent = percent;
        self
    }

    /// Sets the stabilization window.
    #[must_use]
    pub const fn stabilization_window(mut self, window: Duration) -> Self {
        self.policy.stabilization_window = window;
        self
    }

    /// Sets the scale-up cooldown.
    #[must_use]
    pub const fn scale_up_cooldown(mut self, cooldown: Duration) -> Self {
        self.policy.scale_up_cooldown = cooldown;
        self
    }

    /// Sets the scale-down cooldown.
    #[must_use]
    pub const fn scale_down_cooldown(mut self, cooldown: Duration) -> Self {
        self.policy.scale_down_cooldown = cooldown;
        self
    }

    /// Builds the policy.
    ///
    /// # Errors
    ///
    /// Returns error if the policy is invalid.
    pub fn build(self) -> Result<ScalePolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Rebalance policy for a node group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePolicy {
    /// Maximum nodes replaced concurrently within one batch.
    pub max_concurrent: u32,
    /// Maximum retries per provision or drain operation.
    pub max_retries: u32,
    /// How long to wait for a replacement node to reach `Ready`.
    pub provision_timeout: Duration,
    /// How long a single node drain may take.
    pub drain_timeout: Duration,
    /// Poll interval while waiting on node health.
    pub health_check_interval: Duration,
    /// When disruptive rebalancing is permitted. `None` means always.
    pub maintenance_window: Option<MaintenanceWindow>,
    /// Whether pod disruption budgets gate candidate eligibility.
    pub respect_disruption_budgets: bool,
}

impl Default for RebalancePolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            max_retries: 3,
            provision_timeout: Duration::from_secs(600),
            drain_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(5),
            maintenance_window: None,
            respect_disruption_budgets: true,
        }
    }
}

impl RebalancePolicy {
    /// Creates a new rebalance policy builder.
    #[must_use]
    pub fn builder() -> RebalancePolicyBuilder {
        RebalancePolicyBuilder::new()
    }

    /// Validates this policy.
    ///
    /// # Errors
    ///
    /// Returns error if batching or polling parameters are degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(CoreError::InvalidRebalancePolicy {
                reason: "max_concurrent must be at least 1".into(),
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(CoreError::InvalidRebalancePolicy {
                reason: "health_check_interval must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// Builder for [`RebalancePolicy`].
#[derive(Debug)]
pub struct RebalancePolicyBuilder {
    policy: RebalancePolicy,
}

impl Default for RebalancePolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RebalancePolicyBuilder {
    /// Creates a builder seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: RebalancePolicy::default(),
        }
    }

    /// Sets the per-batch concurrency bound.
    #[must_use]
    pub const fn max_concurrent(mut self, max: u32) -> Self {
        self.policy.max_concurrent = max;
        self
    }

    /// Sets the per-operation retry bound.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    /// Sets the provision timeout.
    #[must_use]
    pub const fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.policy.provision_timeout = timeout;
        self
    }

    /// Sets the drain timeout.
    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.policy.drain_timeout = timeout;
        self
    }

    /// Sets the health poll interval.
    #[must_use]
    pub const fn health_check_interval(mut self, interval: Duration) -> Self {
        self.policy.health_check_interval = interval;
        self
    }

    /// Restricts rebalancing to a maintenance window.
    #[must_use]
    pub fn maintenance_window(mut self, window: MaintenanceWindow) -> Self {
        self.policy.maintenance_window = Some(window);
        self
    }

    /// Sets whether disruption budgets gate candidate eligibility.
    #[must_use]
    pub const fn respect_disruption_budgets(mut self, respect: bool) -> Self {
        self.policy.respect_disruption_budgets = respect;
        self
    }

    /// Builds the policy.
    ///
    /// # Errors
    ///
    /// Returns error if the policy is invalid.
    pub fn build(self) -> Result<RebalancePolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// A recurring window during which disruptive actions are permitted.
///
/// Day-of-week matching is enforced strictly. The hour range is a
/// best-effort secondary check: a degenerate range (`start_hour ==
/// end_hour`) is treated as all day, and sub-hour precision is not
/// supported. Overnight spans (e.g. 22 to 6) wrap across midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Days of week this window covers (0 = Sunday, 6 = Saturday).
    pub days_of_week: Vec<u8>,
    /// Start hour (0-23) in UTC.
    pub start_hour: u8,
    /// End hour (0-23) in UTC, exclusive.
    pub end_hour: u8,
}

impl MaintenanceWindow {
    /// Creates a new maintenance window.
    ///
    /// # Errors
    ///
    /// Returns error if hours exceed 23, days exceed 6, or no day is given.
    pub fn new(days_of_week: Vec<u8>, start_hour: u8, end_hour: u8) -> Result<Self> {
        if start_hour > 23 || end_hour > 23 {
            return Err(CoreError::InvalidMaintenanceWindow {
                reason: "hours must be 0-23".into(),
            });
        }
        if days_of_week.is_empty() {
            return Err(CoreError::InvalidMaintenanceWindow {
                reason: "at least one day is required".into(),
            });
        }
        for day in &days_of_week {
            if *day > 6 {
                return Err(CoreError::InvalidMaintenanceWindow {
                    reason: "days must be 0-6 (Sunday-Saturday)".into(),
                });
            }
        }
        Ok(Self {
            days_of_week,
            start_hour,
            end_hour,
        })
    }

    /// Checks if this window permits disruptive action at the given time.
    #[must_use]
    pub fn permits_at(&self, time: DateTime<Utc>) -> bool {
        let day = time.weekday().num_days_from_sunday() as u8;
        if !self.days_of_week.contains(&day) {
            return false;
        }

        let hour = time.hour() as u8;
        if self.start_hour == self.end_hour {
            // Degenerate range: the day match alone decides.
            return true;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Overnight span (e.g. 22:00 to 06:00).
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}
