//! Internal classifications and states: the per-service lifecycle state
//! machine (spec section 4.8) and the scheduler-state-code mapping decided
//! in SPEC_FULL.md section 9.1.

use error::OrchestraErrorKind as EK;
use Result;

/// A service's lifecycle state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Configuring,
    Running,
    Cancelled,
    Failed,
    Completed,
}

impl ::std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        let s = match *self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Configuring => "configuring",
            ServiceStatus::Running => "running",
            ServiceStatus::Cancelled => "cancelled",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

impl ServiceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceStatus::Cancelled | ServiceStatus::Failed | ServiceStatus::Completed)
    }

    /// Validate `self -> next` against the table in spec section 4.8.
    /// A no-op transition (`next == self`) is always allowed.
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use self::ServiceStatus::*;
        if next == self {
            return true;
        }
        match (self, next) {
            (Pending, Configuring) => true,
            (Configuring, Running) => true,
            (Pending, Cancelled) | (Configuring, Cancelled) | (Running, Cancelled) => true,
            (Running, Completed) => true,
            (Pending, Failed) | (Configuring, Failed) | (Running, Failed) => true,
            _ => false,
        }
    }

    /// Apply a transition, or fail with `InvalidTransition`.
    pub fn transition(self, next: ServiceStatus, service_id: &str) -> Result<ServiceStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EK::InvalidTransition(service_id.to_string(), self.to_string(), next.to_string()).into())
        }
    }

    /// Apply a status observed directly from the scheduler. Terminal
    /// observations (`completed`/`cancelled`/`failed`) are always accepted
    /// even from `pending`/`configuring` — the scheduler is the source of
    /// truth for a job's fate and may report a terminal state the control
    /// plane never polled through `running` for (spec section 8 boundary
    /// behavior). Non-terminal observations still go through `transition`.
    pub fn observe_scheduler_state(self, observed: ServiceStatus, service_id: &str) -> Result<ServiceStatus> {
        if observed.is_terminal() {
            Ok(observed)
        } else {
            self.transition(observed, service_id)
        }
    }
}

/// Map a workload-manager job state code to a `ServiceStatus`, per the
/// decision recorded in SPEC_FULL.md section 9.1. `requeue_expected`
/// disambiguates `PREEMPTED` (the scheduler sets this flag when it intends
/// to requeue the job rather than abandon it).
pub fn map_scheduler_state(code: &str, requeue_expected: bool) -> ServiceStatus {
    match code {
        "PENDING" => ServiceStatus::Pending,
        "CONFIGURING" => ServiceStatus::Configuring,
        "RUNNING" | "COMPLETING" => ServiceStatus::Running,
        "COMPLETED" => ServiceStatus::Completed,
        "CANCELLED" => ServiceStatus::Cancelled,
        "FAILED" | "NODE_FAIL" | "TIMEOUT" | "OUT_OF_MEMORY" | "BOOT_FAIL" => ServiceStatus::Failed,
        "PREEMPTED" => if requeue_expected { ServiceStatus::Pending } else { ServiceStatus::Failed },
        "SUSPENDED" => ServiceStatus::Configuring,
        other => {
            warn!("unrecognized scheduler state code '{}', mapping to failed", other);
            ServiceStatus::Failed
        }
    }
}

/// Aggregate a replica group's member statuses (spec section 4.8):
/// `running` if at least one member is running; `partial` if members are
/// running and others are not; otherwise uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupStatus {
    Pending,
    Running,
    Partial,
    Completed,
    Failed,
    Cancelled,
}

pub fn aggregate_group_status(members: &[ServiceStatus]) -> GroupStatus {
    if members.is_empty() {
        return GroupStatus::Pending;
    }
    let running = members.iter().filter(|s| **s == ServiceStatus::Running).count();
    if running == members.len() {
        return GroupStatus::Running;
    }
    if running > 0 {
        return GroupStatus::Partial;
    }
    let first = members[0];
    if members.iter().all(|s| *s == first) {
        return match first {
            ServiceStatus::Pending | ServiceStatus::Configuring => GroupStatus::Pending,
            ServiceStatus::Failed => GroupStatus::Failed,
            ServiceStatus::Cancelled => GroupStatus::Cancelled,
            ServiceStatus::Completed => GroupStatus::Completed,
            ServiceStatus::Running => GroupStatus::Running,
        };
    }
    GroupStatus::Partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use self::ServiceStatus::*;

    #[test]
    fn no_path_produces_running_to_pending() {
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn happy_path_transitions() {
        assert!(Pending.can_transition_to(Configuring));
        assert!(Configuring.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
    }

    #[test]
    fn cancel_from_any_nonterminal() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Configuring.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Cancelled));
    }

    #[test]
    fn update_status_to_current_is_noop() {
        assert_eq!(Running.transition(Running, "svc-1").unwrap(), Running);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        assert!(Completed.transition(Running, "svc-1").is_err());
    }

    #[test]
    fn completed_observation_from_pending_goes_direct() {
        assert_eq!(Pending.observe_scheduler_state(Completed, "svc-1").unwrap(), Completed);
    }

    #[test]
    fn non_terminal_observation_still_checked() {
        assert!(Completed.observe_scheduler_state(Running, "svc-1").is_err());
    }

    #[test]
    fn preempted_maps_by_requeue_flag() {
        assert_eq!(map_scheduler_state("PREEMPTED", true), Pending);
        assert_eq!(map_scheduler_state("PREEMPTED", false), Failed);
    }

    #[test]
    fn suspended_maps_to_configuring() {
        assert_eq!(map_scheduler_state("SUSPENDED", false), Configuring);
    }

    #[test]
    fn unknown_code_maps_to_failed() {
        assert_eq!(map_scheduler_state("BOGUS", false), Failed);
    }

    #[test]
    fn aggregate_all_running_is_running() {
        assert_eq!(aggregate_group_status(&[Running, Running]), GroupStatus::Running);
    }

    #[test]
    fn aggregate_mixed_is_partial() {
        assert_eq!(aggregate_group_status(&[Running, Pending]), GroupStatus::Partial);
    }

    #[test]
    fn aggregate_uniform_pending() {
        assert_eq!(aggregate_group_status(&[Pending, Pending]), GroupStatus::Pending);
    }

    #[test]
    fn aggregate_uniform_completed() {
        assert_eq!(aggregate_group_status(&[Completed, Completed]), GroupStatus::Completed);
    }
}
