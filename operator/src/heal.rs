use nopea_defs::HealPolicy;
use nopea_gitops::{healing_suspended, Drift};
use nopea_store::Cache;
use serde_json::Value;

/// Decides whether a reconcile pass may apply a resource, given its drift
/// classification, the heal policy, the break-glass annotation on the live
/// object, and the grace period.
///
/// Baseline establishment (`NewResource`, `NeedsApply`) is not healing and
/// always applies. A `GitChange` is an authorized change from the source of
/// truth: it applies under every policy, gated only by break-glass.
/// Cluster-side drift (`ManualDrift`, `Conflict`) obeys the policy, the
/// break-glass annotation, and must have been observed for at least the
/// grace period before healing. The first observation is recorded here;
/// disappearance of drift clears the record.
pub fn heal_action(
    cache: &Cache,
    repo: &str,
    key: &str,
    policy: HealPolicy,
    grace_ms: u64,
    drift: &Drift,
    live: Option<&Value>,
    now_ms: u64,
) -> bool {
    match drift {
        Drift::NoDrift => {
            cache.clear_drift_first_seen(repo, key);
            false
        }
        Drift::NewResource | Drift::NeedsApply => true,
        Drift::GitChange { .. } => !healing_suspended(live),
        Drift::ManualDrift { .. } | Drift::Conflict { .. } => {
            if healing_suspended(live) {
                return false;
            }
            match policy {
                HealPolicy::Manual | HealPolicy::Notify => false,
                HealPolicy::Auto => {
                    let first_seen = cache.record_drift_first_seen(repo, key, now_ms);
                    now_ms.saturating_sub(first_seen) >= grace_ms
                }
            }
        }
    }
}
