//! Process-wide estimate cache with time-to-live eviction.

use {crate::EstimateResult, chrono::Utc, dashmap::DashMap, std::sync::Arc};

/// Keyed by estimate id. Reference counted for cheap sharing between the
/// dispatcher and the HTTP state. Expired entries are dropped on access and
/// opportunistically swept on every store.
#[derive(Clone, Default)]
pub struct Cache(Arc<DashMap<String, EstimateResult>>);

impl Cache {
    pub fn store(&self, result: EstimateResult) {
        self.0.insert(result.estimate_id.clone(), result);
        self.evict_expired();
    }

    /// Returns the estimate if present and still valid. An expired entry is
    /// treated as absent and evicted.
    pub fn get(&self, estimate_id: &str) -> Option<EstimateResult> {
        if let Some(entry) = self.0.get(estimate_id) {
            if !entry.value().expired() {
                return Some(entry.value().clone());
            }
        }
        self.0.remove(estimate_id);
        None
    }

    pub fn remove(&self, estimate_id: &str) {
        self.0.remove(estimate_id);
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        self.0.retain(|_, estimate| estimate.expires_at >= now);
    }
}
