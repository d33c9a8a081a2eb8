use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Minimum confidence applied to classes with no explicit entry.
pub const DEFAULT_CLASS_THRESHOLD: f32 = 0.3;

/// Per-class minimum confidence map, shared between the caller and the
/// inference worker. Updates apply on the next inference pass; the lock is
/// held only for the read or write, never across an inference call.
#[derive(Debug, Clone)]
pub struct ClassThresholds {
    inner: Arc<RwLock<HashMap<String, f32>>>,
}

impl Default for ClassThresholds {
    fn default() -> Self {
        let map = HashMap::from([
            ("violence".to_string(), 0.85),
            ("adult".to_string(), 0.35),
            ("weapons".to_string(), 0.45),
            ("drugs".to_string(), 0.25),
            ("gore".to_string(), 0.25),
        ]);
        Self::from_map(map)
    }
}

impl ClassThresholds {
    pub fn from_map(map: HashMap<String, f32>) -> Self {
        let map = map
            .into_iter()
            .map(|(class, value)| (class, value.clamp(0.0, 1.0)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn threshold_for(&self, class: &str) -> f32 {
        self.inner
            .read()
            .expect("threshold map poisoned")
            .get(class)
            .copied()
            .unwrap_or(DEFAULT_CLASS_THRESHOLD)
    }

    pub fn set(&self, class: &str, threshold: f32) {
        self.inner
            .write()
            .expect("threshold map poisoned")
            .insert(class.to_string(), threshold.clamp(0.0, 1.0));
    }

    /// Snapshot taken once at the start of an inference pass so the map is
    /// read consistently across all tiles of that pass.
    pub fn snapshot(&self) -> HashMap<String, f32> {
        self.inner.read().expect("threshold map poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_class_uses_default() {
        let thresholds = ClassThresholds::empty();
        assert_eq!(thresholds.threshold_for("anything"), DEFAULT_CLASS_THRESHOLD);
    }

    #[test]
    fn set_clamps_to_unit_interval() {
        let thresholds = ClassThresholds::empty();
        thresholds.set("weapons", 1.7);
        assert_eq!(thresholds.threshold_for("weapons"), 1.0);
        thresholds.set("weapons", -0.5);
        assert_eq!(thresholds.threshold_for("weapons"), 0.0);
    }

    #[test]
    fn updates_visible_through_clones() {
        let thresholds = ClassThresholds::default();
        let clone = thresholds.clone();
        clone.set("weapons", 0.9);
        assert_eq!(thresholds.threshold_for("weapons"), 0.9);
    }
}
