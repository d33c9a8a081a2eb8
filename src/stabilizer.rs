use std::time::Duration;

use tokio::time::Instant;

use crate::core::{Detection, DetectionSet};

/// Matching tolerances and the inactivity window. Empirically tuned
/// defaults; callers may override them per deployment.
#[derive(Debug, Clone, Copy)]
pub struct StabilizerConfig {
    /// Maximum center distance, in display pixels, for two detections to be
    /// considered the same region.
    pub position_tolerance: f32,
    /// Maximum relative area difference for a match.
    pub size_tolerance: f32,
    /// Without user activity for this long, an empty inference pass reuses
    /// the previous stable set instead of clearing it.
    pub inactivity_timeout: Duration,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 30.0,
            size_tolerance: 0.3,
            inactivity_timeout: Duration::from_secs(2),
        }
    }
}

/// Discrete user-interaction events fed into the inactivity logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    PointerMove,
    PointerPress,
    Scroll,
    Wheel,
}

/// Reconciles successive detection sets into a temporally stable set.
/// Owned and mutated only by the control task; no locking required.
pub struct DetectionStabilizer {
    config: StabilizerConfig,
    stable: DetectionSet,
    last_activity: Instant,
}

impl DetectionStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            stable: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn stable(&self) -> &DetectionSet {
        &self.stable
    }

    /// User interaction means the visual content is changing; stale
    /// occlusions would mislead or block input, so the set clears at once.
    pub fn note_activity(&mut self, _event: ActivityEvent, now: Instant) {
        self.last_activity = now;
        self.stable.clear();
    }

    pub fn update(&mut self, new: DetectionSet, now: Instant) -> DetectionSet {
        if new.is_empty() {
            if now.duration_since(self.last_activity) >= self.config.inactivity_timeout {
                // Bridge single missed frames during inactivity to avoid
                // visible flicker.
                return self.stable.clone();
            }
            self.stable.clear();
            return Vec::new();
        }

        let mut incoming: Vec<Option<Detection>> = new.into_iter().map(Some).collect();
        let mut merged: DetectionSet = Vec::with_capacity(self.stable.len() + incoming.len());

        for existing in self.stable.drain(..) {
            let matched = incoming.iter_mut().find_map(|slot| {
                match slot {
                    Some(candidate) if is_match(&existing, candidate, &self.config) => slot.take(),
                    _ => None,
                }
            });
            match matched {
                Some(mut candidate) => {
                    // Position tracks the live detector; confidence never
                    // decays on a single lower-confidence re-detection.
                    candidate.confidence = candidate.confidence.max(existing.confidence);
                    merged.push(candidate);
                }
                None => merged.push(existing),
            }
        }

        merged.extend(incoming.into_iter().flatten());
        self.stable = merged.clone();
        merged
    }
}

fn is_match(existing: &Detection, candidate: &Detection, config: &StabilizerConfig) -> bool {
    if existing.class != candidate.class {
        return false;
    }

    let (ex, ey) = existing.bounds.center();
    let (cx, cy) = candidate.bounds.center();
    let distance = ((ex - cx).powi(2) + (ey - cy).powi(2)).sqrt();
    if distance > config.position_tolerance {
        return false;
    }

    let existing_area = existing.bounds.area();
    let candidate_area = candidate.bounds.area();
    let largest = existing_area.max(candidate_area);
    if largest <= 0.0 {
        return false;
    }
    (existing_area - candidate_area).abs() / largest <= config.size_tolerance
}
