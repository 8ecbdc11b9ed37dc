//! Person-proximity attendance filter.

use crate::config::ProximitySettings;
use crate::{centroid_distance, BBox, FrameDims, RawDetection};

#[derive(Clone, Debug)]
pub struct ProximityFilter {
    person_min_confidence: f64,
    scene_factor: f64,
    object_factor: f64,
}

impl ProximityFilter {
    pub fn new(settings: &ProximitySettings) -> Self {
        Self {
            person_min_confidence: settings.person_min_confidence,
            scene_factor: settings.scene_factor,
            object_factor: settings.object_factor,
        }
    }

    /// Radius around the object center inside which a person counts as its custodian.
    ///
    /// Scales with the scene (`scene_factor * min(W, H)`) and with the object
    /// (`object_factor * max(w, h)`), whichever is larger.
    pub fn threshold(&self, object: &BBox, frame: FrameDims) -> f64 {
        let scene = self.scene_factor * frame.min_side();
        let own = self.object_factor * object.width().max(object.height());
        scene.max(own)
    }

    /// True when any sufficiently confident person is within the threshold.
    /// No persons means unattended.
    pub fn is_attended(&self, object: &BBox, persons: &[RawDetection], frame: FrameDims) -> bool {
        if persons.is_empty() {
            return false;
        }
        let threshold = self.threshold(object, frame);
        let center = object.center();
        persons
            .iter()
            .filter(|person| person.confidence >= self.person_min_confidence)
            .any(|person| centroid_distance(center, person.bbox.center()) <= threshold)
    }
}

impl Default for ProximityFilter {
    fn default() -> Self {
        Self::new(&ProximitySettings::default())
    }
}
