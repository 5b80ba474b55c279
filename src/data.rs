use serde::Deserialize;

/// Number of landmarks the hand detector reports per hand.
pub const LANDMARK_COUNT: usize = 21;

/// Point in normalized camera space.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Landmark { x, y, z }
    }

    /// Inside the unit square and with a non-zero depth.
    pub fn is_usable(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y) && self.z != 0.0
    }

    /// Reflects x for an optically mirrored camera.
    pub fn mirrored(&self) -> Self {
        Landmark {
            x: 1.0 - self.x,
            ..*self
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn opposite(self) -> Self {
        match self {
            Handedness::Left => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DetectedHand {
    pub handedness: Handedness,
    /// Detector output in landmark index order; `null` for a missing point.
    pub landmarks: Vec<Option<Landmark>>,
}

impl DetectedHand {
    pub fn landmark(&self, index: usize) -> Option<Landmark> {
        self.landmarks
            .get(index)
            .copied()
            .flatten()
            .filter(Landmark::is_usable)
    }
}

/// Everything the detector saw during one camera tick.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LandmarkFrame {
    #[serde(default)]
    pub primary: Vec<DetectedHand>,
    #[serde(default)]
    pub secondary: Vec<DetectedHand>,
}

impl LandmarkFrame {
    pub fn deserialize(data: &[u8]) -> Result<LandmarkFrame, serde_json::Error> {
        serde_json::from_slice::<LandmarkFrame>(data)
    }
}
