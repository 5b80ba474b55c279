use crate::data::{DetectedHand, Handedness, Landmark, LandmarkFrame};
use nalgebra as na;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

pub const WRIST: usize = 0;

const FLEX_MIN: f64 = 0.0;
const FLEX_MAX: f64 = 180.0;
const LATERAL_MIN: f64 = 60.0;
const LATERAL_MAX: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Digit {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Digit {
    pub const ALL: [Digit; 5] = [
        Digit::Thumb,
        Digit::Index,
        Digit::Middle,
        Digit::Ring,
        Digit::Pinky,
    ];

    /// Digits driven on the actuator, in wire order. The thumb is not actuated.
    pub const TRANSMITTED: [Digit; 4] = [Digit::Index, Digit::Middle, Digit::Ring, Digit::Pinky];

    /// Tip first, then each joint toward the base.
    pub fn landmarks(self) -> [usize; 4] {
        match self {
            Digit::Thumb => [4, 3, 2, 1],
            Digit::Index => [8, 7, 6, 5],
            Digit::Middle => [12, 11, 10, 9],
            Digit::Ring => [16, 15, 14, 13],
            Digit::Pinky => [20, 19, 18, 17],
        }
    }

}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Digit::Thumb => "Thumb",
            Digit::Index => "Index",
            Digit::Middle => "Middle",
            Digit::Ring => "Ring",
            Digit::Pinky => "Pinky",
        };
        f.write_str(name)
    }
}

/// Flex angles at the three joints plus the sideways spread of the finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AngleSet {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub lateral: i32,
}

impl AngleSet {
    pub const STRAIGHT: i32 = 180;
    pub const NEUTRAL: i32 = 90;
    pub const DEFAULT: AngleSet = AngleSet {
        a: AngleSet::STRAIGHT,
        b: AngleSet::STRAIGHT,
        c: AngleSet::STRAIGHT,
        lateral: AngleSet::NEUTRAL,
    };
}

impl Default for AngleSet {
    fn default() -> Self {
        AngleSet::DEFAULT
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseFrame {
    angles: BTreeMap<Digit, AngleSet>,
}

impl PoseFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, digit: Digit, angles: AngleSet) {
        self.angles.insert(digit, angles);
    }

    pub fn get(&self, digit: Digit) -> Option<&AngleSet> {
        self.angles.get(&digit)
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Digit, &AngleSet)> {
        self.angles.iter().map(|(digit, angles)| (*digit, angles))
    }

    /// Flattens to `A, B, lateral` per transmitted digit. C stays local.
    ///
    /// An empty frame flattens to an empty vector; a digit missing from a
    /// non-empty frame is sent as its default.
    pub fn to_vector(&self) -> AngleVector {
        if self.is_empty() {
            return AngleVector::default();
        }
        let values = Digit::TRANSMITTED
            .iter()
            .flat_map(|digit| {
                let set = self.get(*digit).copied().unwrap_or_default();
                [set.a, set.b, set.lateral]
            })
            .collect();
        AngleVector(values)
    }
}

impl fmt::Display for PoseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (digit, set) in self.iter() {
            writeln!(
                f,
                "{}: A={}, B={}, C={}, lat={}",
                digit,
                set.a,
                set.b,
                set.c,
                set.lateral
            )?;
        }
        Ok(())
    }
}

/// Transmission ready angles, three per transmitted digit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AngleVector(Vec<i32>);

impl AngleVector {
    pub const LEN: usize = 3 * Digit::TRANSMITTED.len();

    pub fn new(values: Vec<i32>) -> Self {
        AngleVector(values)
    }

    /// Every actuated digit straight and centered.
    pub fn default_pose() -> Self {
        let set = AngleSet::DEFAULT;
        AngleVector(
            Digit::TRANSMITTED
                .iter()
                .flat_map(|_| [set.a, set.b, set.lateral])
                .collect(),
        )
    }

    pub fn values(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LEN
    }
}

impl From<Vec<i32>> for AngleVector {
    fn from(values: Vec<i32>) -> Self {
        AngleVector(values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRole {
    Primary,
    /// Optically mirrored view of the same hand.
    Secondary,
}

/// How lateral angles of two cameras are combined.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LateralFusion {
    /// `(front + back) / 2`
    Mean,
    /// `front + back / 2`. Leaves the 60..=120 range.
    Legacy,
}

impl Default for LateralFusion {
    fn default() -> Self {
        LateralFusion::Mean
    }
}

/// Override for the detector's left/right label, which is not trustworthy
/// on every camera setup.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandednessPolicy {
    Reported,
    Swapped,
    Left,
    Right,
}

impl Default for HandednessPolicy {
    fn default() -> Self {
        HandednessPolicy::Reported
    }
}

impl HandednessPolicy {
    pub fn resolve(self, reported: Handedness) -> Handedness {
        match self {
            HandednessPolicy::Reported => reported,
            HandednessPolicy::Swapped => reported.opposite(),
            HandednessPolicy::Left => Handedness::Left,
            HandednessPolicy::Right => Handedness::Right,
        }
    }
}

/// Stateless conversion from detector landmarks to finger angles.
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    lateral_fusion: LateralFusion,
    handedness: HandednessPolicy,
    /// Compensates for the camera mount before measuring lateral spread.
    frame_correction: na::Rotation3<f64>,
}

impl Default for PoseEstimator {
    fn default() -> Self {
        PoseEstimator::new(LateralFusion::default(), HandednessPolicy::default(), 260.0)
    }
}

impl PoseEstimator {
    pub fn new(
        lateral_fusion: LateralFusion,
        handedness: HandednessPolicy,
        frame_rotation_deg: f64,
    ) -> Self {
        Self {
            lateral_fusion,
            handedness,
            frame_correction: na::Rotation3::from_axis_angle(
                &na::Vector3::x_axis(),
                frame_rotation_deg.to_radians(),
            ),
        }
    }

    /// Angles for every transmitted digit of one detected hand.
    pub fn estimate(&self, hand: &DetectedHand, role: CameraRole) -> PoseFrame {
        let handedness = self.handedness.resolve(hand.handedness);
        let landmark = |index: usize| {
            hand.landmark(index).map(|lm| match role {
                CameraRole::Primary => lm,
                CameraRole::Secondary => lm.mirrored(),
            })
        };
        let wrist = landmark(WRIST);

        let mut frame = PoseFrame::new();
        for digit in Digit::TRANSMITTED.iter() {
            let [tip, a, b, c] = digit.landmarks();
            let set = match (landmark(tip), landmark(a), landmark(b), landmark(c)) {
                (Some(tip), Some(a), Some(b), Some(c)) => AngleSet {
                    a: to_degrees_int(joint_angle(&tip, &a, &b)),
                    b: to_degrees_int(joint_angle(&a, &b, &c)),
                    c: wrist
                        .map(|wrist| to_degrees_int(joint_angle(&b, &c, &wrist)))
                        .unwrap_or(AngleSet::STRAIGHT),
                    lateral: to_degrees_int(self.lateral_angle(&b, &c, handedness)),
                },
                _ => AngleSet::DEFAULT,
            };
            frame.insert(*digit, set);
        }
        frame
    }

    /// One pose per tick from whatever the cameras saw. Only the first
    /// detected hand of each camera is used.
    pub fn estimate_frame(&self, frame: &LandmarkFrame) -> PoseFrame {
        let primary = frame
            .primary
            .first()
            .map(|hand| self.estimate(hand, CameraRole::Primary))
            .unwrap_or_default();
        let secondary = frame
            .secondary
            .first()
            .map(|hand| self.estimate(hand, CameraRole::Secondary))
            .unwrap_or_default();
        self.fuse(&primary, &secondary)
    }

    pub fn fuse(&self, primary: &PoseFrame, secondary: &PoseFrame) -> PoseFrame {
        let mut fused = PoseFrame::new();
        for digit in Digit::ALL.iter() {
            let set = match (primary.get(*digit), secondary.get(*digit)) {
                (Some(front), Some(back)) => AngleSet {
                    a: mean(front.a, back.a),
                    b: mean(front.b, back.b),
                    c: mean(front.c, back.c),
                    lateral: match self.lateral_fusion {
                        LateralFusion::Mean => mean(front.lateral, back.lateral),
                        LateralFusion::Legacy => {
                            front.lateral.saturating_add(back.lateral.div_euclid(2))
                        }
                    },
                },
                (Some(only), None) | (None, Some(only)) => *only,
                (None, None) => continue,
            };
            fused.insert(*digit, set);
        }
        fused
    }

    /// Sideways spread of the finger segment `base -> pip`, measured in the
    /// corrected camera frame against the x axis.
    fn lateral_angle(&self, pip: &Landmark, base: &Landmark, handedness: Handedness) -> f64 {
        let pip = self.frame_correction * pip.to_vector();
        let base = self.frame_correction * base.to_vector();
        let finger = na::Vector3::new(pip.x - base.x, 0.0, pip.z - base.z);
        let magnitude = finger.norm();
        if magnitude == 0.0 || !magnitude.is_finite() {
            return AngleSet::NEUTRAL as f64;
        }
        let cosine = (finger / magnitude).dot(&na::Vector3::x()).clamp(-1.0, 1.0);
        let angle = cosine.acos().to_degrees().clamp(LATERAL_MIN, LATERAL_MAX);
        match handedness {
            Handedness::Left => angle,
            // mirror so "toward the palm" means the same on both hands
            Handedness::Right => 180.0 - angle,
        }
    }
}

/// Angle at `p2` between the segments to `p1` and `p3`.
fn joint_angle(p1: &Landmark, p2: &Landmark, p3: &Landmark) -> f64 {
    let v1 = p1.to_vector() - p2.to_vector();
    let v2 = p3.to_vector() - p2.to_vector();
    let magnitude = v1.norm() * v2.norm();
    if magnitude == 0.0 || !magnitude.is_finite() {
        return AngleSet::STRAIGHT as f64;
    }
    let cosine = (v1.dot(&v2) / magnitude).clamp(-1.0, 1.0);
    cosine.acos().to_degrees().clamp(FLEX_MIN, FLEX_MAX)
}

/// Floor of the average, in i64.
fn mean(a: i32, b: i32) -> i32 {
    (i64::from(a) + i64::from(b)).div_euclid(2) as i32
}

fn to_degrees_int(angle: f64) -> i32 {
    angle.round() as i32
}

trait LandmarkVector {
    fn to_vector(&self) -> na::Vector3<f64>;
}

impl LandmarkVector for Landmark {
    fn to_vector(&self) -> na::Vector3<f64> {
        na::Vector3::new(self.x, self.y, self.z)
    }
}
