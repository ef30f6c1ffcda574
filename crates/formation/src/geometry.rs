use std::f32::consts::{FRAC_PI_2, FRAC_PI_3, FRAC_PI_4, PI, TAU};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationShape {
    Random,
    SingleFile,
    SideBySide,
    LikeGeese,
    FannedBehind,
    FannedInFront,
    CircleTheLeader,
}

impl FormationShape {
    pub const COUNT: u32 = 7;

    pub const ALL: [FormationShape; 7] = [
        Self::Random,
        Self::SingleFile,
        Self::SideBySide,
        Self::LikeGeese,
        Self::FannedBehind,
        Self::FannedInFront,
        Self::CircleTheLeader,
    ];

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u32 {
        match self {
            Self::Random => 0,
            Self::SingleFile => 1,
            Self::SideBySide => 2,
            Self::LikeGeese => 3,
            Self::FannedBehind => 4,
            Self::FannedInFront => 5,
            Self::CircleTheLeader => 6,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::SingleFile => "single_file",
            Self::SideBySide => "side_by_side",
            Self::LikeGeese => "like_geese",
            Self::FannedBehind => "fanned_behind",
            Self::FannedInFront => "fanned_in_front",
            Self::CircleTheLeader => "circle_the_leader",
        }
    }
}

/// Offset of a follower relative to its master, in master-local polar
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotGeometry {
    pub angle: f32,
    pub distance: f32,
}

impl SlotGeometry {
    pub const MASTER: SlotGeometry = SlotGeometry {
        angle: 0.0,
        distance: 0.0,
    };
}

impl Default for SlotGeometry {
    fn default() -> Self {
        Self {
            angle: 0.0,
            distance: 1.0,
        }
    }
}

/// Geometry of the `k`-th follower (1-based, in ordinal order) out of `total`
/// followers. `None` for shapes that leave placement to the movement layer,
/// or when `k` is outside `1..=total`.
pub fn formation_offset(
    shape: FormationShape,
    k: u32,
    total: u32,
    base_distance: f32,
) -> Option<SlotGeometry> {
    if total == 0 || k == 0 || k > total {
        return None;
    }
    let n = total as f32;
    let step = (k - 1) as f32;
    let rank = ((k - 1) / 2 + 1) as f32;
    let odd = k % 2 == 1;

    let geometry = match shape {
        FormationShape::Random => return None,
        FormationShape::SingleFile => SlotGeometry {
            angle: PI,
            distance: base_distance * k as f32,
        },
        FormationShape::SideBySide => SlotGeometry {
            angle: if odd { FRAC_PI_2 } else { FRAC_PI_2 + PI },
            distance: base_distance * rank,
        },
        FormationShape::LikeGeese => SlotGeometry {
            angle: if odd { PI - FRAC_PI_3 } else { PI + FRAC_PI_4 },
            distance: base_distance * rank,
        },
        FormationShape::FannedBehind => SlotGeometry {
            angle: FRAC_PI_2 + (PI / n) * step,
            distance: base_distance,
        },
        FormationShape::FannedInFront => SlotGeometry {
            angle: (PI + FRAC_PI_2 + (PI / n) * step).rem_euclid(TAU),
            distance: base_distance,
        },
        FormationShape::CircleTheLeader => SlotGeometry {
            angle: (TAU / n) * step,
            distance: base_distance,
        },
    };
    Some(geometry)
}

/// Reverses formation chirality when `mirrored` is set.
pub fn mirror_angle(angle: f32, mirrored: bool) -> f32 {
    if mirrored {
        TAU - angle
    } else {
        angle
    }
}
