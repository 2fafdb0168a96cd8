//! Small vector helpers shared by the stick pipeline.

/// One stick position, each component in [-1.0, 1.0].
///
/// Components are normalized per axis, so before deadzone removal the pair
/// as a whole may lie outside the unit circle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StickSample {
    pub x: f32,
    pub y: f32,
}

impl StickSample {
    pub const ZERO: StickSample = StickSample { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn magnitude(&self) -> f32 {
        magnitude(self.x, self.y)
    }
}

/// Clamps a value to the unit range [-1.0, 1.0].
pub fn unit_range(value: f32) -> f32 {
    value.clamp(-1.0, 1.0)
}

/// Euclidean length of a 2D sample.
pub fn magnitude(x: f32, y: f32) -> f32 {
    x.hypot(y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_range_clamps_both_sides() {
        assert_eq!(unit_range(1.7), 1.0);
        assert_eq!(unit_range(-3.0), -1.0);
        assert_eq!(unit_range(0.25), 0.25);
    }

    #[test]
    fn magnitude_of_3_4_is_5() {
        assert!((magnitude(3.0, 4.0) - 5.0).abs() < f32::EPSILON);
        assert_eq!(StickSample::ZERO.magnitude(), 0.0);
    }
}
