use crate::error::{DvsError, DvsResult};

/// Event timestamps and frame boundaries, in sensor time units (microseconds for DAVIS logs).
pub type TimeUnits = i64;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

impl FrameIndex {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Pixel dimensions of the event sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Sensor {
    pub width: u32,
    pub height: u32,
}

impl Sensor {
    pub const DAVIS346: Sensor = Sensor {
        width: 346,
        height: 260,
    };

    pub fn new(width: u32, height: u32) -> DvsResult<Self> {
        if width == 0 || height == 0 {
            return Err(DvsError::validation("sensor width/height must be non-zero"));
        }
        Ok(Self { width, height })
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Row-major offset of `(x, y)`. Callers must check bounds first.
    pub fn offset(self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl Default for Sensor {
    fn default() -> Self {
        Self::DAVIS346
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const BLACK: Rgb8 = Rgb8 { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_rejects_empty_dimensions() {
        assert!(Sensor::new(0, 10).is_err());
        assert!(Sensor::new(10, 0).is_err());
        assert_eq!(Sensor::new(4, 3).unwrap().pixel_count(), 12);
    }

    #[test]
    fn sensor_offset_is_row_major() {
        let s = Sensor::new(4, 3).unwrap();
        assert_eq!(s.offset(0, 0), 0);
        assert_eq!(s.offset(3, 0), 3);
        assert_eq!(s.offset(1, 2), 9);
        assert!(s.contains(3, 2));
        assert!(!s.contains(4, 2));
    }
}
