//! Lookup tables built once per run and shared read-only by every colorizer.

use crate::core::{Rgb8, TimeUnits};
use crate::error::{DvsError, DvsResult};
use crate::frame::NEVER;

/// Intensity written by a qualifying event and the first decay sample.
pub const PEAK_INTENSITY: f64 = 500.0;

const HUE_START: f64 = 1.0;
const HUE_END: f64 = 256.0;
const HUE_STEP: f64 = 0.5;

/// Upper bound on decay samples; rates slow enough to exceed it are rejected.
pub const MAX_DECAY_ENTRIES: usize = 1 << 16;

/// Number of entries in the color ramp (one per hue step in `[1.0, 256.0]`).
pub const COLOR_TABLE_LEN: usize = ((HUE_END - HUE_START) / HUE_STEP) as usize + 1;

/// HSV to RGB conversion used to build the color ramp.
///
/// `h` is in degrees, `s` and `v` in percent. The third ramp term (`c`) scales by value rather
/// than saturation, and the produced colors feed the ramp as-is.
pub fn hue_to_rgb(h: f64, s: f64, v: f64) -> Rgb8 {
    let s = s / 100.0;
    let v = v / 100.0;
    let mut h = h / 360.0;

    if s < 0.0 {
        return Rgb8::new((v * 255.0).round() as u8, v as u8, v as u8);
    }

    if h >= 1.0 {
        h = 0.0;
    }
    h *= 6.0;
    let sector = h.floor();
    let f = h - sector;
    let a = (255.0 * v * (1.0 - s)).round() as u8;
    let b = (255.0 * v * (1.0 - s * f)).round() as u8;
    let c = (255.0 * v * (1.0 - v * (1.0 - f))).round() as u8;
    let v = (255.0 * v).round() as u8;

    match sector as i64 {
        0 => Rgb8::new(v, c, a),
        1 => Rgb8::new(b, v, a),
        2 => Rgb8::new(a, v, c),
        3 => Rgb8::new(a, b, v),
        4 => Rgb8::new(c, a, v),
        5 => Rgb8::new(v, a, b),
        _ => Rgb8::BLACK,
    }
}

/// Sampled exponential decay from [`PEAK_INTENSITY`] down to the first value below 1.
#[derive(Clone, Debug)]
pub struct DecayTable {
    values: Vec<f64>,
}

impl DecayTable {
    /// Samples are taken every two frame intervals of elapsed time.
    pub fn new(frame_interval: TimeUnits, decay_rate: f64) -> DvsResult<Self> {
        if frame_interval <= 0 {
            return Err(DvsError::validation("frame interval must be > 0"));
        }
        if !decay_rate.is_finite() || decay_rate <= 0.0 || decay_rate >= 1.0 {
            return Err(DvsError::validation(format!(
                "decay rate must be in (0, 1) (got {decay_rate})"
            )));
        }

        let interval = frame_interval as f64;
        let stride = 2.0 * interval;
        let base = 1.0 - decay_rate;

        let mut values = vec![PEAK_INTENSITY];
        let mut t = 1.0;
        loop {
            if values.len() >= MAX_DECAY_ENTRIES {
                return Err(DvsError::validation(format!(
                    "decay rate {decay_rate} too small: table would exceed {MAX_DECAY_ENTRIES} entries"
                )));
            }
            let v = PEAK_INTENSITY * base.powf(t / interval);
            values.push(v);
            if v < 1.0 {
                break;
            }
            t += stride;
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.values.get(i).copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Hue ramp; entry 0 is the background color.
#[derive(Clone, Debug)]
pub struct ColorTable {
    colors: Vec<Rgb8>,
}

impl ColorTable {
    pub fn new() -> Self {
        let mut colors = Vec::with_capacity(COLOR_TABLE_LEN);
        // Each slot holds the color of the previous hue step.
        let mut prev = Rgb8::BLACK;
        for step in 0..COLOR_TABLE_LEN {
            let h = HUE_START + step as f64 * HUE_STEP;
            colors.push(prev);
            prev = hue_to_rgb(h, 100.0, 100.0);
        }
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn background(&self) -> Rgb8 {
        self.colors[0]
    }

    /// Panics on an index that did not come from [`LookupTables::color_index`].
    pub fn color(&self, index: u16) -> &Rgb8 {
        &self.colors[index as usize]
    }

    pub fn colors(&self) -> &[Rgb8] {
        &self.colors
    }
}

impl Default for ColorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Decay curve plus color ramp for one frame interval / decay rate pair.
#[derive(Clone, Debug)]
pub struct LookupTables {
    frame_interval: TimeUnits,
    inv_interval: f64,
    decay: DecayTable,
    colors: ColorTable,
}

impl LookupTables {
    pub fn new(frame_interval: TimeUnits, decay_rate: f64) -> DvsResult<Self> {
        let decay = DecayTable::new(frame_interval, decay_rate)?;
        let colors = ColorTable::new();
        if colors.len() > usize::from(u16::MAX) {
            return Err(DvsError::validation("color table too large for u16 indices"));
        }
        tracing::debug!(
            frame_interval,
            decay_rate,
            decay_len = decay.len(),
            color_len = colors.len(),
            "lookup tables built"
        );
        Ok(Self {
            frame_interval,
            inv_interval: 1.0 / frame_interval as f64,
            decay,
            colors,
        })
    }

    pub fn frame_interval(&self) -> TimeUnits {
        self.frame_interval
    }

    pub fn decay(&self) -> &DecayTable {
        &self.decay
    }

    pub fn colors(&self) -> &ColorTable {
        &self.colors
    }

    /// Color-table index for a pixel last refreshed at `last_event`, seen at `boundary`.
    ///
    /// Anything that falls outside the decay curve or the ramp resolves to the background (0).
    pub fn color_index(&self, boundary: TimeUnits, last_event: TimeUnits) -> u16 {
        if last_event == NEVER {
            return 0;
        }
        let elapsed = (boundary - last_event) as f64 * self.inv_interval;
        if elapsed < 0.0 {
            return 0;
        }
        let Some(decayed) = self.decay.get(elapsed as usize) else {
            return 0;
        };
        let quantized = decayed as i64;
        if quantized >= 1 && (quantized as usize) < self.colors.len() {
            quantized as u16
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_table_is_non_increasing_and_ends_below_one() {
        for (interval, rate) in [(16_666, 0.15), (33_333, 0.5), (1_000, 0.01), (7, 0.9)] {
            let t = DecayTable::new(interval, rate).unwrap();
            let v = t.values();
            assert_eq!(v[0], PEAK_INTENSITY);
            assert!(v.windows(2).all(|w| w[1] <= w[0]), "{interval}/{rate}");
            assert!(*v.last().unwrap() < 1.0);
            assert!(v[..v.len() - 1].iter().all(|x| *x >= 1.0));
        }
    }

    #[test]
    fn decay_table_samples_every_second_interval() {
        let interval = 1_000;
        let t = DecayTable::new(interval, 0.15).unwrap();
        let expected_2 = PEAK_INTENSITY * 0.85f64.powf((1.0 + 2_000.0) / 1_000.0);
        assert!((t.get(2).unwrap() - expected_2).abs() < 1e-9);
    }

    #[test]
    fn decay_table_rejects_bad_parameters() {
        assert!(DecayTable::new(0, 0.15).is_err());
        assert!(DecayTable::new(100, 0.0).is_err());
        assert!(DecayTable::new(100, 1.0).is_err());
        assert!(DecayTable::new(100, f64::NAN).is_err());
    }

    #[test]
    fn decay_table_rejects_rates_too_slow_to_reach_zero() {
        for rate in [1e-9, 1e-17, 1e-5] {
            let err = DecayTable::new(33_333, rate).unwrap_err();
            assert!(err.to_string().contains("too small"), "{rate}: {err}");
        }
        let slow = DecayTable::new(33_333, 1e-3).unwrap();
        assert!(slow.len() < MAX_DECAY_ENTRIES);
        assert!(slow.values().last().copied().unwrap() < 1.0);
    }

    #[test]
    fn color_table_starts_black_and_matches_sweep_length() {
        let t = ColorTable::new();
        assert_eq!(t.len(), 511);
        assert_eq!(t.len(), COLOR_TABLE_LEN);
        assert_eq!(*t.color(0), Rgb8::BLACK);
    }

    #[test]
    fn color_table_is_shifted_by_one_hue_step() {
        let t = ColorTable::new();
        assert_eq!(*t.color(1), hue_to_rgb(1.0, 100.0, 100.0));
        assert_eq!(*t.color(2), hue_to_rgb(1.5, 100.0, 100.0));
        assert_eq!(*t.color(510), hue_to_rgb(255.5, 100.0, 100.0));
    }

    #[test]
    fn hue_wraps_at_full_turn() {
        assert_eq!(
            hue_to_rgb(0.0, 100.0, 100.0),
            hue_to_rgb(360.0, 100.0, 100.0)
        );
        assert_eq!(hue_to_rgb(0.0, 100.0, 100.0), Rgb8::new(255, 0, 0));
    }

    #[test]
    fn hue_sectors_follow_the_ramp_terms() {
        // 45 degrees: sector 0, f = 0.75, c = round(255 * 0.75) = 191.
        assert_eq!(hue_to_rgb(45.0, 100.0, 100.0), Rgb8::new(255, 191, 0));
        // 90 degrees: sector 1, f = 0.5, b = round(127.5) = 128.
        assert_eq!(hue_to_rgb(90.0, 100.0, 100.0), Rgb8::new(128, 255, 0));
        // 180 degrees: sector 3, f = 0.
        assert_eq!(hue_to_rgb(180.0, 100.0, 100.0), Rgb8::new(0, 255, 255));
        // 270 degrees: sector 4, f = 0.5.
        assert_eq!(hue_to_rgb(270.0, 100.0, 100.0), Rgb8::new(128, 0, 255));
    }

    #[test]
    fn hue_uses_value_in_third_term() {
        // With s = 0 a textbook conversion gives gray; here c still depends on v and f.
        let c = hue_to_rgb(45.0, 0.0, 100.0);
        assert_eq!(c, Rgb8::new(255, 191, 255));
    }

    #[test]
    fn color_index_walks_the_decay_curve() {
        // A fast decay keeps the truncated samples strictly apart all the way down.
        let lt = LookupTables::new(1_000, 0.5).unwrap();
        assert_eq!(lt.color_index(1_000, NEVER), 0);
        assert_eq!(lt.color_index(1_000, 2_000), 0);

        let mut last = u16::MAX;
        let mut reached_background = false;
        for frames in 1..64 {
            let idx = lt.color_index(frames * 1_000, 0);
            if reached_background {
                assert_eq!(idx, 0);
                continue;
            }
            if idx == 0 {
                reached_background = true;
                continue;
            }
            assert!(idx < last);
            last = idx;
        }
        assert!(reached_background);
    }

    #[test]
    fn color_index_truncates_decay_value() {
        let lt = LookupTables::new(1_000, 0.15).unwrap();
        let expected = lt.decay().get(1).unwrap() as u16;
        assert_eq!(lt.color_index(1_000, 0), expected);
        assert_eq!(lt.color_index(500, 0), 500);
    }
}
