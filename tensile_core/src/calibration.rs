//! Runtime load-cell calibration: linear raw-counts → kilograms model.

/// kg = gain · (raw − zero). Fit from CSV data by `tensile_config`;
/// this is the form the capture loop applies per sample.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    /// Tare baseline in raw counts.
    pub zero_counts: i32,
    /// Kilograms per raw count.
    pub gain_kg_per_count: f32,
}

impl Calibration {
    /// Identity-ish default for simulation: 1000 counts per kilogram.
    pub fn sim() -> Self {
        Self {
            zero_counts: 0,
            gain_kg_per_count: 0.001,
        }
    }

    #[inline]
    pub fn to_kg(&self, raw: i32) -> f32 {
        (raw.wrapping_sub(self.zero_counts)) as f32 * self.gain_kg_per_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_around_tare() {
        let c = Calibration {
            zero_counts: 500,
            gain_kg_per_count: 0.01,
        };
        assert!((c.to_kg(500) - 0.0).abs() < 1e-6);
        assert!((c.to_kg(1500) - 10.0).abs() < 1e-4);
        assert!((c.to_kg(400) + 1.0).abs() < 1e-4);
    }
}
