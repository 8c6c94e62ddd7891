//! Trial alignment and accumulation.
//!
//! Each trial is captured as raw `(distance, force, time)` samples. On
//! `add_trial` the curve is anchored at its rupture sample (the force
//! maximum), resampled onto the canonical relative-time grid, and folded
//! into running statistics that survive across trials with bounded memory:
//! one accumulated point per grid time, regardless of how many trials run.

use crate::config::GridCfg;
use crate::error::AnalyzerError;

/// One raw capture sample. `time_ms` is relative to the contact trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time_ms: i32,
    pub distance_mm: f32,
    pub force_kg: f32,
}

/// Running statistics at one canonical relative time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulatedPoint {
    /// Relative time; 0 is the rupture instant.
    pub time_ms: i32,
    /// Mean stretch distance across trials.
    pub distance_mm: f32,
    /// Mean force across trials.
    pub force_kg: f32,
    pub min_kg: f32,
    pub max_kg: f32,
}

pub struct TestAnalyzer {
    grid: GridCfg,
    raw: Vec<Sample>,
    capacity: usize,
    points: Vec<AccumulatedPoint>,
}

impl TestAnalyzer {
    pub fn new(grid: GridCfg, raw_capacity: usize) -> Self {
        Self {
            grid,
            raw: Vec::with_capacity(raw_capacity.min(4096)),
            capacity: raw_capacity,
            points: Vec::with_capacity(grid.len()),
        }
    }

    /// Append a raw sample. Returns false (and appends nothing) once the
    /// buffer is full; the producer must stop the trial.
    pub fn add_point(&mut self, distance_mm: f32, force_kg: f32, time_ms: i32) -> bool {
        if self.raw.len() >= self.capacity {
            return false;
        }
        self.raw.push(Sample {
            time_ms,
            distance_mm,
            force_kg,
        });
        true
    }

    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Discard the raw buffer, keeping accumulated statistics.
    pub fn clear_data(&mut self) {
        self.raw.clear();
    }

    /// Discard everything, raw buffer and accumulated statistics.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.points.clear();
    }

    /// True when no trial has been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Accumulated curve in grid order.
    pub fn points(&self) -> &[AccumulatedPoint] {
        &self.points
    }

    /// Accumulated point at an exact canonical relative time, if present.
    pub fn point_at(&self, time_ms: i32) -> Option<&AccumulatedPoint> {
        self.points.iter().find(|p| p.time_ms == time_ms)
    }

    /// Index of the rupture sample: the first occurrence of the force
    /// maximum. None on an empty buffer.
    pub fn rupture_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, s) in self.raw.iter().enumerate() {
            match best {
                Some(b) if s.force_kg <= self.raw[b].force_kg => {}
                _ => best = Some(i),
            }
        }
        best
    }

    /// Align the captured trial on its rupture instant, resample it onto
    /// the grid, and fold it into the running statistics.
    ///
    /// `trial_index` is the number of trials already folded in; it is the
    /// weight of the existing mean. Fewer than two raw samples is a no-op.
    /// Timestamps must be strictly increasing or no resampling slope is
    /// defined.
    pub fn add_trial(&mut self, trial_index: u32) -> Result<(), AnalyzerError> {
        if self.raw.len() < 2 {
            tracing::debug!(samples = self.raw.len(), "trial too short, skipping");
            return Ok(());
        }
        if self.raw.windows(2).any(|w| w[1].time_ms <= w[0].time_ms) {
            return Err(AnalyzerError::NonMonotonicTime);
        }

        // rupture_index is Some: the buffer is non-empty here.
        let rupture = self.rupture_index().unwrap_or(0);
        let t0 = self.raw[rupture].time_ms;
        tracing::info!(
            trial_index,
            rupture_ms = t0,
            peak_kg = self.raw[rupture].force_kg,
            "folding trial"
        );

        let mut r = self.grid.start_ms;
        while r <= self.grid.end_ms {
            let (distance_mm, force_kg) = self.value_at(t0 + r);
            // Aligned force is physical; resampling artifacts below zero are clipped.
            let force_kg = force_kg.max(0.0);
            self.fold(r, distance_mm, force_kg, trial_index);
            r += self.grid.step_ms;
        }
        Ok(())
    }

    /// Linear resample of the raw curve at `target_ms`: interpolate between
    /// the bracketing samples, or extrapolate from the first (or last) pair
    /// when the target falls outside the capture.
    fn value_at(&self, target_ms: i32) -> (f32, f32) {
        let n = self.raw.len();
        let (a, b) = if target_ms < self.raw[0].time_ms {
            (&self.raw[0], &self.raw[1])
        } else if target_ms >= self.raw[n - 1].time_ms {
            (&self.raw[n - 2], &self.raw[n - 1])
        } else {
            // prev = last sample at or before target, next = first one after
            let mut i = 0;
            while i + 1 < n && self.raw[i + 1].time_ms <= target_ms {
                i += 1;
            }
            (&self.raw[i], &self.raw[i + 1])
        };
        // Strictly increasing timestamps guarantee dt > 0.
        let dt = (b.time_ms - a.time_ms) as f32;
        let u = (target_ms - a.time_ms) as f32 / dt;
        (
            a.distance_mm + (b.distance_mm - a.distance_mm) * u,
            a.force_kg + (b.force_kg - a.force_kg) * u,
        )
    }

    /// Find-or-create the accumulated point at `time_ms` and fold one
    /// aligned sample into it with running-mean weight `n`.
    fn fold(&mut self, time_ms: i32, distance_mm: f32, force_kg: f32, n: u32) {
        if let Some(p) = self.points.iter_mut().find(|p| p.time_ms == time_ms) {
            let w = n as f32;
            p.distance_mm = (p.distance_mm * w + distance_mm) / (w + 1.0);
            p.force_kg = (p.force_kg * w + force_kg) / (w + 1.0);
            p.min_kg = p.min_kg.min(force_kg);
            p.max_kg = p.max_kg.max(force_kg);
        } else {
            self.points.push(AccumulatedPoint {
                time_ms,
                distance_mm,
                force_kg,
                min_kg: force_kg,
                max_kg: force_kg,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> TestAnalyzer {
        TestAnalyzer::new(GridCfg::default(), 1000)
    }

    #[test]
    fn rupture_is_first_occurrence_of_max() {
        let mut a = analyzer();
        for (i, f) in [1.0, 3.0, 2.0, 3.0, 0.5].iter().enumerate() {
            assert!(a.add_point(i as f32, *f, i as i32 * 100));
        }
        assert_eq!(a.rupture_index(), Some(1));
    }

    #[test]
    fn add_trial_on_short_buffer_is_noop() {
        let mut a = analyzer();
        assert!(a.add_point(0.0, 1.0, 0));
        a.add_trial(0).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn add_trial_rejects_equal_timestamps() {
        let mut a = analyzer();
        assert!(a.add_point(0.0, 1.0, 100));
        assert!(a.add_point(0.1, 2.0, 100));
        assert_eq!(a.add_trial(0), Err(AnalyzerError::NonMonotonicTime));
    }

    #[test]
    fn buffer_full_reports_and_drops() {
        let mut a = TestAnalyzer::new(GridCfg::default(), 3);
        assert!(a.add_point(0.0, 1.0, 0));
        assert!(a.add_point(0.1, 2.0, 100));
        assert!(a.add_point(0.2, 3.0, 200));
        assert!(!a.add_point(0.3, 4.0, 300));
        assert_eq!(a.raw_len(), 3);
    }

    #[test]
    fn interpolates_between_brackets() {
        let mut a = TestAnalyzer::new(
            GridCfg {
                start_ms: -50,
                end_ms: 0,
                step_ms: 50,
            },
            100,
        );
        // Peak at t=200; grid target -50 lands between samples.
        assert!(a.add_point(0.0, 1.0, 0));
        assert!(a.add_point(1.0, 2.0, 100));
        assert!(a.add_point(2.0, 4.0, 200));
        a.add_trial(0).unwrap();
        let p = a.point_at(-50).unwrap();
        // halfway between (100, 2.0) and (200, 4.0)
        assert!((p.force_kg - 3.0).abs() < 1e-5);
        assert!((p.distance_mm - 1.5).abs() < 1e-5);
    }

    #[test]
    fn extrapolates_before_first_sample_and_clamps_force() {
        let mut a = TestAnalyzer::new(
            GridCfg {
                start_ms: -200,
                end_ms: 0,
                step_ms: 200,
            },
            100,
        );
        // Peak at t=100; target -100 is before the capture started.
        assert!(a.add_point(1.0, 0.5, 0));
        assert!(a.add_point(2.0, 5.0, 100));
        a.add_trial(0).unwrap();
        let p = a.point_at(-200).unwrap();
        // Raw extrapolation gives 0.5 - 4.5 = -4.0 kg; force clamps to 0.
        assert_eq!(p.force_kg, 0.0);
        // Distance is not clamped: 1.0 - 1.0 = 0.0.
        assert!((p.distance_mm - 0.0).abs() < 1e-5);
    }
}
