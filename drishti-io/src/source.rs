//! Device sample sources
//!
//! A [`DeviceSource`] produces complete device snapshots for the sampling
//! loop to publish. Hardware backends implement this trait; the built-in
//! [`MockSource`] synthesizes plausible motion for development and tests.

use crate::protocol::{DeviceLayout, DeviceState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces device state snapshots, one per sampling cycle
pub trait DeviceSource: Send {
    /// Layout of the devices this source samples
    fn layout(&self) -> DeviceLayout;

    /// Take one snapshot of all devices
    fn sample(&mut self) -> DeviceState;
}

/// Synthetic source: trackers orbit a circle at head height with a little
/// positional noise, buttons toggle slowly, valuators sweep sine waves.
pub struct MockSource {
    layout: DeviceLayout,
    rng: StdRng,
    tick: u64,
    /// Orbit angular velocity in radians per tick
    angle_step: f32,
    /// Orbit radius in meters
    radius: f32,
    /// Peak positional noise in meters
    jitter: f32,
}

impl MockSource {
    pub fn new(layout: DeviceLayout) -> Self {
        Self::with_seed(layout, 0x5EED)
    }

    /// A seeded source produces a reproducible motion sequence
    pub fn with_seed(layout: DeviceLayout, seed: u64) -> Self {
        Self {
            layout,
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            angle_step: 0.01,
            radius: 0.8,
            jitter: 0.002,
        }
    }
}

impl DeviceSource for MockSource {
    fn layout(&self) -> DeviceLayout {
        self.layout
    }

    fn sample(&mut self) -> DeviceState {
        let mut state = DeviceState::empty(self.layout);
        state.timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let omega = self.angle_step;
        for (i, tracker) in state.trackers.iter_mut().enumerate() {
            let phase = i as f32 * std::f32::consts::TAU / self.layout.num_trackers.max(1) as f32;
            let angle = self.tick as f32 * omega + phase;
            tracker.position = [
                self.radius * angle.cos() + self.rng.gen_range(-self.jitter..=self.jitter),
                1.5 + self.rng.gen_range(-self.jitter..=self.jitter),
                self.radius * angle.sin() + self.rng.gen_range(-self.jitter..=self.jitter),
            ];
            // Rotation about the vertical axis by the orbit angle
            tracker.orientation = [0.0, (angle * 0.5).sin(), 0.0, (angle * 0.5).cos()];
            tracker.linear_velocity = [
                -self.radius * omega * angle.sin(),
                0.0,
                self.radius * omega * angle.cos(),
            ];
            tracker.angular_velocity = [0.0, omega, 0.0];
        }

        for (i, button) in state.buttons.iter_mut().enumerate() {
            *button = (self.tick / 128 + i as u64) % 2 == 1;
        }

        for (i, valuator) in state.valuators.iter_mut().enumerate() {
            *valuator = (self.tick as f32 * omega + i as f32).sin();
        }

        self.tick += 1;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DeviceLayout {
        DeviceLayout {
            num_trackers: 2,
            num_buttons: 4,
            num_valuators: 2,
        }
    }

    #[test]
    fn test_sample_matches_layout() {
        let mut source = MockSource::new(layout());
        let state = source.sample();
        assert_eq!(state.trackers.len(), 2);
        assert_eq!(state.buttons.len(), 4);
        assert_eq!(state.valuators.len(), 2);
    }

    #[test]
    fn test_seeded_sources_agree() {
        let mut a = MockSource::with_seed(layout(), 7);
        let mut b = MockSource::with_seed(layout(), 7);
        for _ in 0..10 {
            let sa = a.sample();
            let sb = b.sample();
            assert_eq!(sa.trackers, sb.trackers);
            assert_eq!(sa.buttons, sb.buttons);
            assert_eq!(sa.valuators, sb.valuators);
        }
    }

    #[test]
    fn test_trackers_keep_moving() {
        let mut source = MockSource::new(layout());
        let first = source.sample();
        for _ in 0..50 {
            source.sample();
        }
        let later = source.sample();
        assert_ne!(first.trackers[0].position, later.trackers[0].position);
    }

    #[test]
    fn test_orientation_stays_normalized() {
        let mut source = MockSource::new(layout());
        for _ in 0..100 {
            let state = source.sample();
            for tracker in &state.trackers {
                let q = tracker.orientation;
                let norm = q.iter().map(|c| c * c).sum::<f32>().sqrt();
                assert!((norm - 1.0).abs() < 1e-4);
            }
        }
    }
}
