//! Audio playback contract and the in-core filter graph: biquad filters,
//! the headset band-pass voicing, and click-free volume ramping.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::SimResult;

/// Audio file container produced by the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
}

/// Playback backend consumed by the narration orchestrator. The backend owns
/// the device and decode pipeline; volume setters must be called under
/// whatever lock the backend requires.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, path: &Path, start_paused: bool) -> SimResult<()>;
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn shutdown(&self);
    /// 0.0..=1.0
    fn set_volume(&self, volume: f64);
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    /// Time left in the current clip; None when nothing is playing
    fn remaining(&self) -> Option<Duration>;
    fn replay_last(&self) -> SimResult<()>;
    fn last_played_path(&self) -> Option<PathBuf>;
}

/// Filter response type for a biquad section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
}

/// Stereo biquad filter section with cookbook coefficients.
///
/// Coefficients follow the standard audio-EQ recipes: w = 2*pi*f/fs,
/// alpha = sin(w)/(2*Q); the difference equation is
/// y = (b0*x + b1*x1 + b2*x2 - a1*y1 - a2*y2) / a0 with per-channel state.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    b0: f64,
    b1: f64,
    b2: f64,
    a0: f64,
    a1: f64,
    a2: f64,
    /// (x1, x2, y1, y2) per channel
    state: [(f64, f64, f64, f64); 2],
}

impl BiquadFilter {
    pub fn new(kind: FilterKind, cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let cos_w = w.cos();
        let alpha = w.sin() / (2.0 * q);

        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => {
                let b1 = 1.0 - cos_w;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterKind::HighPass => {
                let b1 = -(1.0 + cos_w);
                ((1.0 + cos_w) / 2.0, b1, (1.0 + cos_w) / 2.0)
            }
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w;
        let a2 = 1.0 - alpha;

        Self {
            b0,
            b1,
            b2,
            a0,
            a1,
            a2,
            state: [(0.0, 0.0, 0.0, 0.0); 2],
        }
    }

    /// Process one sample on the given channel (0 = left, 1 = right).
    pub fn process(&mut self, channel: usize, x: f64) -> f64 {
        let (x1, x2, y1, y2) = self.state[channel & 1];
        let y = (self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2) / self.a0;
        self.state[channel & 1] = (x, x1, y, y1);
        y
    }

    pub fn reset(&mut self) {
        self.state = [(0.0, 0.0, 0.0, 0.0); 2];
    }
}

/// Butterworth Q for the headset voicing sections
const BUTTERWORTH_Q: f64 = 0.707;

/// Aviation-headset voicing: high-pass at 400 Hz into low-pass at 3500 Hz.
#[derive(Debug, Clone)]
pub struct HeadsetFilter {
    high_pass: BiquadFilter,
    low_pass: BiquadFilter,
}

impl HeadsetFilter {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            high_pass: BiquadFilter::new(FilterKind::HighPass, 400.0, BUTTERWORTH_Q, sample_rate),
            low_pass: BiquadFilter::new(FilterKind::LowPass, 3500.0, BUTTERWORTH_Q, sample_rate),
        }
    }

    pub fn process(&mut self, channel: usize, x: f64) -> f64 {
        self.low_pass.process(channel, self.high_pass.process(channel, x))
    }

    pub fn reset(&mut self) {
        self.high_pass.reset();
        self.low_pass.reset();
    }
}

/// Click-free gain: every sample steps the current gain toward the target by
/// |target - current| / (sample_rate * ramp_duration).
///
/// The effective target is baseline volume times an independent fade level,
/// so ducking for radio calls composes with the user volume setting.
#[derive(Debug, Clone)]
pub struct SmoothVolume {
    baseline: f64,
    fade_level: f64,
    current: f64,
    step: f64,
}

impl SmoothVolume {
    pub fn new(volume: f64) -> Self {
        Self {
            baseline: volume,
            fade_level: 1.0,
            current: volume,
            step: 0.0,
        }
    }

    fn retarget(&mut self, sample_rate: f64, ramp: Duration) {
        let target = self.target();
        let samples = sample_rate * ramp.as_secs_f64();
        self.step = if samples > 0.0 {
            (target - self.current).abs() / samples
        } else {
            f64::INFINITY
        };
    }

    pub fn target(&self) -> f64 {
        self.baseline * self.fade_level
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Change the baseline volume, ramping over `ramp`.
    pub fn set_target_volume(&mut self, volume: f64, sample_rate: f64, ramp: Duration) {
        self.baseline = volume.clamp(0.0, 1.0);
        self.retarget(sample_rate, ramp);
    }

    /// Change the fade level (ducking), ramping over `ramp`.
    pub fn fade_to(&mut self, level: f64, sample_rate: f64, ramp: Duration) {
        self.fade_level = level.clamp(0.0, 1.0);
        self.retarget(sample_rate, ramp);
    }

    /// Advance one sample and return the gain to apply.
    pub fn next_gain(&mut self) -> f64 {
        let target = self.target();
        if (self.current - target).abs() <= self.step {
            self.current = target;
        } else if self.current < target {
            self.current += self.step;
        } else {
            self.current -= self.step;
        }
        self.current
    }
}

/// Map a 0..=1 volume to a log-domain power offset: effectively silent at or
/// below 0.01, otherwise log2 of the volume added to the log-domain gain.
pub fn volume_to_power(volume: f64) -> Option<f64> {
    if volume <= 0.01 {
        return None;
    }
    Some(volume.log2())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48_000.0;

    /// Run a constant signal through and return the settled output
    fn settle(filter: &mut BiquadFilter, input: f64) -> f64 {
        let mut y = 0.0;
        for _ in 0..20_000 {
            y = filter.process(0, input);
        }
        y
    }

    #[test]
    fn test_low_pass_passes_dc() {
        let mut filter = BiquadFilter::new(FilterKind::LowPass, 1000.0, BUTTERWORTH_Q, SAMPLE_RATE);
        let y = settle(&mut filter, 1.0);
        assert!((y - 1.0).abs() < 1e-6, "DC through a low-pass: {}", y);
    }

    #[test]
    fn test_high_pass_blocks_dc() {
        let mut filter = BiquadFilter::new(FilterKind::HighPass, 400.0, BUTTERWORTH_Q, SAMPLE_RATE);
        let y = settle(&mut filter, 1.0);
        assert!(y.abs() < 1e-6, "DC through a high-pass: {}", y);
    }

    #[test]
    fn test_low_pass_attenuates_high_frequency() {
        let mut filter = BiquadFilter::new(FilterKind::LowPass, 1000.0, BUTTERWORTH_Q, SAMPLE_RATE);
        // 12 kHz tone, well above cutoff
        let mut peak: f64 = 0.0;
        for n in 0..10_000 {
            let x = (2.0 * std::f64::consts::PI * 12_000.0 * n as f64 / SAMPLE_RATE).sin();
            let y = filter.process(0, x);
            if n > 5_000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.05, "12 kHz through 1 kHz low-pass: peak {}", peak);
    }

    #[test]
    fn test_filter_is_stable() {
        let mut filter = BiquadFilter::new(FilterKind::HighPass, 400.0, BUTTERWORTH_Q, SAMPLE_RATE);
        let mut y = 0.0f64;
        for n in 0..100_000 {
            let x = (n as f64 * 0.37).sin() + (n as f64 * 1.13).cos();
            y = filter.process(0, x);
            assert!(y.is_finite());
        }
        assert!(y.abs() < 10.0, "bounded output for bounded input");
    }

    #[test]
    fn test_channels_have_independent_state() {
        let mut filter = BiquadFilter::new(FilterKind::LowPass, 1000.0, BUTTERWORTH_Q, SAMPLE_RATE);
        for _ in 0..1000 {
            filter.process(0, 1.0);
        }
        // Right channel never saw a sample; its first output is tiny
        let y = filter.process(1, 1.0);
        assert!(y < 0.1, "right channel state untouched: {}", y);
    }

    #[test]
    fn test_headset_filter_band() {
        let mut filter = HeadsetFilter::new(SAMPLE_RATE);
        // In-band 1 kHz tone mostly survives
        let mut in_band: f64 = 0.0;
        for n in 0..20_000 {
            let x = (2.0 * std::f64::consts::PI * 1000.0 * n as f64 / SAMPLE_RATE).sin();
            let y = filter.process(0, x);
            if n > 10_000 {
                in_band = in_band.max(y.abs());
            }
        }
        filter.reset();
        // 60 Hz rumble is rejected
        let mut rumble: f64 = 0.0;
        for n in 0..20_000 {
            let x = (2.0 * std::f64::consts::PI * 60.0 * n as f64 / SAMPLE_RATE).sin();
            let y = filter.process(0, x);
            if n > 10_000 {
                rumble = rumble.max(y.abs());
            }
        }
        assert!(in_band > 0.7, "1 kHz passes: {}", in_band);
        assert!(rumble < 0.1, "60 Hz rejected: {}", rumble);
    }

    #[test]
    fn test_smooth_volume_ramps_linearly() {
        let mut volume = SmoothVolume::new(0.0);
        volume.set_target_volume(1.0, 100.0, Duration::from_secs(1));
        // 100 samples at step 0.01 reach the target, monotonically
        let mut previous = 0.0;
        for _ in 0..100 {
            let gain = volume.next_gain();
            assert!(gain >= previous);
            previous = gain;
        }
        assert!((volume.current() - 1.0).abs() < 1e-9);
        // Settled: further samples hold the target
        assert_eq!(volume.next_gain(), 1.0);
    }

    #[test]
    fn test_fade_composes_with_baseline() {
        let mut volume = SmoothVolume::new(0.8);
        volume.fade_to(0.5, 100.0, Duration::from_millis(10));
        assert!((volume.target() - 0.4).abs() < 1e-9, "0.8 x 0.5");
        for _ in 0..10 {
            volume.next_gain();
        }
        assert!((volume.current() - 0.4).abs() < 1e-9);

        // Restoring the fade returns to the baseline
        volume.fade_to(1.0, 100.0, Duration::from_millis(10));
        for _ in 0..10 {
            volume.next_gain();
        }
        assert!((volume.current() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_volume_to_power_mapping() {
        assert_eq!(volume_to_power(0.0), None);
        assert_eq!(volume_to_power(0.01), None, "threshold is silent");
        assert_eq!(volume_to_power(1.0), Some(0.0));
        let half = volume_to_power(0.5).unwrap();
        assert!((half - (-1.0)).abs() < 1e-9, "half volume is -1 octave");
    }
}
