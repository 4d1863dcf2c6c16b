use a3d_core::{VOLUME_MAX, VOLUME_MIN};

/// Absorption above which the gain is scaled down to mimic lost highs.
const ALPHA_THRESHOLD: f32 = 0.4;
const ALPHA_SLOPE: f32 = 1.67;

/// Gains below this are treated as silence.
const SILENCE: f32 = 0.000_01;

/// Apply the high-frequency absorption correction to a linear gain.
pub fn corrected_gain(gain: f32, alpha: f32) -> f32 {
    if alpha > ALPHA_THRESHOLD {
        gain * (ALPHA_SLOPE - ALPHA_SLOPE * alpha)
    } else {
        gain
    }
}

/// Convert a linear gain to backend volume (hundredths of a decibel).
pub fn gain_to_volume(gain: f32) -> i32 {
    if gain.is_nan() || gain < SILENCE {
        return VOLUME_MIN;
    }
    let volume = (gain.log10() * 2000.0) as i32;
    volume.clamp(VOLUME_MIN, VOLUME_MAX)
}

/// Volume for an averaged gain with absorption `alpha`.
pub fn volume_for(gain: f32, alpha: f32) -> i32 {
    gain_to_volume(corrected_gain(gain, alpha))
}
