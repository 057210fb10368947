/// Colour helpers shared by exposure normalization and correction
///
/// All values are linear RGB in 0.0-1.0 unless a function says otherwise.

/// Rec. 709 luminance weights
pub const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Linear reflectance of the six neutral patches (white to black) of a
/// standard 24-patch chart
pub const REFERENCE_NEUTRALS: [f32; 6] = [0.900, 0.591, 0.362, 0.198, 0.090, 0.031];

/// Perceptual luminance of one linear RGB pixel
#[inline]
pub fn luminance(rgb: [f32; 3]) -> f32 {
    LUMA_WEIGHTS[0] * rgb[0] + LUMA_WEIGHTS[1] * rgb[1] + LUMA_WEIGHTS[2] * rgb[2]
}

/// sRGB transfer function, encoded -> linear
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB transfer function, linear -> encoded
pub fn linear_to_srgb(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Per-channel gains that map the measured neutral patches onto the
/// reference neutrals.
///
/// Returns unit gains when a channel of the measurement is black.
pub fn channel_gains(measured_neutrals: &[[f32; 3]]) -> [f32; 3] {
    let count = measured_neutrals.len().min(REFERENCE_NEUTRALS.len());
    if count == 0 {
        return [1.0; 3];
    }

    let target: f32 = REFERENCE_NEUTRALS[..count].iter().sum::<f32>() / count as f32;
    let mut gains = [1.0f32; 3];
    for (channel, gain) in gains.iter_mut().enumerate() {
        let mean = measured_neutrals[..count]
            .iter()
            .map(|patch| patch[channel])
            .sum::<f32>()
            / count as f32;
        if mean > f32::EPSILON && mean.is_finite() {
            *gain = target / mean;
        }
    }
    gains
}

/// Lift shadows / pull highlights on one linear value.
///
/// `shadows` and `highlights` are in -1.0..=1.0; 0.0 leaves the value alone.
pub fn tone(v: f32, shadows: f32, highlights: f32) -> f32 {
    let shadow_weight = (1.0 - v).clamp(0.0, 1.0).powi(2);
    let highlight_weight = v.clamp(0.0, 1.0).powi(2);
    v + shadows * 0.5 * shadow_weight * v.max(0.0).sqrt() + highlights * 0.5 * highlight_weight * v
}
