//! Brune point-source spectrum quantities.

/// Seismic moment (dyne-cm) from moment magnitude.
pub fn moment_from_magnitude(magnitude: f64) -> f64 {
    10f64.powf(1.5 * magnitude + 16.05)
}

/// Brune (1970) source corner frequency (Hz).
///
/// `stress_drop` in bars, `shear_vel` in km/s, `moment` in dyne-cm.
pub fn brune_f0(moment: f64, stress_drop: f64, shear_vel: f64) -> f64 {
    4.9e6 * shear_vel * (stress_drop / moment).powf(1.0 / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_moment_scale() {
        // One magnitude unit is a factor of 10^1.5 in moment
        let ratio = moment_from_magnitude(6.0) / moment_from_magnitude(5.0);
        assert_relative_eq!(ratio, 10f64.powf(1.5), max_relative = 1e-12);
    }

    #[test]
    fn test_f0_decreases_with_magnitude() {
        let f0_small = brune_f0(moment_from_magnitude(4.0), 10.0, 3.7);
        let f0_large = brune_f0(moment_from_magnitude(7.0), 10.0, 3.7);
        assert!(f0_small > f0_large);
        // M6.5, 10 bars: corner frequency sits in the fraction-of-a-Hz range
        let f0 = brune_f0(moment_from_magnitude(6.5), 10.0, 3.7);
        assert!(f0 > 0.01 && f0 < 1.0);
    }
}
