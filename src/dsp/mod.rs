//! Leaf numerical kernels: FFT, spectral smoothing, filter design,
//! integration, polynomial fitting, and resampling.

pub mod butterworth;
pub mod fft;
pub mod integrate;
pub mod polyfit;
pub mod resample;
pub mod smoothing;
pub mod sosfilt;
pub mod window;

pub use butterworth::{butter_sos, magnitude_response, FilterBand};
pub use fft::{amplitude_spectrum, irfft, next_pow_2, rfft, rfft_freqs};
pub use integrate::{cumtrapz, differentiate_frequency, differentiate_gradient, integrate_frequency};
pub use polyfit::{polyfit, polyval};
pub use resample::{lanczos_resample_to_rate, lanczos_upsample};
pub use smoothing::{konno_ohmachi_smooth, log_spaced, smoothing_center_frequencies};
pub use sosfilt::{sosfilt, sosfiltfilt, Biquad};
pub use window::{cosine_sac_taper, hann_taper, TaperSide};
