//! Hierarchical engine configuration.
//!
//! A built-in default document is overlaid key-by-key with user YAML
//! documents: mappings merge recursively, sequences replace wholesale (so a
//! user-supplied `processing` list fully reorders the program).

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{GmError, GmResult};

/// One entry of the processing program: a single-key map of
/// step name to its argument mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStepConfig(pub BTreeMap<String, serde_yaml::Value>);

impl ProcessingStepConfig {
    /// The step name; exactly one key is required.
    pub fn name(&self) -> GmResult<&str> {
        if self.0.len() != 1 {
            return Err(GmError::Config(
                "each processing step must contain exactly one key".to_string(),
            ));
        }
        Ok(self.0.keys().next().map(|s| s.as_str()).unwrap_or(""))
    }

    pub fn args(&self) -> &serde_yaml::Value {
        static NULL: serde_yaml::Value = serde_yaml::Value::Null;
        self.0.values().next().unwrap_or(&NULL)
    }
}

/// Deserialize step arguments into a typed parameter struct.
/// Null arguments produce the defaults.
pub fn parse_args<T: DeserializeOwned + Default>(args: &serde_yaml::Value) -> GmResult<T> {
    match args {
        serde_yaml::Value::Null => Ok(T::default()),
        other => serde_yaml::from_value(other.clone())
            .map_err(|e| GmError::Config(format!("invalid step arguments: {e}"))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalEndConfig {
    /// "model", "source_path", "velocity", "magnitude", or "none"
    pub method: String,
    /// Duration-model abbreviation for method = "model"
    pub model: String,
    /// Number of standard deviations added to the model duration
    pub epsilon: f64,
    /// Assumed S-wave group velocity (km/s) for method = "velocity"
    pub vmin: f64,
    /// Minimum duration (s) for method = "velocity"
    pub floor: f64,
    /// Stress drop (bars) for method = "source_path"
    pub stress_drop: f64,
    /// Constant term (s) for method = "source_path"
    pub dur0: f64,
    /// Distance term (s/km) for method = "source_path"
    pub dur1: f64,
}

impl Default for SignalEndConfig {
    fn default() -> Self {
        Self {
            method: "model".to_string(),
            model: "AS16".to_string(),
            epsilon: 3.0,
            vmin: 1.0,
            floor: 120.0,
            stress_drop: 10.0,
            dur0: 0.0,
            dur1: 0.07,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowChecksConfig {
    pub enabled: bool,
    pub min_noise_duration: f64,
    pub min_signal_duration: f64,
}

impl Default for WindowChecksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_noise_duration: 0.5,
            min_signal_duration: 5.0,
        }
    }
}

/// Per-tectonic-region override of the signal-end settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionOverride {
    pub signal_end: Option<SignalEndConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// Treat the whole record as signal (split = record start)
    pub no_noise: bool,
    pub signal_end: SignalEndConfig,
    pub window_checks: WindowChecksConfig,
    pub regions: BTreeMap<String, RegionOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckStreamConfig {
    /// Fail the whole stream when any single trace fails
    pub any_trace_failures: bool,
}

impl Default for CheckStreamConfig {
    fn default() -> Self {
        Self {
            any_trace_failures: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelTimeConfig {
    /// Name of the 1-D earth model
    pub model: String,
    /// Crustal P velocity (km/s)
    pub crustal_velocity: f64,
    /// Sub-Moho P velocity (km/s)
    pub mantle_velocity: f64,
    /// Moho depth (km)
    pub moho_depth: f64,
}

impl Default for TravelTimeConfig {
    fn default() -> Self {
        Self {
            model: "iasp91".to_string(),
            crustal_velocity: 6.1,
            mantle_velocity: 8.05,
            moho_depth: 35.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArPickerConfig {
    /// Bandpass corners (Hz) applied before picking
    pub f1: f64,
    pub f2: f64,
    /// LTA/STA lengths for the characteristic function (s)
    pub lta_p: f64,
    pub sta_p: f64,
    /// AR model order
    pub m_p: usize,
    /// Length of the variance windows (s)
    pub l_p: f64,
}

impl Default for ArPickerConfig {
    fn default() -> Self {
        Self {
            f1: 1.0,
            f2: 20.0,
            lta_p: 1.0,
            sta_p: 0.1,
            m_p: 2,
            l_p: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaerPickerConfig {
    /// Threshold to trigger the pick (characteristic-function units)
    pub thr1: f64,
    /// Threshold to keep the pick
    pub thr2: f64,
    /// Trigger duration (samples) needed to confirm
    pub tdownmax: usize,
    pub tupevent: usize,
}

impl Default for BaerPickerConfig {
    fn default() -> Self {
        Self {
            thr1: 10.0,
            thr2: 20.0,
            tdownmax: 20,
            tupevent: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerPickerConfig {
    pub highpass: f64,
    pub lowpass: f64,
    pub order: usize,
    /// Short-term windows (s)
    pub sta: f64,
    pub sta2: f64,
    /// Long-term window (s)
    pub lta: f64,
    /// Hanning smoothing window (s)
    pub hanning_window: f64,
    pub thresh_detect: f64,
    pub thresh_detect2: f64,
    pub thresh_restart: f64,
}

impl Default for PowerPickerConfig {
    fn default() -> Self {
        Self {
            highpass: 1.4,
            lowpass: 6.0,
            order: 3,
            sta: 3.0,
            sta2: 3.0,
            lta: 20.0,
            hanning_window: 3.0,
            thresh_detect: 2.0,
            thresh_detect2: 2.5,
            thresh_restart: 99999999.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KalkanPickerConfig {
    /// Oscillator period (s); if unset, chosen from the sampling rate
    pub period: Option<f64>,
    /// Oscillator damping ratio
    pub damping: f64,
    /// Number of histogram bins for the state level
    pub nbins: Option<usize>,
}

impl Default for KalkanPickerConfig {
    fn default() -> Self {
        Self {
            period: None,
            damping: 0.6,
            nbins: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PickersConfig {
    /// Constant shift (s) applied to the split; negative moves it earlier
    pub p_arrival_shift: f64,
    /// Pickers to run, in order
    pub methods: Vec<String>,
    /// How in-window candidates are combined ("median")
    pub combine: String,
    /// Acceptance window (s) around the travel-time estimate
    pub window: f64,
    /// Warn when candidate spread exceeds this many seconds
    pub pick_travel_time_warning: f64,
    pub travel_time: TravelTimeConfig,
    pub ar: ArPickerConfig,
    pub baer: BaerPickerConfig,
    pub power: PowerPickerConfig,
    pub kalkan: KalkanPickerConfig,
}

impl Default for PickersConfig {
    fn default() -> Self {
        Self {
            p_arrival_shift: -1.0,
            methods: vec![
                "ar".to_string(),
                "baer".to_string(),
                "power".to_string(),
                "kalkan".to_string(),
            ],
            combine: "median".to_string(),
            window: 10.0,
            pick_travel_time_warning: 3.0,
            travel_time: TravelTimeConfig::default(),
            ar: ArPickerConfig::default(),
            baer: BaerPickerConfig::default(),
            power: PowerPickerConfig::default(),
            kalkan: KalkanPickerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaParameters {
    /// Oscillator periods (s)
    pub periods: Vec<f64>,
    /// Damping ratios
    pub damping: Vec<f64>,
    /// Upsampling factor numerator in ns = floor(ns_factor * dt / T - 0.01) + 1
    pub ns_factor: f64,
}

impl Default for SaParameters {
    fn default() -> Self {
        Self {
            periods: vec![0.1, 0.2, 0.3, 0.5, 1.0, 2.0, 3.0],
            damping: vec![0.05],
            ns_factor: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyGrid {
    pub start: f64,
    pub stop: f64,
    pub count: usize,
}

impl Default for FrequencyGrid {
    fn default() -> Self {
        Self {
            start: 0.01,
            stop: 50.0,
            count: 301,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FasParameters {
    pub smoothing_parameter: f64,
    pub frequencies: FrequencyGrid,
}

impl Default for FasParameters {
    fn default() -> Self {
        Self {
            smoothing_parameter: 188.5,
            frequencies: FrequencyGrid::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationParameters {
    /// Arias-intensity intervals, e.g. "5-75"
    pub intervals: Vec<String>,
}

impl Default for DurationParameters {
    fn default() -> Self {
        Self {
            intervals: vec!["5-75".to_string(), "5-95".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CavParameters {
    /// Acceleration threshold (cm/s^2); samples below it do not accumulate
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeParameters {
    pub sa: SaParameters,
    pub fas: FasParameters,
    pub duration: DurationParameters,
    pub cav: CavParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentParameters {
    pub rotd_percentiles: Vec<f64>,
    /// Rotation-angle increment (deg)
    pub rotation_delta_deg: f64,
}

impl Default for ComponentParameters {
    fn default() -> Self {
        Self {
            rotd_percentiles: vec![50.0],
            rotation_delta_deg: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Component name -> metric types computed for it
    pub components_and_types: BTreeMap<String, Vec<String>>,
    pub component_parameters: ComponentParameters,
    pub type_parameters: TypeParameters,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let mut components_and_types = BTreeMap::new();
        components_and_types.insert(
            "channels".to_string(),
            vec![
                "pga".to_string(),
                "pgv".to_string(),
                "sa".to_string(),
                "arias".to_string(),
                "cav".to_string(),
                "duration".to_string(),
                "sorted_duration".to_string(),
                "fas".to_string(),
            ],
        );
        components_and_types.insert(
            "rotd".to_string(),
            vec!["pga".to_string(), "pgv".to_string(), "sa".to_string()],
        );
        components_and_types.insert(
            "geometric_mean".to_string(),
            vec!["pga".to_string(), "sa".to_string()],
        );
        Self {
            components_and_types,
            component_parameters: ComponentParameters::default(),
            type_parameters: TypeParameters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Integrate in the frequency domain (vs cumulative trapezoid)
    pub frequency: bool,
    /// Initial value of the integrated series
    pub initial: f64,
    /// Remove the mean before integrating
    pub demean: bool,
    pub taper: bool,
    pub taper_width: f64,
    pub taper_side: String,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            frequency: true,
            initial: 0.0,
            demean: false,
            taper: false,
            taper_width: 0.05,
            taper_side: "both".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentiationConfig {
    pub frequency: bool,
}

impl Default for DifferentiationConfig {
    fn default() -> Self {
        Self { frequency: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColocatedConfig {
    pub enabled: bool,
    /// Instrument-code preference, most preferred first
    pub preference: Vec<String>,
}

impl Default for ColocatedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preference: vec![
                "HN".to_string(),
                "BN".to_string(),
                "HH".to_string(),
                "BH".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Maximum distance (m) for two stations to count as the same site
    pub max_dist_tolerance: f64,
    pub preference_order: Vec<String>,
    pub process_level_preference: Vec<String>,
    pub format_preference: Vec<String>,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            max_dist_tolerance: 500.0,
            preference_order: vec![
                "process_level".to_string(),
                "source_format".to_string(),
                "starttime".to_string(),
                "npts".to_string(),
                "sampling_rate".to_string(),
                "location_code".to_string(),
            ],
            process_level_preference: vec!["V1".to_string(), "V0".to_string(), "V2".to_string()],
            format_preference: vec!["cosmos".to_string(), "dmg".to_string()],
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processing: Vec<ProcessingStepConfig>,
    pub windows: WindowsConfig,
    pub check_stream: CheckStreamConfig,
    pub pickers: PickersConfig,
    pub metrics: MetricsConfig,
    pub integration: IntegrationConfig,
    pub differentiation: DifferentiationConfig,
    pub colocated: ColocatedConfig,
    pub duplicate: DuplicateConfig,
    /// Tectonic regime -> duration-model abbreviation
    pub gmm_selection: BTreeMap<String, String>,
}

/// Default processing program, in execution order.
const DEFAULT_PROCESSING: &str = r#"
- check_free_field:
    reject_non_free_field: true
- check_instrument:
    n_max: 3
    n_min: 2
    require_two_horiz: true
- min_sample_rate:
    min_sps: 20.0
- check_max_amplitude:
    min: 5.0
    max: 2.0e6
- remove_response:
    pre_filt: true
    f1: 0.001
    f2: 0.005
    water_level: 60.0
- detrend:
    detrending_method: linear
- detrend:
    detrending_method: demean
- check_clipping:
    threshold: 0.2
- compute_snr:
    bandwidth: 20.0
- snr_check:
    threshold: 3.0
    min_freq: f0
    max_freq: 5.0
- get_corner_frequencies:
    method: snr
- lowpass_max_frequency:
    fn_fac: 0.75
    lp_max: 40.0
- cut:
    sec_before_split: 2.0
- detrend:
    detrending_method: pre
- taper:
    width: 0.05
    side: both
- highpass_filter:
    frequency_domain: true
    filter_order: 5
    number_of_passes: 1
- lowpass_filter:
    frequency_domain: true
    filter_order: 5
    number_of_passes: 1
- detrend:
    detrending_method: baseline_sixth_order
- check_tail:
    duration: 5.0
    max_vel_ratio: 0.3
    max_dis_ratio: 0.9
"#;

fn default_processing() -> Vec<ProcessingStepConfig> {
    serde_yaml::from_str(DEFAULT_PROCESSING).expect("built-in processing program is valid YAML")
}

impl Default for Config {
    fn default() -> Self {
        let mut gmm_selection = BTreeMap::new();
        gmm_selection.insert("ActiveShallow".to_string(), "AS16".to_string());
        gmm_selection.insert("StableShallow".to_string(), "AS16".to_string());
        gmm_selection.insert("Subduction".to_string(), "AS16".to_string());
        Self {
            processing: default_processing(),
            windows: WindowsConfig::default(),
            check_stream: CheckStreamConfig::default(),
            pickers: PickersConfig::default(),
            metrics: MetricsConfig::default(),
            integration: IntegrationConfig::default(),
            differentiation: DifferentiationConfig::default(),
            colocated: ColocatedConfig::default(),
            duplicate: DuplicateConfig::default(),
            gmm_selection,
        }
    }
}

impl Config {
    /// Build a configuration from the defaults overlaid with user YAML
    /// documents, applied in order.
    pub fn from_overlays(documents: &[&str]) -> GmResult<Self> {
        let mut base = serde_yaml::to_value(Config::default())
            .map_err(|e| GmError::Serialization(e.to_string()))?;
        for doc in documents {
            let overlay: serde_yaml::Value = serde_yaml::from_str(doc)
                .map_err(|e| GmError::Config(format!("invalid config document: {e}")))?;
            merge_yaml(&mut base, overlay);
        }
        serde_yaml::from_value(base).map_err(|e| GmError::Config(format!("invalid config: {e}")))
    }

    /// Signal-end settings for a tectonic region, falling back to the
    /// global settings when the region has no override.
    pub fn signal_end_for_region(&self, region: Option<&str>) -> &SignalEndConfig {
        if let Some(name) = region {
            if let Some(ov) = self.windows.regions.get(name) {
                if let Some(se) = &ov.signal_end {
                    return se;
                }
            }
        }
        &self.windows.signal_end
    }
}

/// Recursive overlay merge: mappings merge key-by-key, everything else
/// (including sequences) replaces the base value.
pub fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                if base_map.contains_key(&key) {
                    if let Some(existing) = base_map.get_mut(&key) {
                        merge_yaml(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}
