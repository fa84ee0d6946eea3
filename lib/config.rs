//! Physical parameters of the NV–carbon system and their external sources.

use std::collections::BTreeMap;
use serde::{ Deserialize, Serialize };
use crate::error::{ Error, Result };

// gyromagnetic ratios [Hz / G]
pub const GAMMA_C13: f64 = 1.0705e3;
pub const GAMMA_N14: f64 = 0.31e3;

// host-nitrogen couplings [Hz]
pub const P_N14: f64 = 5.04e6;
pub const A_N14: f64 = 2.19e6;

/// Default bias field [G].
pub const B_FIELD_DEFAULT: f64 = 414.1871869;

/// Which electron spin transition the microwaves address.
///
/// Addressing the `ms = −1` transition flips the sign of the hyperfine
/// couplings as seen by the nuclei.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EspinTrans {
    #[default]
    #[serde(rename = "+1")]
    Plus,
    #[serde(rename = "-1")]
    Minus,
}

impl EspinTrans {
    /// Sign applied to the hyperfine couplings and the detuning term.
    pub fn sign(self) -> f64 {
        match self {
            Self::Plus => 1.0,
            Self::Minus => -1.0,
        }
    }
}

/// Hyperfine coupling of a single ¹³C spin [Hz].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperfineParams {
    /// Component parallel to the NV axis.
    pub par: f64,
    /// Component perpendicular to the NV axis.
    pub perp: f64,
}

/// Shape of the microwave drive envelope.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PulseShape {
    #[default]
    Square,
    Hermite,
}

/// Microwave pulse parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PulseParams {
    /// Pulse duration [s].
    pub duration: f64,
    /// Envelope shape.
    pub shape: PulseShape,
    /// Mean drive amplitude, as a fraction of the calibrated π amplitude.
    pub mean_amp: f64,
    /// Explicit envelope normalization, overriding the discretized-integral
    /// normalization. Useful when envelope oscillations break the automatic
    /// one.
    pub norm_override: Option<f64>,
    /// Left-apply a corrective detuning rotation after shaped pulses.
    pub compensate_detuning: bool,
    /// Detuning used for that correction [Hz]; falls back to the ambient NV
    /// detuning.
    pub mw_detuning: Option<f64>,
    /// Number of integration sub-intervals for shaped pulses.
    pub steps: usize,
}

impl Default for PulseParams {
    fn default() -> Self {
        Self {
            duration: 10.0e-9,
            shape: PulseShape::Square,
            mean_amp: 1.0,
            norm_override: None,
            compensate_detuning: false,
            mw_detuning: None,
            steps: 300,
        }
    }
}

/// Static configuration of a spin system.
///
/// Consumed by [`NvSystem::new`][crate::hamiltonian::NvSystem::new]; runtime
/// changes go through the `NvSystem` setters, which keep the derived caches
/// consistent.
#[derive(Clone, Debug, PartialEq)]
pub struct SpinSystemConfig {
    /// Bias magnetic field [G].
    pub b_field: f64,
    /// Addressed electron spin transition.
    pub espin_trans: EspinTrans,
    /// Hyperfine parameters of the included carbons.
    pub carbons: Vec<HyperfineParams>,
    /// Include the host nitrogen spin in the Hilbert space.
    pub inc_nitrogen: bool,
    /// Initial NV microwave detuning [Hz].
    pub nv_detuning: f64,
    /// Microwave pulse parameters.
    pub pulse: PulseParams,
}

impl Default for SpinSystemConfig {
    fn default() -> Self {
        Self {
            b_field: B_FIELD_DEFAULT,
            espin_trans: EspinTrans::Plus,
            carbons: Vec::new(),
            inc_nitrogen: false,
            nv_detuning: 0.0,
            pulse: PulseParams::default(),
        }
    }
}

impl SpinSystemConfig {
    /// Carbon parameters taken from measurement calibration data.
    pub fn from_msmt_params() -> Result<Self> {
        Err(Error::NotImplemented("measurement-calibrated carbon parameters"))
    }
}

/// External hyperfine-parameter table, keyed by carbon label.
///
/// ```toml
/// espin_trans = "+1"
///
/// [C1]
/// par = 35.0e3
/// perp = -33.0e3
///
/// [C2]
/// par = 21.2e3
/// perp = 43.0e3
/// ```
///
/// Labels iterate in sorted order, so `C1`, `C2`, … land in a stable carbon
/// numbering.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HyperfineTable {
    /// Optional transition selection carried by the table.
    #[serde(default)]
    pub espin_trans: Option<EspinTrans>,
    /// Per-carbon couplings.
    #[serde(flatten)]
    pub carbons: BTreeMap<String, HyperfineParams>,
}

impl HyperfineTable {
    /// Parse a table from TOML text.
    pub fn from_toml_str(doc: &str) -> Result<Self> {
        Ok(toml::from_str(doc)?)
    }

    /// Couplings in sorted label order.
    pub fn params(&self) -> Vec<HyperfineParams> {
        self.carbons.values().copied().collect()
    }

    /// Replace a configuration's carbon set (and possibly its transition
    /// selection) with the table's contents.
    pub fn apply_to(&self, config: &mut SpinSystemConfig) {
        config.carbons = self.params();
        if let Some(trans) = self.espin_trans {
            config.espin_trans = trans;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "
espin_trans = \"-1\"

[C2]
par = 21.2e3
perp = 43.0e3

[C1]
par = 35.0e3
perp = -33.0e3
";

    #[test]
    fn table_labels_sorted() {
        let table = HyperfineTable::from_toml_str(TABLE).unwrap();
        let params = table.params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].par, 35.0e3);
        assert_eq!(params[1].perp, 43.0e3);
    }

    #[test]
    fn table_overrides_transition() {
        let table = HyperfineTable::from_toml_str(TABLE).unwrap();
        let mut config = SpinSystemConfig::default();
        table.apply_to(&mut config);
        assert_eq!(config.espin_trans, EspinTrans::Minus);
        assert_eq!(config.carbons.len(), 2);
    }

    #[test]
    fn bad_table_is_an_error() {
        assert!(HyperfineTable::from_toml_str("[C1]\npar = \"oops\"").is_err());
    }

    #[test]
    fn msmt_params_unimplemented() {
        assert!(matches!(
            SpinSystemConfig::from_msmt_params(),
            Err(Error::NotImplemented(_)),
        ));
    }
}
