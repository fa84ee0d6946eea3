//! Experiment state: density-matrix ownership, sequence application, and
//! Born-rule measurement.

use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use crate::{
    error::Result,
    hamiltonian::NvSystem,
    operators::ops,
    sequence::{ Bindings, GateSequence },
};

/// Canonical initial state: electron in ms = 0, every nuclear spin maximally
/// mixed.
pub fn thermal_state(sys: &NvSystem) -> nd::Array2<C64> {
    let t = ops();
    let sp = sys.space();
    let mut rho = t.rho0.clone();
    for _ in 0..sp.num_carbons {
        rho = kron(&rho, &t.rhom);
    }
    if sp.inc_nitrogen {
        rho = kron(&rho, &t.rhom_s1);
    }
    rho
}

/// Owns the system's density matrix across sequence applications and
/// measurements.
#[derive(Clone, Debug)]
pub struct Experiment {
    initial_override: Option<nd::Array2<C64>>,
    output: nd::Array2<C64>,
}

impl Experiment {
    /// New experiment in the canonical initial state of `sys`.
    pub fn new(sys: &NvSystem) -> Self {
        Self {
            initial_override: None,
            output: thermal_state(sys),
        }
    }

    /// The state experiments reset to: the snapshot if one is set, else the
    /// canonical initial state.
    pub fn initial_state(&self, sys: &NvSystem) -> nd::Array2<C64> {
        self.initial_override.clone()
            .unwrap_or_else(|| thermal_state(sys))
    }

    /// Replace (or, with `None`, clear) the initial-state snapshot, then
    /// reset the output state to it.
    ///
    /// Chaining a preparation sequence's output as the next experiment's
    /// initial state goes through here.
    pub fn reset_initial(&mut self, sys: &NvSystem, state: Option<nd::Array2<C64>>) {
        self.initial_override = state;
        self.reset_output(sys);
    }

    /// Reset the output state to the initial state.
    pub fn reset_output(&mut self, sys: &NvSystem) {
        self.output = self.initial_state(sys);
    }

    /// The current output density matrix.
    pub fn output(&self) -> &nd::Array2<C64> { &self.output }

    /// Apply a gate sequence to the output state in place.
    pub fn apply(
        &mut self,
        seq: &GateSequence,
        sys: &mut NvSystem,
        bindings: &Bindings,
        reps: usize,
        normalize: bool,
    ) -> Result<()>
    {
        self.output = seq.apply(&self.output, sys, bindings, reps, normalize)?;
        Ok(())
    }

    /// Born-rule probability re tr(P·ρ).
    ///
    /// The imaginary residue of the trace is numerical noise and is
    /// discarded.
    pub fn measure(&self, projector: &nd::Array2<C64>) -> f64 {
        projector.dot(&self.output).diag().iter().sum::<C64>().re
    }

    /// Probability of finding the electron in ms = 0.
    pub fn measure_e0(&self, sys: &NvSystem) -> f64 {
        self.measure(&sys.space().e_op(&ops().rho0))
    }

    /// Probability of finding the electron in ms = 1.
    pub fn measure_e1(&self, sys: &NvSystem) -> f64 {
        self.measure(&sys.space().e_op(&ops().rho1))
    }

    /// Probability of a 2×2 projector on carbon `c_num` (1-indexed).
    pub fn measure_c(
        &self,
        sys: &NvSystem,
        projector: &nd::Array2<C64>,
        c_num: usize,
    ) -> Result<f64>
    {
        Ok(self.measure(&sys.space().c_op(projector, c_num)?))
    }

    /// Probability of a 3×3 projector on the nitrogen.
    pub fn measure_n(&self, sys: &NvSystem, projector: &nd::Array2<C64>)
        -> Result<f64>
    {
        Ok(self.measure(&sys.space().n_op(projector)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ HyperfineParams, PulseParams, SpinSystemConfig },
        hamiltonian::decoupling_signal,
        pulse::PulseMode,
        sequence::DecoupleScheme,
    };

    fn one_carbon_instant() -> NvSystem {
        NvSystem::new(SpinSystemConfig {
            carbons: vec![HyperfineParams { par: 35.0e3, perp: -33.0e3 }],
            pulse: PulseParams { duration: 0.0, ..PulseParams::default() },
            ..SpinSystemConfig::default()
        })
    }

    #[test]
    fn initial_state_is_normalized_ground() {
        let sys = one_carbon_instant();
        let expm = Experiment::new(&sys);
        let tr: C64 = expm.output().diag().iter().sum();
        assert!((tr.re - 1.0).abs() < 1e-12);
        assert!((expm.measure_e0(&sys) - 1.0).abs() < 1e-12);
        assert!(expm.measure_e1(&sys).abs() < 1e-12);
    }

    #[test]
    fn mixed_carbon_measures_half_on_x() {
        let sys = one_carbon_instant();
        let expm = Experiment::new(&sys);
        let px = expm.measure_c(&sys, &ops().rhox, 1).unwrap();
        assert!((px - 0.5).abs() < 1e-12);
    }

    #[test]
    fn xy4_reproduces_the_analytic_signal() {
        let mut sys = one_carbon_instant();
        let n = 4;
        let bindings = Bindings::new();
        for tau in [2.0e-6, 3.5e-6, 5.0e-6, 6.5e-6] {
            let mut seq = GateSequence::with_mode(PulseMode::Perfect);
            seq.half_x();
            seq.nuclear_gate(DecoupleScheme::XY4, n, tau).unwrap();
            seq.half_x_neg();

            let mut expm = Experiment::new(&sys);
            expm.apply(&seq, &mut sys, &bindings, 1, false).unwrap();
            let p0 = expm.measure_e0(&sys);

            let M = decoupling_signal(sys.carbons(), sys.sign(), &[tau], n);
            let expected = 0.5 * (1.0 + M[[0, 0]]);
            assert!(
                (p0 - expected).abs() < 1e-8,
                "tau = {tau:.2e}: p0 = {p0}, analytic = {expected}",
            );
        }
    }

    #[test]
    fn snapshot_replay_is_deterministic() {
        let mut sys = one_carbon_instant();
        let bindings = Bindings::new();

        let mut prep = GateSequence::with_mode(PulseMode::Perfect);
        prep.half_y();
        prep.nuclear_gate(DecoupleScheme::XY4, 8, 4.0e-6).unwrap();
        prep.half_x_neg();
        prep.proj0();

        let mut expm = Experiment::new(&sys);
        expm.apply(&prep, &mut sys, &bindings, 1, true).unwrap();
        let snapshot = expm.output().clone();
        expm.reset_initial(&sys, Some(snapshot));

        let mut probe = GateSequence::with_mode(PulseMode::Perfect);
        probe.mbi_sequence(DecoupleScheme::XY4, 8, 4.0e-6).unwrap();

        expm.apply(&probe, &mut sys, &bindings, 1, false).unwrap();
        let first = expm.measure_e0(&sys);
        expm.reset_output(&sys);
        expm.apply(&probe, &mut sys, &bindings, 1, false).unwrap();
        let second = expm.measure_e0(&sys);
        assert_eq!(first, second);
    }

    #[test]
    fn projector_collapses_population() {
        let mut sys = one_carbon_instant();
        let bindings = Bindings::new();
        let mut seq = GateSequence::with_mode(PulseMode::Perfect);
        seq.half_x();
        seq.proj0();
        let mut expm = Experiment::new(&sys);
        expm.apply(&seq, &mut sys, &bindings, 1, true).unwrap();
        assert!((expm.measure_e0(&sys) - 1.0).abs() < 1e-9);
    }
}
