//! System Hamiltonian construction and cached free evolution.
//!
//! [`NvSystem`] owns the physical parameters, the lazily rebuilt secular
//! Hamiltonian, and the caches derived from it. All frequencies are stored
//! internally in angular units [rad/s]; the configuration surface is in Hz.

use std::f64::consts::TAU as TWO_PI;
use itertools::Itertools;
use ndarray::{ self as nd };
use ndarray_linalg::{ Eigh, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    config::{
        EspinTrans,
        HyperfineParams,
        PulseParams,
        SpinSystemConfig,
        A_N14,
        GAMMA_C13,
        GAMMA_N14,
        P_N14,
    },
    error::{ Error, Result },
    operators::{ ops, HilbertSpace },
};

/// Entries below this magnitude are zeroed when the Hamiltonian is rebuilt.
const TIDY_TOL: f64 = 1e-12;

/// One carbon's couplings in angular-frequency units [rad/s].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CarbonSpin {
    /// Bare Larmor frequency ω_L = 2πBγ_C.
    pub omega_larmor: f64,
    /// Parallel hyperfine coupling.
    pub a_par: f64,
    /// Perpendicular hyperfine coupling.
    pub a_perp: f64,
}

/// Nuclear precession frequencies conditioned on the electron state
/// [rad/s].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PrecessionFreqs {
    /// Electron in ms = 0.
    pub ms0: f64,
    /// Electron in the addressed ms = ±1 level.
    pub ms1: f64,
    /// Electron in an equal superposition.
    pub sup: f64,
}

/// Logical electron state selecting a conditional precession frequency.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NuclearState {
    Ms0,
    Ms1,
    Superposition,
}

impl PrecessionFreqs {
    /// The frequency for a given logical state.
    pub fn select(&self, state: NuclearState) -> f64 {
        match state {
            NuclearState::Ms0 => self.ms0,
            NuclearState::Ms1 => self.ms1,
            NuclearState::Superposition => self.sup,
        }
    }
}

/// exp(−i·H·t) for Hermitian `H`, by eigendecomposition.
pub fn expm_hermitian(H: &nd::Array2<C64>, t: f64) -> nd::Array2<C64> {
    let (E, V): (nd::Array1<f64>, nd::Array2<C64>)
        = H.eigh(UPLO::Lower)
        .expect("expm_hermitian: diagonalization error");
    let phases: nd::Array1<C64> = E.mapv(|e| (-C64::i() * e * t).exp());
    let Vh: nd::Array2<C64> = V.t().mapv(|a| a.conj());
    V.dot(&nd::Array2::from_diag(&phases)).dot(&Vh)
}

/// Zero negligibly small entries in place, reporting drops as a non-fatal
/// numerical warning.
fn tidy_up(H: &mut nd::Array2<C64>) {
    let mut dropped: usize = 0;
    H.iter_mut().for_each(|a| {
        let mag = a.norm();
        if mag > 0.0 && mag < TIDY_TOL {
            *a = C64::new(0.0, 0.0);
            dropped += 1;
        }
    });
    if dropped > 0 {
        tracing::warn!(dropped, tol = TIDY_TOL,
            "zeroed negligible Hamiltonian entries");
    }
}

/// The NV–carbon(–nitrogen) system.
///
/// The Hamiltonian is rebuilt lazily: setters mark it stale, and there is no
/// automatic change detection outside of them. After mutating parameters by
/// other means, call [`Self::recalculate`].
#[derive(Clone, Debug)]
pub struct NvSystem {
    space: HilbertSpace,
    b_field: f64,
    espin_trans: EspinTrans,
    carbons: Vec<CarbonSpin>,
    prec_freqs: Vec<PrecessionFreqs>,
    nv_detuning: f64,
    pub(crate) pulse: PulseParams,
    cache_free_evn: bool,
    hsys: Option<nd::Array2<C64>>,
    evn_taus: Vec<f64>,
    evn_ops: Vec<nd::Array2<C64>>,
    pub(crate) mw_cache: [Option<nd::Array2<C64>>; 8],
}

impl NvSystem {
    /// Create a new system from a configuration.
    pub fn new(config: SpinSystemConfig) -> Self {
        let SpinSystemConfig {
            b_field,
            espin_trans,
            carbons,
            inc_nitrogen,
            nv_detuning,
            pulse,
        } = config;
        let carbons = Self::to_angular(&carbons, b_field);
        let prec_freqs = Self::calc_prec_freqs(&carbons, espin_trans.sign());
        let space = HilbertSpace::new(carbons.len(), inc_nitrogen);
        Self {
            space,
            b_field,
            espin_trans,
            carbons,
            prec_freqs,
            nv_detuning,
            pulse,
            cache_free_evn: true,
            hsys: None,
            evn_taus: Vec::new(),
            evn_ops: Vec::new(),
            mw_cache: Default::default(),
        }
    }

    fn to_angular(carbons: &[HyperfineParams], b_field: f64) -> Vec<CarbonSpin> {
        carbons.iter()
            .map(|hf| CarbonSpin {
                omega_larmor: TWO_PI * b_field * GAMMA_C13,
                a_par: TWO_PI * hf.par,
                a_perp: TWO_PI * hf.perp,
            })
            .collect()
    }

    fn calc_prec_freqs(carbons: &[CarbonSpin], sign: f64)
        -> Vec<PrecessionFreqs>
    {
        carbons.iter()
            .map(|ck| {
                let ms0 = ck.omega_larmor;
                let ms1 = ((ck.omega_larmor + sign * ck.a_par).powi(2)
                    + ck.a_perp.powi(2)).sqrt();
                PrecessionFreqs { ms0, ms1, sup: 0.5 * (ms0 + ms1) }
            })
            .collect()
    }

    /// Composite-space descriptor.
    pub fn space(&self) -> HilbertSpace { self.space }

    /// Total Hilbert-space dimension.
    pub fn dim(&self) -> usize { self.space.dim() }

    /// Number of included carbons.
    pub fn num_carbons(&self) -> usize { self.carbons.len() }

    /// Included carbons, in angular units.
    pub fn carbons(&self) -> &[CarbonSpin] { &self.carbons }

    /// Hyperfine sign of the addressed transition.
    pub fn sign(&self) -> f64 { self.espin_trans.sign() }

    /// Current NV detuning [Hz].
    pub fn detuning(&self) -> f64 { self.nv_detuning }

    /// Current pulse parameters.
    pub fn pulse(&self) -> &PulseParams { &self.pulse }

    /// Conditional precession frequency of carbon `c_num` (1-indexed)
    /// [rad/s].
    pub fn prec_freq(&self, c_num: usize, state: NuclearState) -> Result<f64> {
        if c_num == 0 || c_num > self.prec_freqs.len() {
            return Err(Error::CarbonIndex {
                idx: c_num,
                num_carbons: self.prec_freqs.len(),
            });
        }
        Ok(self.prec_freqs[c_num - 1].select(state))
    }

    /// Duration subtracted from nominal gate spacings to account for the
    /// finite microwave pulse [s].
    pub fn tau_correction(&self) -> f64 { self.pulse.duration }

    /// Mark every derived quantity stale.
    pub fn recalculate(&mut self) {
        self.hsys = None;
        self.prec_freqs
            = Self::calc_prec_freqs(&self.carbons, self.espin_trans.sign());
        self.reset_caches();
    }

    /// Drop the cached evolution unitaries and shaped microwave gates.
    pub fn reset_caches(&mut self) {
        self.evn_taus.clear();
        self.evn_ops.clear();
        self.mw_cache = Default::default();
    }

    /// Set the NV microwave detuning [Hz].
    pub fn set_detuning(&mut self, detuning: f64) {
        self.nv_detuning = detuning;
        self.hsys = None;
        self.reset_caches();
    }

    /// Set the microwave pulse duration [s].
    pub fn set_mw_duration(&mut self, duration: f64) {
        self.pulse.duration = duration;
        self.reset_caches();
    }

    /// Set the mean microwave amplitude.
    pub fn set_mw_amp(&mut self, amp: f64) {
        self.pulse.mean_amp = amp;
        self.reset_caches();
    }

    /// Replace the carbon set [Hz].
    pub fn set_carbons(&mut self, carbons: &[HyperfineParams]) {
        self.carbons = Self::to_angular(carbons, self.b_field);
        self.space = HilbertSpace::new(self.carbons.len(), self.space.inc_nitrogen);
        self.recalculate();
    }

    /// Enable or disable the exact-τ free-evolution cache.
    pub fn set_cache_free_evolution(&mut self, on: bool) {
        self.cache_free_evn = on;
        if !on {
            self.evn_taus.clear();
            self.evn_ops.clear();
        }
    }

    fn ensure_hamiltonian(&mut self) {
        if self.hsys.is_none() {
            self.hsys = Some(self.build_hamiltonian());
        }
    }

    /// The system Hamiltonian [rad/s], rebuilt if stale.
    ///
    /// Repeated calls while clean return the same cached operator.
    pub fn hamiltonian(&mut self) -> &nd::Array2<C64> {
        self.ensure_hamiltonian();
        self.hsys.as_ref().unwrap()
    }

    fn build_hamiltonian(&self) -> nd::Array2<C64> {
        let t = ops();
        let sp = self.space;
        let dim = sp.dim();
        let sign = self.espin_trans.sign();
        let mut H: nd::Array2<C64> = nd::Array2::zeros((dim, dim));
        for (i, ck) in self.carbons.iter().enumerate() {
            let c_num = i + 1;
            let cond0 = t.sz.mapv(|a| a * ck.omega_larmor);
            let cond1
                = t.sz.mapv(|a| a * (ck.omega_larmor + sign * ck.a_par))
                + t.sx.mapv(|a| a * (sign * ck.a_perp));
            // c_num ranges over the configured carbons, so the embeddings
            // cannot fail
            H = H + sp.e_c_op(&t.rho0, &cond0, c_num).expect("carbon embedding")
                + sp.e_c_op(&t.rho1, &cond1, c_num).expect("carbon embedding");
        }
        if sp.inc_nitrogen {
            let e_n = sp.e_n_op(
                &t.sz_pseudo.mapv(|a| a * (TWO_PI * A_N14 * sign)),
                &t.jz,
            ).expect("nitrogen embedding");
            let jz2 = t.jz.dot(&t.jz);
            let n_local
                = jz2.mapv(|a| a * P_N14)
                - t.id3.mapv(|a| a * (P_N14 / 3.0))
                + t.jz.mapv(|a| a * (GAMMA_N14 * self.b_field));
            H = H + e_n
                + sp.n_op(&n_local.mapv(|a| a * (-TWO_PI)))
                    .expect("nitrogen embedding");
        }
        H = H + sp.e_op(
            &t.sz_pseudo.mapv(|a| a * (TWO_PI * self.nv_detuning * sign)));
        tidy_up(&mut H);
        H
    }

    /// Free evolution exp(−i·H·τ), with exact-τ caching when enabled.
    ///
    /// The cache is an ordered list scanned linearly for an exact match; it
    /// is dropped whenever the Hamiltonian or pulse parameters change.
    pub fn free_evolution(&mut self, tau: f64) -> nd::Array2<C64> {
        self.ensure_hamiltonian();
        if self.cache_free_evn {
            if let Some(k) = self.evn_taus.iter().position(|&t| t == tau) {
                return self.evn_ops[k].clone();
            }
        }
        let U = expm_hermitian(self.hsys.as_ref().unwrap(), tau);
        if self.cache_free_evn {
            self.evn_taus.push(tau);
            self.evn_ops.push(U.clone());
        }
        U
    }
}

/// Closed-form dynamical-decoupling coherence signal M(τ, N) for ideal,
/// instantaneous π pulses.
///
/// Rows index carbons and columns the entries of `tau`; `sign` is the
/// transition sign applied to the hyperfine couplings.
pub fn decoupling_signal(
    carbons: &[CarbonSpin],
    sign: f64,
    tau: &[f64],
    N: usize,
) -> nd::Array2<f64>
{
    let mut M: nd::Array2<f64> = nd::Array2::zeros((carbons.len(), tau.len()));
    let iter = carbons.iter().enumerate()
        .cartesian_product(tau.iter().enumerate());
    for ((i, ck), (j, &t)) in iter {
        let hf_par = sign * ck.a_par;
        let hf_perp = sign * ck.a_perp;
        let omega_tilde
            = ((hf_par + ck.omega_larmor).powi(2) + hf_perp.powi(2)).sqrt();
        let alpha = omega_tilde * t;
        let beta = ck.omega_larmor * t;
        let mx = hf_perp / omega_tilde;
        let mz = (hf_par + ck.omega_larmor) / omega_tilde;
        let cos_phi = alpha.cos() * beta.cos()
            - mz * alpha.sin() * beta.sin();
        let vec_term
            = mx.powi(2) * ((1.0 - alpha.cos()) * (1.0 - beta.cos()))
            / (1.0 + cos_phi);
        let angle_term = ((N as f64) * cos_phi.acos() / 2.0).sin().powi(2);
        M[[i, j]] = 1.0 - vec_term * angle_term;
    }
    M
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{ rotation_z, tests::mat_approx_eq };

    fn bare_system(detuning: f64) -> NvSystem {
        NvSystem::new(SpinSystemConfig {
            nv_detuning: detuning,
            ..SpinSystemConfig::default()
        })
    }

    fn one_carbon_system() -> NvSystem {
        NvSystem::new(SpinSystemConfig {
            carbons: vec![HyperfineParams { par: 35.0e3, perp: -33.0e3 }],
            ..SpinSystemConfig::default()
        })
    }

    #[test]
    fn bare_hamiltonian_is_pure_detuning() {
        let mut sys = bare_system(2.0e6);
        let H = sys.hamiltonian();
        assert_eq!(H.shape(), &[2, 2]);
        assert!((H[[0, 0]]).norm() < 1e-9);
        assert!((H[[0, 1]]).norm() < 1e-9);
        assert!((H[[1, 1]] - C64::from(TWO_PI * 2.0e6)).norm() < 1e-3);
    }

    #[test]
    fn free_evolution_commutes_with_z_rotations() {
        let mut sys = bare_system(1.3e6);
        let U = sys.free_evolution(250.0e-9);
        for theta in [0.4, 1.0, 2.7] {
            let Rz = sys.space().e_op(&rotation_z(theta));
            assert!(mat_approx_eq(&U.dot(&Rz), &Rz.dot(&U), 1e-12));
        }
    }

    #[test]
    fn evolution_cache_hits_and_invalidation() {
        let mut sys = one_carbon_system();
        let U1 = sys.free_evolution(1.0e-6);
        assert_eq!(sys.evn_taus.len(), 1);
        let U2 = sys.free_evolution(1.0e-6);
        assert_eq!(sys.evn_taus.len(), 1);
        assert!(mat_approx_eq(&U1, &U2, 1e-15));
        sys.free_evolution(2.0e-6);
        assert_eq!(sys.evn_taus.len(), 2);
        sys.set_detuning(1.0e6);
        assert_eq!(sys.evn_taus.len(), 0);
        assert!(sys.hsys.is_none());
    }

    #[test]
    fn uncached_evolution_matches_cached() {
        let mut sys = one_carbon_system();
        let cached = sys.free_evolution(0.7e-6);
        sys.set_cache_free_evolution(false);
        let fresh = sys.free_evolution(0.7e-6);
        assert!(mat_approx_eq(&cached, &fresh, 1e-12));
    }

    #[test]
    fn free_evolution_is_unitary() {
        let mut sys = one_carbon_system();
        let U = sys.free_evolution(3.3e-6);
        let Uh = U.t().mapv(|a| a.conj());
        let id = nd::Array2::<C64>::eye(sys.dim());
        assert!(mat_approx_eq(&U.dot(&Uh), &id, 1e-10));
    }

    #[test]
    fn precession_frequencies() {
        let sys = one_carbon_system();
        let w0 = sys.prec_freq(1, NuclearState::Ms0).unwrap();
        assert!((w0 - TWO_PI * 414.1871869 * GAMMA_C13).abs() < 1e-6);
        let w1 = sys.prec_freq(1, NuclearState::Ms1).unwrap();
        let expected = ((w0 + TWO_PI * 35.0e3).powi(2)
            + (TWO_PI * 33.0e3).powi(2)).sqrt();
        assert!((w1 - expected).abs() < 1e-6);
        let sup = sys.prec_freq(1, NuclearState::Superposition).unwrap();
        assert!((sup - 0.5 * (w0 + w1)).abs() < 1e-6);
        assert!(matches!(
            sys.prec_freq(2, NuclearState::Ms0),
            Err(Error::CarbonIndex { idx: 2, .. }),
        ));
    }

    #[test]
    fn nitrogen_terms_change_the_dimension() {
        let mut sys = NvSystem::new(SpinSystemConfig {
            inc_nitrogen: true,
            ..SpinSystemConfig::default()
        });
        assert_eq!(sys.dim(), 6);
        let H = sys.hamiltonian();
        // Hermitian check
        let Hh = H.t().mapv(|a| a.conj());
        assert!(mat_approx_eq(H, &Hh, 1e-9));
    }

    #[test]
    fn signal_goes_to_unity_at_zero_tau() {
        let sys = one_carbon_system();
        let M = decoupling_signal(sys.carbons(), sys.sign(), &[0.0], 16);
        assert!((M[[0, 0]] - 1.0).abs() < 1e-12);
    }
}
