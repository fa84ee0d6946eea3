//! Composable, nestable gate sequences evaluated by ordered operator
//! multiplication.
//!
//! A [`GateSequence`] is a flat arena of nodes (leaf gates and repeated
//! blocks referencing children by index) plus an ordered top-level item
//! list. Evaluation folds items left to right with the identity of the full
//! composite space as the initial accumulator; each item's operator is
//! raised to its integer repeat count by repeated self-composition and
//! **left**-multiplied onto the accumulator, so the first-appended gate acts
//! first on the state: U_total = U_n·…·U_2·U_1.
//!
//! Gates are deferred: operators are produced only at evaluation time, and
//! scalar parameters may be left [`Bound`][TauParam::Bound] to a name that
//! is resolved against a [`Bindings`] table supplied to
//! [`GateSequence::evaluate`]. A sequence can therefore be built once and
//! evaluated across a parameter sweep.

use std::collections::BTreeMap;
use std::f64::consts::{ PI, TAU as TWO_PI };
use std::str::FromStr;
use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use crate::{
    error::{ Error, Result },
    hamiltonian::{ NuclearState, NvSystem },
    operators::ops,
    pulse::{ ElectronRotation, PulseMode },
};

/// Named dynamical-decoupling schemes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoupleScheme {
    /// X–Y–X–Y pulse phases; the pulse count must be a multiple of 4.
    #[default]
    XY4,
    /// XYXY-YXYX pulse phases; the pulse count must be a multiple of 8.
    XY8,
    /// All-X pulses, any count.
    #[serde(rename = "simple")]
    Simple,
}

impl DecoupleScheme {
    fn name(self) -> &'static str {
        match self {
            Self::XY4 => "XY4",
            Self::XY8 => "XY8",
            Self::Simple => "simple",
        }
    }
}

impl FromStr for DecoupleScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "XY4" => Ok(Self::XY4),
            "XY8" => Ok(Self::XY8),
            "simple" => Ok(Self::Simple),
            _ => Err(Error::UnknownScheme(s.to_string())),
        }
    }
}

/// A deferred scalar gate parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum TauParam {
    /// A value fixed at construction time.
    Fixed(f64),
    /// A named slot resolved against the [`Bindings`] table at evaluation
    /// time.
    Bound(String),
}

impl TauParam {
    /// Shorthand for a named binding.
    pub fn bound(name: impl Into<String>) -> Self { Self::Bound(name.into()) }

    fn resolve(&self, bindings: &Bindings) -> Result<f64> {
        match self {
            Self::Fixed(value) => Ok(*value),
            Self::Bound(name) => bindings.get(name)
                .ok_or_else(|| Error::UnboundParameter(name.clone())),
        }
    }
}

impl From<f64> for TauParam {
    fn from(value: f64) -> Self { Self::Fixed(value) }
}

/// Evaluation-time values for [`TauParam::Bound`] parameters.
#[derive(Clone, Debug, Default)]
pub struct Bindings(BTreeMap<String, f64>);

impl Bindings {
    /// New empty table.
    pub fn new() -> Self { Self::default() }

    /// Insert or overwrite a binding.
    pub fn set(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Builder-style [`set`][Self::set].
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Look up a binding.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }
}

/// A deferred unit of work; produces its unitary only at evaluation time.
#[derive(Clone, Debug)]
pub enum Gate {
    /// One of the standard electron rotations.
    Rotation { rot: ElectronRotation, mode: PulseMode },
    /// Arbitrary-axis electron rotation (`theta` axis phase, `phi` angle).
    PhasedRotation { theta: f64, phi: f64, mode: PulseMode },
    /// Electron projector onto ms = 0.
    Proj0,
    /// Electron projector onto ms = 1.
    Proj1,
    /// Free evolution under the system Hamiltonian for `factor·τ`, with the
    /// single- or double-sided pulse-duration correction applied at
    /// evaluation.
    FreeEvolution { tau: TauParam, factor: f64, double_sided: bool },
}

/// Correct a nominal spacing for the finite microwave pulse: single-sided
/// legs absorb half a pulse, double-sided legs a full one.
fn gate_tau(sys: &NvSystem, tau: f64, double_sided: bool) -> Result<f64> {
    let scale = if double_sided { 1.0 } else { 0.5 };
    let correction = sys.tau_correction();
    if correction > scale * tau {
        return Err(Error::PulseTooLong {
            pulse: correction,
            window: scale * tau,
        });
    }
    Ok(tau - scale * correction)
}

impl Gate {
    fn operator(&self, sys: &mut NvSystem, bindings: &Bindings)
        -> Result<nd::Array2<C64>>
    {
        match self {
            Self::Rotation { rot, mode } => Ok(sys.rotation_op(*rot, *mode)),
            Self::PhasedRotation { theta, phi, mode } => {
                Ok(sys.phased_rotation_op(*theta, *phi, *mode))
            },
            Self::Proj0 => Ok(sys.space().e_op(&ops().rho0)),
            Self::Proj1 => Ok(sys.space().e_op(&ops().rho1)),
            Self::FreeEvolution { tau, factor, double_sided } => {
                let nominal = factor * tau.resolve(bindings)?;
                let corrected = gate_tau(sys, nominal, *double_sided)?;
                Ok(sys.free_evolution(corrected))
            },
        }
    }
}

type NodeId = usize;

#[derive(Clone, Debug)]
enum SeqNode {
    Leaf(Gate),
    Block(Vec<(NodeId, usize)>),
}

/// An ordered, nestable sequence of deferred gates.
///
/// Cloning duplicates the flat node list, so copies are cheap and fully
/// independent. Appending one sequence to another likewise copies nodes into
/// the destination arena: mutating the source afterwards does not affect the
/// destination.
#[derive(Clone, Debug, Default)]
pub struct GateSequence {
    nodes: Vec<SeqNode>,
    top: Vec<(NodeId, usize)>,
    mode: PulseMode,
}

impl GateSequence {
    /// New empty sequence; rotation helpers build shaped (cached) pulses.
    pub fn new() -> Self { Self::default() }

    /// New empty sequence whose rotation helpers use `mode`.
    pub fn with_mode(mode: PulseMode) -> Self {
        Self { mode, ..Self::default() }
    }

    /// Pulse mode used by the rotation helpers.
    pub fn mode(&self) -> PulseMode { self.mode }

    /// Number of top-level items.
    pub fn len(&self) -> usize { self.top.len() }

    /// `true` if no items have been added.
    pub fn is_empty(&self) -> bool { self.top.is_empty() }

    fn push_node(&mut self, node: SeqNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn push_item(&mut self, item: (NodeId, usize), before: bool) {
        if before {
            self.top.insert(0, item);
        } else {
            self.top.push(item);
        }
    }

    /// Append (or, with `before`, prepend) a gate with a repeat count.
    pub fn push_gate(&mut self, gate: Gate, reps: usize, before: bool)
        -> &mut Self
    {
        let id = self.push_node(SeqNode::Leaf(gate));
        self.push_item((id, reps), before);
        self
    }

    /// Append (or prepend) a whole sub-sequence as a single repeated block.
    ///
    /// The block contributes its composed unitary raised to `reps` as one
    /// multiplicative factor, preserving operator ordering for
    /// non-commuting rotations.
    pub fn push_seq(&mut self, other: &GateSequence, reps: usize, before: bool)
        -> &mut Self
    {
        let offset = self.nodes.len();
        self.nodes.extend(other.nodes.iter().cloned().map(|node| {
            match node {
                SeqNode::Leaf(gate) => SeqNode::Leaf(gate),
                SeqNode::Block(items) => SeqNode::Block(
                    items.into_iter()
                        .map(|(id, r)| (id + offset, r))
                        .collect()
                ),
            }
        }));
        let items: Vec<(NodeId, usize)>
            = other.top.iter().map(|&(id, r)| (id + offset, r)).collect();
        let block = self.push_node(SeqNode::Block(items));
        self.push_item((block, reps), before);
        self
    }

    fn rot(&mut self, rot: ElectronRotation) -> &mut Self {
        let mode = self.mode;
        self.push_gate(Gate::Rotation { rot, mode }, 1, false)
    }

    /// π rotation about +X.
    pub fn pi_x(&mut self) -> &mut Self { self.rot(ElectronRotation::PiX) }

    /// π rotation about +Y.
    pub fn pi_y(&mut self) -> &mut Self { self.rot(ElectronRotation::PiY) }

    /// −π rotation about X.
    pub fn pi_x_neg(&mut self) -> &mut Self { self.rot(ElectronRotation::PiXNeg) }

    /// −π rotation about Y.
    pub fn pi_y_neg(&mut self) -> &mut Self { self.rot(ElectronRotation::PiYNeg) }

    /// π/2 rotation about +X.
    pub fn half_x(&mut self) -> &mut Self { self.rot(ElectronRotation::HalfX) }

    /// π/2 rotation about +Y.
    pub fn half_y(&mut self) -> &mut Self { self.rot(ElectronRotation::HalfY) }

    /// −π/2 rotation about X.
    pub fn half_x_neg(&mut self) -> &mut Self {
        self.rot(ElectronRotation::HalfXNeg)
    }

    /// −π/2 rotation about Y.
    pub fn half_y_neg(&mut self) -> &mut Self {
        self.rot(ElectronRotation::HalfYNeg)
    }

    /// A standard rotation with an explicit pulse mode.
    pub fn rotation(&mut self, rot: ElectronRotation, mode: PulseMode)
        -> &mut Self
    {
        self.push_gate(Gate::Rotation { rot, mode }, 1, false)
    }

    /// Arbitrary-axis rotation gate (`theta` axis phase, `phi` angle).
    pub fn phased_rotation(&mut self, theta: f64, phi: f64) -> &mut Self {
        let mode = self.mode;
        self.push_gate(Gate::PhasedRotation { theta, phi, mode }, 1, false)
    }

    /// Project the electron onto ms = 0.
    pub fn proj0(&mut self) -> &mut Self {
        self.push_gate(Gate::Proj0, 1, false)
    }

    /// Project the electron onto ms = 1.
    pub fn proj1(&mut self) -> &mut Self {
        self.push_gate(Gate::Proj1, 1, false)
    }

    /// Plain wait: single-sided free evolution for `tau`.
    pub fn wait(&mut self, tau: impl Into<TauParam>) -> &mut Self {
        self.wait_with(tau, 1, false)
    }

    /// [`wait`][Self::wait] with repeat/prepend control.
    pub fn wait_with(
        &mut self,
        tau: impl Into<TauParam>,
        reps: usize,
        before: bool,
    ) -> &mut Self
    {
        self.push_gate(
            Gate::FreeEvolution {
                tau: tau.into(),
                factor: 1.0,
                double_sided: false,
            },
            reps,
            before,
        )
    }

    /// Canonical decoupling block: `n` π pulses with nominal half-spacing
    /// `tau`, appended as a single sub-block.
    ///
    /// `n = 0` is a no-op. XY4 requires `n` divisible by 4 and XY8 by 8;
    /// violations fail here, at construction.
    pub fn nuclear_gate(
        &mut self,
        scheme: DecoupleScheme,
        n: usize,
        tau: impl Into<TauParam>,
    ) -> Result<&mut Self>
    {
        self.nuclear_gate_with(scheme, n, tau, 1, false)
    }

    /// [`nuclear_gate`][Self::nuclear_gate] with repeat/prepend control.
    pub fn nuclear_gate_with(
        &mut self,
        scheme: DecoupleScheme,
        n: usize,
        tau: impl Into<TauParam>,
        reps: usize,
        before: bool,
    ) -> Result<&mut Self>
    {
        if n == 0 { return Ok(self); }
        let tau = tau.into();
        let leg = |factor: f64, double_sided: bool| Gate::FreeEvolution {
            tau: tau.clone(),
            factor,
            double_sided,
        };
        // outer legs: single-length, full correction; interior junctions are
        // built from two single-sided legs or one double-length leg
        let tau_outer = leg(1.0, true);
        let tau_single = leg(1.0, false);
        let two_tau = leg(2.0, true);

        let mut seq = GateSequence::with_mode(self.mode);
        match scheme {
            DecoupleScheme::XY4 => {
                if n % 4 != 0 {
                    return Err(Error::IncompatiblePulseCount {
                        n, scheme: scheme.name(), div: 4,
                    });
                }
                seq.push_gate(tau_outer.clone(), 1, false);
                seq.pi_x();
                seq.push_gate(tau_single.clone(), 1, false);

                let mut rep = GateSequence::with_mode(self.mode);
                rep.push_gate(tau_single.clone(), 1, false);
                rep.pi_y();
                rep.push_gate(two_tau.clone(), 1, false);
                rep.pi_x();
                rep.push_gate(tau_single.clone(), 1, false);
                seq.push_seq(&rep, n / 2 - 1, false);

                seq.push_gate(tau_single.clone(), 1, false);
                seq.pi_y();
                seq.push_gate(tau_outer.clone(), 1, false);
            },
            DecoupleScheme::XY8 => {
                if n % 8 != 0 {
                    return Err(Error::IncompatiblePulseCount {
                        n, scheme: scheme.name(), div: 8,
                    });
                }
                seq.push_gate(tau_outer.clone(), 1, false);
                seq.pi_x();
                seq.push_gate(two_tau.clone(), 1, false);
                seq.pi_y();
                seq.push_gate(two_tau.clone(), 1, false);
                seq.pi_x();
                seq.push_gate(two_tau.clone(), 1, false);
                seq.pi_y();
                seq.push_gate(tau_single.clone(), 1, false);

                let mut rep_a = GateSequence::with_mode(self.mode);
                rep_a.push_gate(tau_single.clone(), 1, false);
                rep_a.pi_y();
                rep_a.push_gate(two_tau.clone(), 1, false);
                rep_a.pi_x();
                rep_a.push_gate(tau_single.clone(), 1, false);

                let mut rep_b = GateSequence::with_mode(self.mode);
                rep_b.push_gate(tau_single.clone(), 1, false);
                rep_b.pi_x();
                rep_b.push_gate(two_tau.clone(), 1, false);
                rep_b.pi_y();
                rep_b.push_gate(tau_single.clone(), 1, false);

                let mut rep = GateSequence::with_mode(self.mode);
                rep.push_seq(&rep_a, 2, false);
                rep.push_seq(&rep_b, 2, false);
                seq.push_seq(&rep, n / 8 - 1, false);

                seq.push_gate(tau_outer.clone(), 1, false);
                seq.pi_y();
                seq.push_gate(two_tau.clone(), 1, false);
                seq.pi_x();
                seq.push_gate(two_tau.clone(), 1, false);
                seq.pi_y();
                seq.push_gate(two_tau.clone(), 1, false);
                seq.pi_x();
                seq.push_gate(tau_single.clone(), 1, false);
            },
            DecoupleScheme::Simple => {
                if n < 2 {
                    seq.push_gate(tau_outer.clone(), 1, false);
                    seq.pi_x();
                    seq.push_gate(tau_outer.clone(), 1, false);
                } else {
                    seq.push_gate(tau_outer.clone(), 1, false);
                    seq.pi_x();
                    seq.push_gate(tau_single.clone(), 1, false);

                    let mut rep = GateSequence::with_mode(self.mode);
                    rep.push_gate(tau_single.clone(), 1, false);
                    rep.pi_x();
                    rep.push_gate(tau_single.clone(), 1, false);
                    seq.push_seq(&rep, n - 2, false);

                    seq.push_gate(tau_single.clone(), 1, false);
                    seq.pi_x();
                    seq.push_gate(tau_outer.clone(), 1, false);
                }
            },
        }
        self.push_seq(&seq, reps, before);
        Ok(self)
    }

    /// Convert a desired relative phase (degrees) on `carbon` in logical
    /// `state` into a plain wait via that carbon's precession frequency.
    pub fn nuclear_phase_gate(
        &mut self,
        sys: &NvSystem,
        carbon: usize,
        phase_deg: f64,
        state: NuclearState,
        before: bool,
    ) -> Result<&mut Self>
    {
        let freq = sys.prec_freq(carbon, state)?;
        let phase = (PI * (-phase_deg) / 180.0).rem_euclid(TWO_PI);
        Ok(self.wait_with(phase / freq, 1, before))
    }

    /// Measurement-based-interaction block: y(π/2), decoupling, −x(π/2).
    pub fn mbi_sequence(
        &mut self,
        scheme: DecoupleScheme,
        n: usize,
        tau: impl Into<TauParam>,
    ) -> Result<&mut Self>
    {
        self.half_y();
        self.nuclear_gate(scheme, n, tau)?;
        self.half_x_neg();
        Ok(self)
    }

    fn matrix_power(op: &nd::Array2<C64>, reps: usize, dim: usize)
        -> nd::Array2<C64>
    {
        let mut acc: nd::Array2<C64> = nd::Array2::eye(dim);
        for _ in 0..reps {
            acc = op.dot(&acc);
        }
        acc
    }

    fn eval_items(
        &self,
        items: &[(NodeId, usize)],
        sys: &mut NvSystem,
        bindings: &Bindings,
    ) -> Result<nd::Array2<C64>>
    {
        let dim = sys.dim();
        let mut acc: nd::Array2<C64> = nd::Array2::eye(dim);
        for &(id, reps) in items {
            let op = match &self.nodes[id] {
                SeqNode::Leaf(gate) => gate.operator(sys, bindings)?,
                SeqNode::Block(sub) => self.eval_items(sub, sys, bindings)?,
            };
            acc = Self::matrix_power(&op, reps, dim).dot(&acc);
        }
        Ok(acc)
    }

    /// Fold the sequence into a single unitary.
    ///
    /// An empty sequence evaluates to the identity on the full composite
    /// space.
    pub fn evaluate(&self, sys: &mut NvSystem, bindings: &Bindings)
        -> Result<nd::Array2<C64>>
    {
        self.eval_items(&self.top, sys, bindings)
    }

    /// Apply the sequence to a density matrix:
    /// U^reps · ρ · (U^reps)†, optionally trace-normalized.
    pub fn apply(
        &self,
        state: &nd::Array2<C64>,
        sys: &mut NvSystem,
        bindings: &Bindings,
        reps: usize,
        normalize: bool,
    ) -> Result<nd::Array2<C64>>
    {
        let dim = sys.dim();
        let U = Self::matrix_power(&self.evaluate(sys, bindings)?, reps, dim);
        let Uh = U.t().mapv(|a| a.conj());
        let mut out = U.dot(state).dot(&Uh);
        if normalize {
            let tr: C64 = out.diag().iter().sum();
            out.mapv_inplace(|a| a / tr);
        }
        Ok(out)
    }
}
