//! Spin operator primitives and tensor embedding over the composite
//! electron ⊗ carbons ⊗ nitrogen Hilbert space.
//!
//! Subsystem order in the tensor product is fixed: electron first, then
//! carbons 1..N, then the nitrogen when it is included.

use std::sync::OnceLock;
use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use crate::error::{ Error, Result };

fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

/// Read-only table of frequently used spin-½ and spin-1 operators and
/// states.
///
/// Constructed once on first use and shared by reference; see [`ops`].
#[derive(Clone, Debug)]
pub struct OperatorTable {
    /// 2×2 identity.
    pub id2: nd::Array2<C64>,
    /// Spin-½ x generator (σx/2).
    pub sx: nd::Array2<C64>,
    /// Spin-½ y generator (σy/2).
    pub sy: nd::Array2<C64>,
    /// Spin-½ z generator (σz/2).
    pub sz: nd::Array2<C64>,
    /// Effective two-level z operator cut from the spin-1 z generator:
    /// diag(0, 1) on the addressed transition.
    pub sz_pseudo: nd::Array2<C64>,
    /// |0⟩⟨0| projector.
    pub rho0: nd::Array2<C64>,
    /// |1⟩⟨1| projector.
    pub rho1: nd::Array2<C64>,
    /// Maximally mixed spin-½ state.
    pub rhom: nd::Array2<C64>,
    /// +X eigenstate projector.
    pub rhox: nd::Array2<C64>,
    /// −X eigenstate projector.
    pub rhomx: nd::Array2<C64>,
    /// +Y eigenstate projector.
    pub rhoy: nd::Array2<C64>,
    /// −Y eigenstate projector.
    pub rhomy: nd::Array2<C64>,
    /// 3×3 identity.
    pub id3: nd::Array2<C64>,
    /// Spin-1 x generator.
    pub jx: nd::Array2<C64>,
    /// Spin-1 y generator.
    pub jy: nd::Array2<C64>,
    /// Spin-1 z generator, diag(1, 0, −1).
    pub jz: nd::Array2<C64>,
    /// Spin-1 projector onto m = 0.
    pub rho0_s1: nd::Array2<C64>,
    /// Spin-1 projector onto m = +1.
    pub rho1_s1: nd::Array2<C64>,
    /// Spin-1 projector onto m = −1.
    pub rhom1_s1: nd::Array2<C64>,
    /// Maximally mixed spin-1 state.
    pub rhom_s1: nd::Array2<C64>,
}

impl OperatorTable {
    fn build() -> Self {
        let o = C64::zero();
        let l = C64::one();
        let id2: nd::Array2<C64> = nd::Array2::eye(2);
        let sx = nd::array![[o, c(0.5, 0.0)], [c(0.5, 0.0), o]];
        let sy = nd::array![[o, c(0.0, -0.5)], [c(0.0, 0.5), o]];
        let sz = nd::array![[c(0.5, 0.0), o], [o, c(-0.5, 0.0)]];
        let sz_pseudo = nd::array![[o, o], [o, l]];
        let rho0 = nd::array![[l, o], [o, o]];
        let rho1 = nd::array![[o, o], [o, l]];
        let rhom = id2.mapv(|a| a * 0.5);
        let h = c(0.5, 0.0);
        let rhox = nd::array![[h, h], [h, h]];
        let rhomx = nd::array![[h, -h], [-h, h]];
        let rhoy = nd::array![[h, c(0.0, -0.5)], [c(0.0, 0.5), h]];
        let rhomy = nd::array![[h, c(0.0, 0.5)], [c(0.0, -0.5), h]];
        let id3: nd::Array2<C64> = nd::Array2::eye(3);
        let r = c(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        let ri = c(0.0, std::f64::consts::FRAC_1_SQRT_2);
        let jx = nd::array![[o, r, o], [r, o, r], [o, r, o]];
        let jy = nd::array![[o, -ri, o], [ri, o, -ri], [o, ri, o]];
        let jz = nd::array![[l, o, o], [o, o, o], [o, o, -l]];
        let rho0_s1 = nd::array![[o, o, o], [o, l, o], [o, o, o]];
        let rho1_s1 = nd::array![[o, o, o], [o, o, o], [o, o, l]];
        let rhom1_s1 = nd::array![[l, o, o], [o, o, o], [o, o, o]];
        let rhom_s1 = id3.mapv(|a| a / 3.0);
        Self {
            id2, sx, sy, sz, sz_pseudo,
            rho0, rho1, rhom, rhox, rhomx, rhoy, rhomy,
            id3, jx, jy, jz,
            rho0_s1, rho1_s1, rhom1_s1, rhom_s1,
        }
    }
}

static OPS: OnceLock<OperatorTable> = OnceLock::new();

/// The shared operator table.
pub fn ops() -> &'static OperatorTable { OPS.get_or_init(OperatorTable::build) }

/// Spin-½ rotation by `theta` about the equatorial axis at angle `phase`
/// from +X: exp(−i·(cos φ·sx + sin φ·sy)·θ) in the σ/2 convention.
pub fn rotation_phased(phase: f64, theta: f64) -> nd::Array2<C64> {
    let ch = C64::from((theta / 2.0).cos());
    let sh = (theta / 2.0).sin();
    nd::array![
        [ch, -C64::i() * (-C64::i() * phase).exp() * sh],
        [-C64::i() * (C64::i() * phase).exp() * sh, ch],
    ]
}

/// Spin-½ rotation about +X: exp(−i·sx·θ).
pub fn rotation_x(theta: f64) -> nd::Array2<C64> { rotation_phased(0.0, theta) }

/// Spin-½ rotation about +Y: exp(−i·sy·θ).
pub fn rotation_y(theta: f64) -> nd::Array2<C64> {
    rotation_phased(std::f64::consts::FRAC_PI_2, theta)
}

/// Spin-½ rotation about +Z: exp(−i·sz·θ).
pub fn rotation_z(theta: f64) -> nd::Array2<C64> {
    let o = C64::zero();
    let h = theta / 2.0;
    nd::array![
        [(-C64::i() * h).exp(), o],
        [o, (C64::i() * h).exp()],
    ]
}

/// Dimensions of the composite space and tensor-embedding helpers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HilbertSpace {
    pub num_carbons: usize,
    pub inc_nitrogen: bool,
}

impl HilbertSpace {
    /// Create a new space descriptor.
    pub fn new(num_carbons: usize, inc_nitrogen: bool) -> Self {
        Self { num_carbons, inc_nitrogen }
    }

    fn nitrogen_dim(&self) -> usize { if self.inc_nitrogen { 3 } else { 1 } }

    /// Total dimension 2·2^N·(3 if the nitrogen is included, else 1).
    pub fn dim(&self) -> usize {
        2 * (1 << self.num_carbons) * self.nitrogen_dim()
    }

    fn check_carbon(&self, c_num: usize) -> Result<()> {
        if c_num == 0 || c_num > self.num_carbons {
            Err(Error::CarbonIndex { idx: c_num, num_carbons: self.num_carbons })
        } else {
            Ok(())
        }
    }

    /// Operand on the electron, identities elsewhere.
    pub fn e_op(&self, op: &nd::Array2<C64>) -> nd::Array2<C64> {
        let rest: nd::Array2<C64>
            = nd::Array2::eye((1 << self.num_carbons) * self.nitrogen_dim());
        kron(op, &rest)
    }

    /// Operand on carbon `c_num` (1-indexed), identities elsewhere.
    pub fn c_op(&self, op: &nd::Array2<C64>, c_num: usize)
        -> Result<nd::Array2<C64>>
    {
        self.check_carbon(c_num)?;
        let left: nd::Array2<C64> = nd::Array2::eye(2 << (c_num - 1));
        let right: nd::Array2<C64> = nd::Array2::eye(
            (1 << (self.num_carbons - c_num)) * self.nitrogen_dim());
        Ok(kron(&kron(&left, op), &right))
    }

    /// Operand on the nitrogen, identities elsewhere.
    pub fn n_op(&self, op: &nd::Array2<C64>) -> Result<nd::Array2<C64>> {
        if !self.inc_nitrogen { return Err(Error::NitrogenDisabled); }
        let left: nd::Array2<C64> = nd::Array2::eye(2 << self.num_carbons);
        Ok(kron(&left, op))
    }

    /// Joint operand on the electron and carbon `c_num`, identities
    /// elsewhere.
    pub fn e_c_op(
        &self,
        e_op: &nd::Array2<C64>,
        c_op: &nd::Array2<C64>,
        c_num: usize,
    ) -> Result<nd::Array2<C64>>
    {
        self.check_carbon(c_num)?;
        let mid: nd::Array2<C64> = nd::Array2::eye(1 << (c_num - 1));
        let right: nd::Array2<C64> = nd::Array2::eye(
            (1 << (self.num_carbons - c_num)) * self.nitrogen_dim());
        Ok(kron(&kron(&kron(e_op, &mid), c_op), &right))
    }

    /// Joint operand on the electron and nitrogen, identities elsewhere.
    pub fn e_n_op(&self, e_op: &nd::Array2<C64>, n_op: &nd::Array2<C64>)
        -> Result<nd::Array2<C64>>
    {
        if !self.inc_nitrogen { return Err(Error::NitrogenDisabled); }
        let mid: nd::Array2<C64> = nd::Array2::eye(1 << self.num_carbons);
        Ok(kron(&kron(e_op, &mid), n_op))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mat_approx_eq(
        a: &nd::Array2<C64>,
        b: &nd::Array2<C64>,
        tol: f64,
    ) -> bool
    {
        a.shape() == b.shape()
            && a.iter().zip(b).all(|(x, y)| (x - y).norm() < tol)
    }

    #[test]
    fn composite_dimension() {
        assert_eq!(HilbertSpace::new(0, false).dim(), 2);
        assert_eq!(HilbertSpace::new(2, false).dim(), 8);
        assert_eq!(HilbertSpace::new(2, true).dim(), 24);
    }

    #[test]
    fn carbon_index_contract() {
        let space = HilbertSpace::new(2, false);
        assert!(space.c_op(&ops().sz, 1).is_ok());
        assert!(space.c_op(&ops().sz, 2).is_ok());
        assert!(matches!(
            space.c_op(&ops().sz, 0),
            Err(Error::CarbonIndex { idx: 0, .. }),
        ));
        assert!(matches!(
            space.c_op(&ops().sz, 3),
            Err(Error::CarbonIndex { idx: 3, .. }),
        ));
    }

    #[test]
    fn nitrogen_requires_inclusion() {
        let space = HilbertSpace::new(1, false);
        assert!(matches!(space.n_op(&ops().jz), Err(Error::NitrogenDisabled)));
        let space = HilbertSpace::new(1, true);
        assert_eq!(space.n_op(&ops().jz).unwrap().shape(), &[12, 12]);
    }

    #[test]
    fn joint_embedding_matches_direct_kron() {
        let t = ops();
        let space = HilbertSpace::new(1, false);
        let direct = kron(&t.rho0, &t.sz);
        let embedded = space.e_c_op(&t.rho0, &t.sz, 1).unwrap();
        assert!(mat_approx_eq(&direct, &embedded, 1e-15));
    }

    #[test]
    fn full_rotation_is_identity_up_to_phase() {
        let U = rotation_x(2.0 * std::f64::consts::PI);
        // exp(−iπσx) = −1
        let expected = nd::Array2::<C64>::eye(2).mapv(|a| -a);
        assert!(mat_approx_eq(&U, &expected, 1e-12));
    }

    #[test]
    fn phased_rotation_axes() {
        let pi = std::f64::consts::PI;
        assert!(mat_approx_eq(&rotation_phased(0.0, pi / 2.0),
            &rotation_x(pi / 2.0), 1e-15));
        let y = rotation_y(pi);
        // exp(−iπσy/2·2)… a π pulse about Y has real off-diagonals
        assert!((y[[0, 1]] - c(-1.0, 0.0)).norm() < 1e-12);
        assert!((y[[1, 0]] - c(1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn rotations_are_unitary() {
        for theta in [0.3, 1.2, 2.9] {
            let U = rotation_phased(0.7, theta);
            let Uh = U.t().mapv(|a| a.conj());
            let id = nd::Array2::<C64>::eye(2);
            assert!(mat_approx_eq(&U.dot(&Uh), &id, 1e-12));
        }
    }
}
