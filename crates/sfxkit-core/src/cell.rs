use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::data::MillerIndex;
use crate::{SfxError, SfxResult};

/// A crystallographic unit cell given by its six real-space parameters
/// (`a`, `b`, `c` in Å and `alpha`, `beta`, `gamma` in degrees).
///
/// The cell provides the reciprocal-space math every statistic in this toolkit leans on:
/// `d`-spacings through the reciprocal metric tensor and the Busing–Levy `B` matrix used to
/// build orientation (`A = U B`) matrices.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    /// Construct a cell, validating that edges are positive and angles lie strictly between
    /// 0° and 180°.
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> SfxResult<Self> {
        let cell = Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        };
        if !(a > 0.0 && b > 0.0 && c > 0.0) {
            return Err(SfxError::Custom(format!(
                "unit cell edges must be positive (got {cell})"
            )));
        }
        for angle in [alpha, beta, gamma] {
            if !(0.0 < angle && angle < 180.0) {
                return Err(SfxError::Custom(format!(
                    "unit cell angles must lie in (0, 180) degrees (got {cell})"
                )));
            }
        }
        if cell.volume().is_nan() || cell.volume() <= 0.0 {
            return Err(SfxError::Custom(format!(
                "unit cell angles are not mutually compatible (got {cell})"
            )));
        }
        Ok(cell)
    }

    /// The six parameters in conventional order.
    pub fn parameters(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }

    /// Cell volume in Å³.
    pub fn volume(&self) -> f64 {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        self.a
            * self.b
            * self.c
            * (1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg).sqrt()
    }

    /// The Cartesian real-space basis vectors of the unoriented cell (`a` along x, `b` in
    /// the xy plane).
    pub fn real_basis(&self) -> [Vector3<f64>; 3] {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let sg = self.gamma.to_radians().sin();
        let cy = (ca - cb * cg) / sg;
        let cz = (1.0 - cb * cb - cy * cy).max(0.0).sqrt();
        [
            Vector3::new(self.a, 0.0, 0.0),
            Vector3::new(self.b * cg, self.b * sg, 0.0),
            Vector3::new(self.c * cb, self.c * cy, self.c * cz),
        ]
    }

    /// The `B` matrix whose columns are the Cartesian reciprocal basis vectors, mapping
    /// integer `hkl` to a reciprocal-space vector of length `1/d`.
    pub fn b_matrix(&self) -> Matrix3<f64> {
        let [va, vb, vc] = self.real_basis();
        let volume = va.dot(&vb.cross(&vc));
        let a_star = vb.cross(&vc) / volume;
        let b_star = vc.cross(&va) / volume;
        let c_star = va.cross(&vb) / volume;
        Matrix3::from_columns(&[a_star, b_star, c_star])
    }

    /// `1/d²` for the given Miller index.
    pub fn d_star_sq(&self, hkl: MillerIndex) -> f64 {
        let b = self.b_matrix();
        let s = b * Vector3::new(hkl.h as f64, hkl.k as f64, hkl.l as f64);
        s.norm_squared()
    }

    /// The resolution `d` (Å) of the given Miller index.
    pub fn d_spacing(&self, hkl: MillerIndex) -> f64 {
        1.0 / self.d_star_sq(hkl).sqrt()
    }
}

impl Display for UnitCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.3}, {:.3}, {:.3}, {:.2}, {:.2}, {:.2})",
            self.a, self.b, self.c, self.alpha, self.beta, self.gamma
        )
    }
}

/// A crystal orientation stored as the setting matrix `A = U B`, which maps integer `hkl`
/// to the Cartesian reciprocal-space scattering vector of the oriented crystal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Orientation {
    a_matrix: Matrix3<f64>,
}

impl Orientation {
    /// Build an orientation from a rotation `U` and a cell's `B` matrix.
    pub fn new(u: Matrix3<f64>, cell: &UnitCell) -> Self {
        Self {
            a_matrix: u * cell.b_matrix(),
        }
    }

    /// Wrap an already-assembled setting matrix (for example, a refined `A` matrix read from
    /// a stage-1 output table).
    pub fn from_setting_matrix(a_matrix: Matrix3<f64>) -> Self {
        Self { a_matrix }
    }

    pub fn setting_matrix(&self) -> Matrix3<f64> {
        self.a_matrix
    }

    /// The real-space basis vectors of the oriented crystal (columns of `(Aᵀ)⁻¹`).
    pub fn real_space_vectors(&self) -> SfxResult<[Vector3<f64>; 3]> {
        let inv = self
            .a_matrix
            .try_inverse()
            .ok_or_else(|| SfxError::Custom("singular setting matrix".to_string()))?;
        let m = inv.transpose();
        Ok([
            m.column(0).into_owned(),
            m.column(1).into_owned(),
            m.column(2).into_owned(),
        ])
    }

    /// Recover the unit-cell parameters implied by the setting matrix.
    pub fn unit_cell(&self) -> SfxResult<UnitCell> {
        let [va, vb, vc] = self.real_space_vectors()?;
        let angle = |x: &Vector3<f64>, y: &Vector3<f64>| {
            (x.dot(y) / (x.norm() * y.norm())).clamp(-1.0, 1.0).acos()
        };
        UnitCell::new(
            va.norm(),
            vb.norm(),
            vc.norm(),
            angle(&vb, &vc).to_degrees(),
            angle(&va, &vc).to_degrees(),
            angle(&va, &vb).to_degrees(),
        )
    }

    /// The misorientation angle (degrees) between this orientation and another with a
    /// matching cell, from the trace of the relative rotation `A₂ A₁⁻¹`.
    pub fn misorientation_deg(&self, other: &Orientation) -> SfxResult<f64> {
        let inv = self
            .a_matrix
            .try_inverse()
            .ok_or_else(|| SfxError::Custom("singular setting matrix".to_string()))?;
        let relative = other.a_matrix * inv;
        let cos_angle = ((relative.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
        Ok(cos_angle.acos().to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_cubic_cell_d_spacings() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        assert_relative_eq!(cell.volume(), 1000.0, epsilon = 1e-9);
        assert_relative_eq!(
            cell.d_spacing(MillerIndex::new(1, 0, 0)),
            10.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            cell.d_spacing(MillerIndex::new(1, 1, 0)),
            10.0 / 2.0_f64.sqrt(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            cell.d_spacing(MillerIndex::new(1, 1, 1)),
            10.0 / 3.0_f64.sqrt(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_hexagonal_cell_d_spacings() {
        let cell = UnitCell::new(10.0, 10.0, 20.0, 90.0, 90.0, 120.0).unwrap();
        // 1/d^2 = 4/3 (h^2 + hk + k^2)/a^2 + l^2/c^2
        assert_relative_eq!(
            cell.d_spacing(MillerIndex::new(1, 0, 0)),
            (3.0_f64).sqrt() / 2.0 * 10.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            cell.d_spacing(MillerIndex::new(0, 0, 2)),
            10.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_degenerate_cells_are_rejected() {
        assert!(UnitCell::new(0.0, 10.0, 10.0, 90.0, 90.0, 90.0).is_err());
        assert!(UnitCell::new(10.0, 10.0, 10.0, 180.0, 90.0, 90.0).is_err());
        // Angle triple that cannot close into a parallelepiped
        assert!(UnitCell::new(10.0, 10.0, 10.0, 60.0, 60.0, 150.0).is_err());
    }

    #[test]
    fn test_orientation_round_trips_the_cell() {
        let cell = UnitCell::new(79.1, 79.1, 38.4, 90.0, 90.0, 90.0).unwrap();
        let orientation = Orientation::new(Matrix3::identity(), &cell);
        let recovered = orientation.unit_cell().unwrap();
        for (got, want) in recovered.parameters().iter().zip(cell.parameters()) {
            assert_relative_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_misorientation_of_a_known_rotation() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        let reference = Orientation::new(Matrix3::identity(), &cell);
        let rotated = Orientation::new(
            nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), FRAC_PI_4).into_inner(),
            &cell,
        );
        assert_relative_eq!(
            reference.misorientation_deg(&rotated).unwrap(),
            45.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            reference.misorientation_deg(&reference).unwrap(),
            0.0,
            epsilon = 1e-9
        );
    }
}
