//! Host-side representation of a 3D color lookup table.
//!
//! Parsing LUT files is the surrounding editor's job; the engine only needs
//! the cube's edge length and its RGB lattice, uploaded as an `rgba16float`
//! 3D texture and sampled tetrahedrally in the kernel.

use crate::{RenderError, RenderResult};

/// A cubic LUT of `size^3` RGB triples, fastest axis red, slowest blue.
#[derive(Debug, Clone)]
pub struct Lut {
    pub size: u32,
    pub data: Vec<f32>,
}

impl Lut {
    /// Wraps a lattice after checking it really is a cube of at least 2
    /// samples per axis.
    pub fn new(size: u32, data: Vec<f32>) -> RenderResult<Self> {
        if size < 2 {
            return Err(RenderError::DimensionMismatch(format!(
                "LUT must have at least 2 samples per axis, got {size}"
            )));
        }
        let expected = size as usize * size as usize * size as usize * 3;
        if data.len() != expected {
            return Err(RenderError::DimensionMismatch(format!(
                "LUT data holds {} floats, a {size}^3 cube needs {expected}",
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(RenderError::DimensionMismatch(
                "LUT data contains non-finite values".into(),
            ));
        }
        Ok(Self { size, data })
    }

    /// The identity cube, useful for intensity ramps and tests.
    pub fn identity(size: u32) -> RenderResult<Self> {
        if size < 2 {
            return Err(RenderError::DimensionMismatch(format!(
                "LUT must have at least 2 samples per axis, got {size}"
            )));
        }
        let step = 1.0 / (size - 1) as f32;
        let mut data = Vec::with_capacity((size * size * size * 3) as usize);
        for b in 0..size {
            for g in 0..size {
                for r in 0..size {
                    data.push(r as f32 * step);
                    data.push(g as f32 * step);
                    data.push(b as f32 * step);
                }
            }
        }
        Ok(Self { size, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_cubes() {
        assert!(Lut::new(1, vec![0.0; 3]).is_err());
        assert!(Lut::new(2, vec![0.0; 23]).is_err());
        assert!(Lut::new(2, vec![f32::NAN; 24]).is_err());
    }

    #[test]
    fn identity_cube_has_unit_corners() {
        let lut = Lut::identity(2).unwrap();
        assert_eq!(lut.data.len(), 24);
        assert_eq!(&lut.data[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&lut.data[21..24], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn accepts_well_formed_cubes() {
        let data = vec![0.5; 27 * 3];
        let lut = Lut::new(3, data).unwrap();
        assert_eq!(lut.size, 3);
    }
}
