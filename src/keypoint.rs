//! Keypoints and the flat raster image type shared by every per-frame buffer
//! (§3). Grounded in the teacher's flat, `Vec`-backed stores
//! (`src/store.rs`, `src/pointstore.rs`) rather than `Vec<Vec<_>>` rasters.

use nalgebra::Vector3;

/// A flat `W×H` raster. Raster index is `y * width + x`, matching §3.
///
/// # Examples
///
/// ```
/// use scoreforest_reloc::keypoint::Image;
///
/// let mut img = Image::new(4, 3, 0u8);
/// img.set(1, 2, 9);
/// assert_eq!(*img.get(1, 2), 9);
/// assert_eq!(img.index(1, 2), 2 * 4 + 1);
/// ```
#[derive(Debug, Clone)]
pub struct Image<T> {
    pub width: usize,
    pub height: usize,
    data: Vec<T>,
}

impl<T: Clone> Image<T> {
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Image {
            width,
            height,
            data: vec![fill; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(data.len(), width * height, "raster size mismatch");
        Image { width, height, data }
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    #[inline]
    pub fn at(&self, raster_index: usize) -> &T {
        &self.data[raster_index]
    }

    #[inline]
    pub fn at_mut(&mut self, raster_index: usize) -> &mut T {
        &mut self.data[raster_index]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// A valid image location carrying an eye-space 3D position (§3). The colour
/// triple is forest input feature data only; the relocaliser core never
/// reads it for scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x_cam: Vector3<f64>,
    pub colour: [u8; 3],
    pub valid: bool,
}

impl Keypoint {
    pub fn invalid() -> Self {
        Keypoint {
            x_cam: Vector3::zeros(),
            colour: [0; 3],
            valid: false,
        }
    }

    pub fn new(x_cam: Vector3<f64>, colour: [u8; 3]) -> Self {
        Keypoint {
            x_cam,
            colour,
            valid: true,
        }
    }
}

pub type KeypointsImage = Image<Keypoint>;

/// Opaque descriptor image: the forest's input feature vector per pixel,
/// shape otherwise unconstrained by this crate (§4.A).
pub type DescriptorsImage = Image<Vec<f32>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_index_matches_spec() {
        let img: Image<u8> = Image::new(8, 5, 0);
        assert_eq!(img.index(3, 2), 2 * 8 + 3);
    }

    #[test]
    fn invalid_keypoint_defaults() {
        let kp = Keypoint::invalid();
        assert!(!kp.valid);
    }
}
