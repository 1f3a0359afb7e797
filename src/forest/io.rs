//! Bit-exact frozen-forest file I/O (§6).
//!
//! ```text
//! Header: magic "GFOR", u32 version=1, u32 tree_count T,
//!         u32 max_modes_per_leaf K_in, u32 feature_count.
//! Per tree: u32 node_count, then node_count x
//!           {i32 left, i32 right, u32 featureIndex, f32 threshold}.
//! Per tree: u32 leaf_count, then per leaf u32 mode_count followed by
//!           mode records {f32 mu[3], f32 invSigma[9] row-major,
//!           f32 logDetSigma, u32 n, u8 colour[3], u8 pad}.
//! ```
//! All little-endian, IEEE-754 float32 on disk; widened to `f64` in memory
//! to match the rest of the crate's geometry (`src/pose.rs`, `src/kabsch.rs`).
//! The two "for each tree" sections are laid out back to back: every tree's
//! node array first, then every tree's leaf table.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{Matrix3, Vector3};

use super::mode::Mode;
use super::node::{Tree, TreeNode};
use crate::errors::ForestLoadError;

const MAGIC: &[u8; 4] = b"GFOR";
const VERSION: u32 = 1;

/// An immutable, shared ensemble of `T` trees loaded once at startup (§3:
/// "The forest and its per-leaf mode tables are loaded once at startup and
/// are immutable thereafter.").
#[derive(Debug, Clone)]
pub struct Forest {
    pub trees: Vec<Tree>,
    pub max_modes_per_leaf: usize,
    pub feature_count: usize,
}

impl Forest {
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Load a forest from the binary format of `spec.md` §6.
    pub fn load<R: Read>(mut reader: R) -> Result<Forest, ForestLoadError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ForestLoadError::Format {
                reason: "missing GFOR magic",
            });
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(ForestLoadError::Version { found: version });
        }

        let tree_count = reader.read_u32::<LittleEndian>()? as usize;
        let max_modes_per_leaf = reader.read_u32::<LittleEndian>()? as usize;
        let feature_count = reader.read_u32::<LittleEndian>()? as usize;

        let mut node_arrays = Vec::with_capacity(tree_count);
        for _ in 0..tree_count {
            let node_count = reader.read_u32::<LittleEndian>()? as usize;
            let mut nodes = Vec::with_capacity(node_count);
            for _ in 0..node_count {
                let left_child = reader.read_i32::<LittleEndian>()?;
                let right_child = reader.read_i32::<LittleEndian>()?;
                let feature_index = reader.read_u32::<LittleEndian>()?;
                let threshold = reader.read_f32::<LittleEndian>()?;
                nodes.push(TreeNode {
                    left_child,
                    right_child,
                    feature_index,
                    threshold,
                });
            }
            node_arrays.push(nodes);
        }

        let mut trees = Vec::with_capacity(tree_count);
        for nodes in node_arrays {
            let leaf_count = reader.read_u32::<LittleEndian>()? as usize;
            let mut leaves = Vec::with_capacity(leaf_count);
            for _ in 0..leaf_count {
                let mode_count = reader.read_u32::<LittleEndian>()? as usize;
                let mut modes = Vec::with_capacity(mode_count);
                for _ in 0..mode_count {
                    let mut mu = [0f32; 3];
                    reader.read_f32_into::<LittleEndian>(&mut mu)?;
                    let mut inv_sigma = [0f32; 9];
                    reader.read_f32_into::<LittleEndian>(&mut inv_sigma)?;
                    let log_det = reader.read_f32::<LittleEndian>()?;
                    let n = reader.read_u32::<LittleEndian>()?;
                    let mut colour = [0u8; 3];
                    reader.read_exact(&mut colour)?;
                    let mut pad = [0u8; 1];
                    reader.read_exact(&mut pad)?;

                    let inv_sigma_f64: Vec<f64> = inv_sigma.iter().map(|&v| v as f64).collect();
                    modes.push(Mode {
                        mean: Vector3::new(mu[0] as f64, mu[1] as f64, mu[2] as f64),
                        // row-major 3x3: `from_row_slice` matches the on-disk layout.
                        inv_cov: Matrix3::from_row_slice(&inv_sigma_f64),
                        log_det_cov: log_det as f64,
                        n,
                        colour_mean: Some(colour),
                    });
                }
                leaves.push(modes);
            }
            trees.push(Tree { nodes, leaves });
        }

        Ok(Forest {
            trees,
            max_modes_per_leaf,
            feature_count,
        })
    }

    /// Write a forest back out in the format [`Forest::load`] reads. Used by
    /// the forest round-trip property of `spec.md` §8.
    pub fn save<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(VERSION)?;
        writer.write_u32::<LittleEndian>(self.trees.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.max_modes_per_leaf as u32)?;
        writer.write_u32::<LittleEndian>(self.feature_count as u32)?;

        for tree in &self.trees {
            writer.write_u32::<LittleEndian>(tree.nodes.len() as u32)?;
            for node in &tree.nodes {
                writer.write_i32::<LittleEndian>(node.left_child)?;
                writer.write_i32::<LittleEndian>(node.right_child)?;
                writer.write_u32::<LittleEndian>(node.feature_index)?;
                writer.write_f32::<LittleEndian>(node.threshold)?;
            }
        }

        for tree in &self.trees {
            writer.write_u32::<LittleEndian>(tree.leaves.len() as u32)?;
            for leaf in &tree.leaves {
                writer.write_u32::<LittleEndian>(leaf.len() as u32)?;
                for mode in leaf {
                    for v in mode.mean.iter() {
                        writer.write_f32::<LittleEndian>(*v as f32)?;
                    }
                    // row-major traversal of a column-major nalgebra matrix
                    // is exactly its transpose's column-major (= element)
                    // iteration order.
                    for v in mode.inv_cov.transpose().iter() {
                        writer.write_f32::<LittleEndian>(*v as f32)?;
                    }
                    writer.write_f32::<LittleEndian>(mode.log_det_cov as f32)?;
                    writer.write_u32::<LittleEndian>(mode.n)?;
                    let colour = mode.colour_mean.unwrap_or([0, 0, 0]);
                    writer.write_all(&colour)?;
                    writer.write_all(&[0u8])?;
                }
            }
        }

        Ok(())
    }
}
