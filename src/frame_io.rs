//! Minimal on-disk frame container for the CLI binary.
//!
//! RGB-D capture is an external collaborator (`spec.md` §1): this crate never
//! reads a camera or a dataset's native format. What the CLI needs, though,
//! is *some* concrete file per frame pairing a keypoints image with a
//! descriptors image so `--frames <dir>` has something to iterate over; this
//! module defines that narrow, crate-local container, analogous to how the
//! teacher's own `main.rs` synthesizes its test stream inline rather than
//! reading a real data source.
//!
//! Format (little-endian, one file per frame): `u32 width`, `u32 height`,
//! `u32 feature_count`, then `width * height` records of `{u8 valid, f32
//! x,y,z, u8 r,g,b, feature_count x f32}`.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Vector3;

use crate::keypoint::{DescriptorsImage, Image, Keypoint, KeypointsImage};

pub fn read_frame<R: Read>(mut reader: R) -> std::io::Result<(KeypointsImage, DescriptorsImage)> {
    let width = reader.read_u32::<LittleEndian>()? as usize;
    let height = reader.read_u32::<LittleEndian>()? as usize;
    let feature_count = reader.read_u32::<LittleEndian>()? as usize;

    let mut keypoints = KeypointsImage::new(width, height, Keypoint::invalid());
    let mut descriptors = DescriptorsImage::new(width, height, Vec::new());

    for i in 0..(width * height) {
        let valid = reader.read_u8()? != 0;
        let x = reader.read_f32::<LittleEndian>()? as f64;
        let y = reader.read_f32::<LittleEndian>()? as f64;
        let z = reader.read_f32::<LittleEndian>()? as f64;
        let mut colour = [0u8; 3];
        reader.read_exact(&mut colour)?;

        let mut descriptor = vec![0f32; feature_count];
        reader.read_f32_into::<LittleEndian>(&mut descriptor)?;

        *keypoints.at_mut(i) = if valid {
            Keypoint::new(Vector3::new(x, y, z), colour)
        } else {
            Keypoint::invalid()
        };
        *descriptors.at_mut(i) = descriptor;
    }

    Ok((keypoints, descriptors))
}

pub fn write_frame<W: Write>(
    mut writer: W,
    keypoints: &KeypointsImage,
    descriptors: &DescriptorsImage,
) -> std::io::Result<()> {
    assert_eq!(keypoints.width, descriptors.width);
    assert_eq!(keypoints.height, descriptors.height);
    let feature_count = descriptors.as_slice().first().map_or(0, |d| d.len());

    writer.write_u32::<LittleEndian>(keypoints.width as u32)?;
    writer.write_u32::<LittleEndian>(keypoints.height as u32)?;
    writer.write_u32::<LittleEndian>(feature_count as u32)?;

    for i in 0..keypoints.len() {
        let kp = keypoints.at(i);
        writer.write_u8(kp.valid as u8)?;
        writer.write_f32::<LittleEndian>(kp.x_cam.x as f32)?;
        writer.write_f32::<LittleEndian>(kp.x_cam.y as f32)?;
        writer.write_f32::<LittleEndian>(kp.x_cam.z as f32)?;
        writer.write_all(&kp.colour)?;
        for v in descriptors.at(i) {
            writer.write_f32::<LittleEndian>(*v)?;
        }
    }

    Ok(())
}

/// Lists frame files under `dir` in a stable order (lexicographic by file
/// name), using the file stem as the frame id for the output CSV (§6).
pub fn list_frame_files(dir: &std::path::Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut paths: Vec<std::path::PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}
