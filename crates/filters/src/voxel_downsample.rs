use hashbrown::HashMap;
use scanstitch_core::{ensure_positive, Colors, ParamError, PointCloud};

#[derive(Default, Clone, Copy)]
struct VoxelAccum {
    sx: f64,
    sy: f64,
    sz: f64,
    sr: u32,
    sg: u32,
    sb: u32,
    si: f64,
    n: usize,
}

/// Replace every occupied cubic voxel with the centroid of its points.
///
/// Colors and intensity are averaged the same way; normals are dropped since
/// an averaged normal is not a fitted one. Output order follows the sorted
/// voxel keys, so the result is deterministic. Non-finite points are skipped.
pub fn voxel_downsample(
    cloud: &PointCloud,
    voxel_side_length: f32,
) -> Result<PointCloud, ParamError> {
    let voxel_size = ensure_positive("voxel_side_length", voxel_side_length)?;

    if cloud.is_empty() {
        return Ok(PointCloud::new());
    }

    let mut bins: HashMap<(i32, i32, i32), VoxelAccum> = HashMap::new();

    for i in 0..cloud.len() {
        if !cloud.is_finite_at(i) {
            continue;
        }
        let [px, py, pz] = cloud.point(i);

        let key = (
            (px / voxel_size).floor() as i32,
            (py / voxel_size).floor() as i32,
            (pz / voxel_size).floor() as i32,
        );

        let entry = bins.entry(key).or_default();
        entry.sx += px as f64;
        entry.sy += py as f64;
        entry.sz += pz as f64;
        if let Some(colors) = &cloud.colors {
            let [r, g, b] = colors.get(i);
            entry.sr += r as u32;
            entry.sg += g as u32;
            entry.sb += b as u32;
        }
        if let Some(intensity) = &cloud.intensity {
            entry.si += intensity[i] as f64;
        }
        entry.n += 1;
    }

    let mut keys: Vec<(i32, i32, i32)> = bins.keys().copied().collect();
    keys.sort_unstable();

    let mut x = Vec::with_capacity(keys.len());
    let mut y = Vec::with_capacity(keys.len());
    let mut z = Vec::with_capacity(keys.len());
    let mut colors = cloud.colors.as_ref().map(|_| Colors::with_capacity(keys.len()));
    let mut intensity = cloud.intensity.as_ref().map(|_| Vec::with_capacity(keys.len()));

    for key in &keys {
        let a = bins[key];
        let denom = a.n as f64;
        x.push((a.sx / denom) as f32);
        y.push((a.sy / denom) as f32);
        z.push((a.sz / denom) as f32);
        if let Some(c) = colors.as_mut() {
            let n = a.n as u32;
            c.push([
                ((a.sr + n / 2) / n) as u8,
                ((a.sg + n / 2) / n) as u8,
                ((a.sb + n / 2) / n) as u8,
            ]);
        }
        if let Some(it) = intensity.as_mut() {
            it.push((a.si / denom) as f32);
        }
    }

    let mut out = PointCloud::from_xyz(x, y, z);
    out.colors = colors;
    out.intensity = intensity;
    Ok(out)
}
