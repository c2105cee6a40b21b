use scanstitch_core::{Colors, PointCloud, PointXYZI};

/// ITU-R BT.601 luma weights, applied to 8-bit channels.
const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

#[inline]
pub fn luminance(rgb: [u8; 3]) -> f32 {
    LUMA[0] * rgb[0] as f32 + LUMA[1] * rgb[1] as f32 + LUMA[2] * rgb[2] as f32
}

/// Replace per-point colors with a luminance intensity in `0.0..=255.0`.
///
/// A cloud without colors is returned unchanged.
pub fn intensity_from_rgb(cloud: &PointCloud) -> PointCloud {
    let Some(colors) = &cloud.colors else {
        return cloud.clone();
    };
    let mut out = cloud.clone();
    out.intensity = Some((0..colors.len()).map(|i| luminance(colors.get(i))).collect());
    out.colors = None;
    out
}

/// Interleaved XYZI samples; points without color or intensity get 0.
pub fn to_xyzi(cloud: &PointCloud) -> Vec<PointXYZI> {
    (0..cloud.len())
        .map(|i| {
            let intensity = match (&cloud.intensity, &cloud.colors) {
                (Some(it), _) => it[i],
                (None, Some(c)) => luminance(c.get(i)),
                (None, None) => 0.0,
            };
            let [x, y, z] = cloud.point(i);
            PointXYZI { x, y, z, intensity }
        })
        .collect()
}

/// Grey display colors from intensity, clamped to the 8-bit range.
pub fn grey_from_intensity(cloud: &PointCloud) -> PointCloud {
    let Some(intensity) = &cloud.intensity else {
        return cloud.clone();
    };
    let mut colors = Colors::with_capacity(intensity.len());
    for &v in intensity {
        let g = if v.is_finite() { v.round().clamp(0.0, 255.0) as u8 } else { 0 };
        colors.push([g, g, g]);
    }
    let mut out = cloud.clone();
    out.colors = Some(colors);
    out
}

/// Positions only: drops colors and intensity, keeps normals.
pub fn strip_colors(cloud: &PointCloud) -> PointCloud {
    let mut out = cloud.clone();
    out.colors = None;
    out.intensity = None;
    out
}
