/// One colored sample as delivered by a depth + color sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointXYZRGB {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// One sample with a scalar intensity (luminance or infrared return).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointXYZI {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl PointXYZRGB {
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}
