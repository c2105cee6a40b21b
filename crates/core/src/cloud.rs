use crate::{Aabb, PointXYZRGB};

/// Structure-of-arrays point cloud.
///
/// Positions are always present; colors, intensity and normals are optional
/// per-point attributes. When present, every attribute has exactly `len()`
/// entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub normals: Option<Normals>,
    pub colors: Option<Colors>,
    pub intensity: Option<Vec<f32>>,
}

/// Per-point surface normals.
///
/// A normal whose components are NaN is *flagged*: the estimator could not
/// fit a plane for that point (too few neighbours). Use [`Normals::is_valid`]
/// before consuming a normal.
#[derive(Debug, Clone, PartialEq)]
pub struct Normals {
    pub nx: Vec<f32>,
    pub ny: Vec<f32>,
    pub nz: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Colors {
    pub r: Vec<u8>,
    pub g: Vec<u8>,
    pub b: Vec<u8>,
}

impl Normals {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            nx: Vec::with_capacity(n),
            ny: Vec::with_capacity(n),
            nz: Vec::with_capacity(n),
        }
    }

    pub fn from_vectors(normals: &[[f32; 3]]) -> Self {
        let mut out = Self::with_capacity(normals.len());
        for n in normals {
            out.push(*n);
        }
        out
    }

    pub fn push(&mut self, n: [f32; 3]) {
        self.nx.push(n[0]);
        self.ny.push(n[1]);
        self.nz.push(n[2]);
    }

    pub fn len(&self) -> usize {
        self.nx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nx.is_empty()
    }

    pub fn get(&self, i: usize) -> [f32; 3] {
        [self.nx[i], self.ny[i], self.nz[i]]
    }

    /// False for flagged (NaN) normals.
    pub fn is_valid(&self, i: usize) -> bool {
        self.nx[i].is_finite() && self.ny[i].is_finite() && self.nz[i].is_finite()
    }

    pub fn valid_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_valid(i)).count()
    }

    pub const FLAGGED: [f32; 3] = [f32::NAN, f32::NAN, f32::NAN];
}

impl Colors {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            r: Vec::with_capacity(n),
            g: Vec::with_capacity(n),
            b: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, rgb: [u8; 3]) {
        self.r.push(rgb[0]);
        self.g.push(rgb[1]);
        self.b.push(rgb[2]);
    }

    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    pub fn get(&self, i: usize) -> [u8; 3] {
        [self.r[i], self.g[i], self.b[i]]
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            normals: None,
            colors: None,
            intensity: None,
        }
    }

    pub fn from_xyz(x: Vec<f32>, y: Vec<f32>, z: Vec<f32>) -> Self {
        assert_eq!(x.len(), y.len(), "x and y must have same length");
        assert_eq!(x.len(), z.len(), "x and z must have same length");

        Self {
            x,
            y,
            z,
            normals: None,
            colors: None,
            intensity: None,
        }
    }

    pub fn from_points(points: &[[f32; 3]]) -> Self {
        let mut x = Vec::with_capacity(points.len());
        let mut y = Vec::with_capacity(points.len());
        let mut z = Vec::with_capacity(points.len());
        for p in points {
            x.push(p[0]);
            y.push(p[1]);
            z.push(p[2]);
        }
        Self::from_xyz(x, y, z)
    }

    /// Build a colored cloud from interleaved XYZRGB points, the layout a
    /// depth/color sensor driver produces.
    pub fn from_points_rgb(points: &[PointXYZRGB]) -> Self {
        let mut cloud = Self::from_points(
            &points
                .iter()
                .map(|p| [p.x, p.y, p.z])
                .collect::<Vec<_>>(),
        );
        let mut colors = Colors::with_capacity(points.len());
        for p in points {
            colors.push([p.r, p.g, p.b]);
        }
        cloud.colors = Some(colors);
        cloud
    }

    pub fn with_colors(mut self, colors: Colors) -> Self {
        assert_eq!(colors.len(), self.len(), "colors must match point count");
        self.colors = Some(colors);
        self
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.x.len(), self.y.len());
        debug_assert_eq!(self.x.len(), self.z.len());
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_xyz(&self.x, &self.y, &self.z)
    }

    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    pub fn is_finite_at(&self, i: usize) -> bool {
        self.x[i].is_finite() && self.y[i].is_finite() && self.z[i].is_finite()
    }

    pub fn iter_points(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| [*x, *y, *z])
    }

    /// Positions copied into a contiguous array, the layout the kd-tree and
    /// the parallel estimators consume.
    pub fn to_points(&self) -> Vec<[f32; 3]> {
        self.iter_points().collect()
    }

    pub fn centroid(&self) -> Option<[f32; 3]> {
        if self.is_empty() {
            return None;
        }
        let mut acc = [0.0f64; 3];
        for p in self.iter_points() {
            acc[0] += p[0] as f64;
            acc[1] += p[1] as f64;
            acc[2] += p[2] as f64;
        }
        let n = self.len() as f64;
        Some([
            (acc[0] / n) as f32,
            (acc[1] / n) as f32,
            (acc[2] / n) as f32,
        ])
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        let mut x = Vec::with_capacity(indices.len());
        let mut y = Vec::with_capacity(indices.len());
        let mut z = Vec::with_capacity(indices.len());

        for &idx in indices {
            assert!(idx < self.len(), "index out of bounds in select");
            x.push(self.x[idx]);
            y.push(self.y[idx]);
            z.push(self.z[idx]);
        }

        let normals = self.normals.as_ref().map(|n| Normals {
            nx: indices.iter().map(|&idx| n.nx[idx]).collect(),
            ny: indices.iter().map(|&idx| n.ny[idx]).collect(),
            nz: indices.iter().map(|&idx| n.nz[idx]).collect(),
        });

        let colors = self.colors.as_ref().map(|c| Colors {
            r: indices.iter().map(|&idx| c.r[idx]).collect(),
            g: indices.iter().map(|&idx| c.g[idx]).collect(),
            b: indices.iter().map(|&idx| c.b[idx]).collect(),
        });

        let intensity = self
            .intensity
            .as_ref()
            .map(|it| indices.iter().map(|&idx| it[idx]).collect());

        Self {
            x,
            y,
            z,
            normals,
            colors,
            intensity,
        }
    }

    /// Append `other` to the end of this cloud.
    ///
    /// An optional attribute survives only if both sides carry it (an empty
    /// `self` adopts whatever `other` has), so attribute lengths always match
    /// the point count.
    pub fn extend_from(&mut self, other: &PointCloud) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }

        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);

        self.colors = match (self.colors.take(), &other.colors) {
            (Some(mut mine), Some(theirs)) => {
                mine.r.extend_from_slice(&theirs.r);
                mine.g.extend_from_slice(&theirs.g);
                mine.b.extend_from_slice(&theirs.b);
                Some(mine)
            }
            _ => None,
        };

        self.normals = match (self.normals.take(), &other.normals) {
            (Some(mut mine), Some(theirs)) => {
                mine.nx.extend_from_slice(&theirs.nx);
                mine.ny.extend_from_slice(&theirs.ny);
                mine.nz.extend_from_slice(&theirs.nz);
                Some(mine)
            }
            _ => None,
        };

        self.intensity = match (self.intensity.take(), &other.intensity) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            _ => None,
        };
    }

    /// Concatenate several clouds into one composite.
    pub fn concat<'a>(clouds: impl IntoIterator<Item = &'a PointCloud>) -> PointCloud {
        let mut out = PointCloud::new();
        for c in clouds {
            out.extend_from(c);
        }
        out
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}
