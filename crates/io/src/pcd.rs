//! PCD (Point Cloud Data) files, ASCII and binary.
//!
//! Recognised fields: `x y z` (required), `rgb`/`rgba` (packed 0x00RRGGBB,
//! stored as `F 4` the way PCL does it, `U 4` is read too), `intensity` and
//! `normal_x normal_y normal_z`. Other fields are skipped.

use std::fs;
use std::io;
use std::path::Path;

use scanstitch_core::{Colors, Normals, PointCloud};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFormat {
    Ascii,
    Binary,
}

pub fn read_pcd(path: impl AsRef<Path>) -> io::Result<PointCloud> {
    let raw = fs::read(path)?;
    decode_pcd(&raw)
}

/// Writes an ASCII PCD file.
pub fn write_pcd(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    fs::write(path, encode_pcd(cloud, DataFormat::Ascii))
}

/// Writes a binary (little-endian) PCD file.
pub fn write_pcd_binary(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    fs::write(path, encode_pcd(cloud, DataFormat::Binary))
}

/// Serialize `cloud` with every attribute it carries.
pub fn encode_pcd(cloud: &PointCloud, format: DataFormat) -> Vec<u8> {
    let columns = Column::for_cloud(cloud);
    let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
    let n = cloud.len();

    let mut out = String::new();
    out.push_str("# .PCD v0.7 - Point Cloud Data file format\n");
    out.push_str("VERSION 0.7\n");
    out.push_str(&format!("FIELDS {}\n", names.join(" ")));
    out.push_str(&format!("SIZE {}\n", vec!["4"; columns.len()].join(" ")));
    out.push_str(&format!("TYPE {}\n", vec!["F"; columns.len()].join(" ")));
    out.push_str(&format!("COUNT {}\n", vec!["1"; columns.len()].join(" ")));
    out.push_str(&format!("WIDTH {}\n", n));
    out.push_str("HEIGHT 1\n");
    out.push_str("VIEWPOINT 0 0 0 1 0 0 0\n");
    out.push_str(&format!("POINTS {}\n", n));

    match format {
        DataFormat::Ascii => {
            out.push_str("DATA ascii\n");
            for i in 0..n {
                let row: Vec<String> =
                    columns.iter().map(|c| c.value(cloud, i).to_string()).collect();
                out.push_str(&row.join(" "));
                out.push('\n');
            }
            out.into_bytes()
        }
        DataFormat::Binary => {
            out.push_str("DATA binary\n");
            let mut buf = out.into_bytes();
            buf.reserve(n * columns.len() * 4);
            for i in 0..n {
                for c in &columns {
                    buf.extend_from_slice(&c.value(cloud, i).to_le_bytes());
                }
            }
            buf
        }
    }
}

/// Parse PCD bytes.
pub fn decode_pcd(raw: &[u8]) -> io::Result<PointCloud> {
    let header = Header::parse(raw)?;
    let body = &raw[header.data_offset..];

    let x = header.require("x")?;
    let y = header.require("y")?;
    let z = header.require("z")?;
    let rgb = header.find("rgb").or_else(|| header.find("rgba"));
    let intensity = header.find("intensity");
    let normal = match (header.find("normal_x"), header.find("normal_y"), header.find("normal_z")) {
        (Some(a), Some(b), Some(c)) => Some([a, b, c]),
        _ => None,
    };

    // Never reserve more rows than the body could hold: an ASCII row is at
    // least one digit plus a separator per value.
    let capacity = match header.format {
        DataFormat::Ascii => header.points.min(body.len() / (2 * header.row_tokens).max(1)),
        DataFormat::Binary => header.points.min(body.len() / header.stride),
    };
    let mut builder =
        CloudBuilder::new(capacity, rgb.is_some(), intensity.is_some(), normal.is_some());
    match header.format {
        DataFormat::Ascii => {
            let text = std::str::from_utf8(body)
                .map_err(|e| invalid(format!("invalid UTF-8 in data: {}", e)))?;
            let rows = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .take(header.points);
            for (row_index, line) in rows.enumerate() {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() < header.row_tokens {
                    return Err(invalid(format!(
                        "row {} has {} values, expected {}",
                        row_index,
                        tokens.len(),
                        header.row_tokens
                    )));
                }
                let scalar = |f: &Field| -> io::Result<f32> {
                    tokens[f.token]
                        .parse::<f32>()
                        .map_err(|e| invalid(format!("row {} field {}: {}", row_index, f.name, e)))
                };
                builder.push_position([scalar(x)?, scalar(y)?, scalar(z)?]);
                if let Some(f) = rgb {
                    builder.push_rgb(ascii_packed(tokens[f.token], f)?);
                }
                if let Some(f) = intensity {
                    builder.push_intensity(scalar(f)?);
                }
                if let Some([a, b, c]) = normal {
                    builder.push_normal([scalar(a)?, scalar(b)?, scalar(c)?]);
                }
            }
            if builder.len() < header.points {
                log::warn!("PCD declares {} points but holds {}", header.points, builder.len());
            }
        }
        DataFormat::Binary => {
            let expected = header
                .points
                .checked_mul(header.stride)
                .ok_or_else(|| {
                    invalid(format!("PCD declares too many points: {}", header.points))
                })?;
            if body.len() < expected {
                return Err(invalid(format!(
                    "binary PCD data too short: have {} bytes, expected {} ({} points x {} bytes)",
                    body.len(),
                    expected,
                    header.points,
                    header.stride
                )));
            }
            for record in body[..expected].chunks_exact(header.stride) {
                builder.push_position([x.read(record), y.read(record), z.read(record)]);
                if let Some(f) = rgb {
                    builder.push_rgb(f.read_bits(record));
                }
                if let Some(f) = intensity {
                    builder.push_intensity(f.read(record));
                }
                if let Some([a, b, c]) = normal {
                    builder.push_normal([a.read(record), b.read(record), c.read(record)]);
                }
            }
        }
    }
    Ok(builder.finish())
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Packed colors in ASCII: PCL writes the float whose bits hold the color.
fn ascii_packed(token: &str, field: &Field) -> io::Result<u32> {
    let parsed = match field.kind {
        b'F' => token.parse::<f32>().map(f32::to_bits).ok(),
        _ => token.parse::<u32>().ok(),
    };
    parsed.ok_or_else(|| invalid(format!("bad {} value {:?}", field.name, token)))
}

#[derive(Clone, Copy)]
enum Column {
    X,
    Y,
    Z,
    Rgb,
    Intensity,
    NormalX,
    NormalY,
    NormalZ,
}

impl Column {
    fn for_cloud(cloud: &PointCloud) -> Vec<Column> {
        let mut columns = vec![Column::X, Column::Y, Column::Z];
        if cloud.colors.is_some() {
            columns.push(Column::Rgb);
        }
        if cloud.intensity.is_some() {
            columns.push(Column::Intensity);
        }
        if cloud.normals.is_some() {
            columns.extend([Column::NormalX, Column::NormalY, Column::NormalZ]);
        }
        columns
    }

    fn name(self) -> &'static str {
        match self {
            Column::X => "x",
            Column::Y => "y",
            Column::Z => "z",
            Column::Rgb => "rgb",
            Column::Intensity => "intensity",
            Column::NormalX => "normal_x",
            Column::NormalY => "normal_y",
            Column::NormalZ => "normal_z",
        }
    }

    /// Only called for columns `for_cloud` chose, so the attribute exists.
    fn value(self, cloud: &PointCloud, i: usize) -> f32 {
        match self {
            Column::X => cloud.x[i],
            Column::Y => cloud.y[i],
            Column::Z => cloud.z[i],
            Column::Rgb => cloud.colors.as_ref().map_or(0.0, |c| {
                let [r, g, b] = c.get(i);
                f32::from_bits(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
            }),
            Column::Intensity => cloud.intensity.as_ref().map_or(0.0, |v| v[i]),
            Column::NormalX => cloud.normals.as_ref().map_or(0.0, |n| n.nx[i]),
            Column::NormalY => cloud.normals.as_ref().map_or(0.0, |n| n.ny[i]),
            Column::NormalZ => cloud.normals.as_ref().map_or(0.0, |n| n.nz[i]),
        }
    }
}

#[derive(Debug)]
struct Field {
    name: String,
    size: usize,
    kind: u8,
    /// Byte offset within a binary record.
    offset: usize,
    /// Token index within an ASCII row.
    token: usize,
}

impl Field {
    fn read(&self, record: &[u8]) -> f32 {
        let b = &record[self.offset..self.offset + self.size];
        match (self.kind, self.size) {
            (b'F', 4) => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            (b'F', 8) => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }
            (b'U', 1) => b[0] as f32,
            (b'U', 2) => u16::from_le_bytes([b[0], b[1]]) as f32,
            (b'U', 4) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            (b'I', 1) => b[0] as i8 as f32,
            (b'I', 2) => i16::from_le_bytes([b[0], b[1]]) as f32,
            (b'I', 4) => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            _ => f32::NAN,
        }
    }

    fn read_bits(&self, record: &[u8]) -> u32 {
        let b = &record[self.offset..self.offset + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

struct Header {
    fields: Vec<Field>,
    points: usize,
    format: DataFormat,
    /// Bytes per binary record.
    stride: usize,
    /// Values per ASCII row.
    row_tokens: usize,
    data_offset: usize,
}

impl Header {
    fn parse(raw: &[u8]) -> io::Result<Self> {
        let mut names: Vec<String> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        let mut kinds: Vec<u8> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut width = None;
        let mut height = 1usize;
        let mut points = None;

        let mut offset = 0;
        while offset < raw.len() {
            let end = raw[offset..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(raw.len(), |p| offset + p + 1);
            let line = std::str::from_utf8(&raw[offset..end])
                .map_err(|_| invalid("PCD header is not valid UTF-8"))?
                .trim();
            offset = end;

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap_or_default();
            let values: Vec<&str> = parts.collect();

            match key {
                "FIELDS" => names = values.iter().map(|s| s.to_string()).collect(),
                "SIZE" => sizes = parse_all(key, &values)?,
                "TYPE" => {
                    kinds = values
                        .iter()
                        .map(|v| match v.as_bytes() {
                            [k @ (b'F' | b'U' | b'I')] => Ok(*k),
                            _ => Err(invalid(format!("unknown TYPE {:?}", v))),
                        })
                        .collect::<io::Result<_>>()?
                }
                "COUNT" => counts = parse_all(key, &values)?,
                "WIDTH" => width = Some(parse_one(key, &values)?),
                "HEIGHT" => height = parse_one(key, &values)?,
                "POINTS" => points = Some(parse_one(key, &values)?),
                "DATA" => {
                    let format = match values.first().copied() {
                        Some("ascii") => DataFormat::Ascii,
                        Some("binary") => DataFormat::Binary,
                        other => {
                            return Err(io::Error::new(
                                io::ErrorKind::Unsupported,
                                format!("unsupported PCD DATA format: {}", other.unwrap_or("")),
                            ))
                        }
                    };
                    let points = match (points, width) {
                        (Some(points), _) => points,
                        (None, Some(width)) => width
                            .checked_mul(height)
                            .ok_or_else(|| invalid("PCD WIDTH x HEIGHT overflows"))?,
                        (None, None) => return Err(invalid("PCD file missing POINTS/WIDTH header")),
                    };
                    return Self::layout(names, sizes, kinds, counts, points, format, offset);
                }
                _ => {}
            }
        }
        Err(invalid("PCD file missing DATA line"))
    }

    fn layout(
        names: Vec<String>,
        sizes: Vec<usize>,
        kinds: Vec<u8>,
        counts: Vec<usize>,
        points: usize,
        format: DataFormat,
        data_offset: usize,
    ) -> io::Result<Self> {
        let n = names.len();
        // SIZE and TYPE may be omitted for all-float files.
        let sizes = if sizes.is_empty() { vec![4; n] } else { sizes };
        let kinds = if kinds.is_empty() { vec![b'F'; n] } else { kinds };
        let counts = if counts.is_empty() { vec![1; n] } else { counts };
        if sizes.len() != n || kinds.len() != n || counts.len() != n {
            return Err(invalid("FIELDS, SIZE, TYPE and COUNT lengths differ"));
        }

        let mut fields = Vec::with_capacity(n);
        let mut stride = 0;
        let mut row_tokens = 0;
        for (((name, size), kind), count) in names.into_iter().zip(sizes).zip(kinds).zip(counts) {
            // Packed colors are read as raw 32-bit words.
            if (name == "rgb" || name == "rgba") && size != 4 {
                return Err(invalid(format!("{} field must have SIZE 4, got {}", name, size)));
            }
            let width = size
                .checked_mul(count)
                .and_then(|w| w.checked_add(stride))
                .ok_or_else(|| invalid(format!("{} field is too large", name)))?;
            fields.push(Field {
                name,
                size,
                kind,
                offset: stride,
                token: row_tokens,
            });
            stride = width;
            row_tokens += count;
        }
        if stride == 0 {
            return Err(invalid("PCD record has zero size"));
        }

        Ok(Self {
            fields,
            points,
            format,
            stride,
            row_tokens,
            data_offset,
        })
    }

    fn find(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn require(&self, name: &str) -> io::Result<&Field> {
        self.find(name)
            .ok_or_else(|| invalid(format!("PCD file missing {} field", name)))
    }
}

fn parse_one(key: &str, values: &[&str]) -> io::Result<usize> {
    values
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| invalid(format!("invalid {} value", key)))
}

fn parse_all(key: &str, values: &[&str]) -> io::Result<Vec<usize>> {
    values
        .iter()
        .map(|v| v.parse().map_err(|_| invalid(format!("invalid {} value {:?}", key, v))))
        .collect()
}

struct CloudBuilder {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    colors: Option<Colors>,
    intensity: Option<Vec<f32>>,
    normals: Option<Normals>,
}

impl CloudBuilder {
    fn new(capacity: usize, rgb: bool, intensity: bool, normals: bool) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            colors: rgb.then(|| Colors::with_capacity(capacity)),
            intensity: intensity.then(|| Vec::with_capacity(capacity)),
            normals: normals.then(|| Normals::with_capacity(capacity)),
        }
    }

    fn len(&self) -> usize {
        self.x.len()
    }

    fn push_position(&mut self, p: [f32; 3]) {
        self.x.push(p[0]);
        self.y.push(p[1]);
        self.z.push(p[2]);
    }

    fn push_rgb(&mut self, packed: u32) {
        if let Some(c) = self.colors.as_mut() {
            c.push([(packed >> 16) as u8, (packed >> 8) as u8, packed as u8]);
        }
    }

    fn push_intensity(&mut self, v: f32) {
        if let Some(i) = self.intensity.as_mut() {
            i.push(v);
        }
    }

    fn push_normal(&mut self, n: [f32; 3]) {
        if let Some(normals) = self.normals.as_mut() {
            normals.push(n);
        }
    }

    fn finish(self) -> PointCloud {
        let mut cloud = PointCloud::from_xyz(self.x, self.y, self.z);
        cloud.colors = self.colors;
        cloud.intensity = self.intensity;
        cloud.normals = self.normals;
        cloud
    }
}
