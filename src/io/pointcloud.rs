//! PLY point cloud reading and writing.
//!
//! Supports files whose only populated element is `vertex`, encoded as
//! ASCII or binary little endian, with any number of scalar properties.
//! Properties other than coordinates and normals are carried through
//! unchanged so a transformed cloud can be written back in place.

use nalgebra::{Matrix4, Point3, Vector3};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{DatasetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyEncoding {
    Ascii,
    BinaryLittleEndian,
}

impl PlyEncoding {
    fn header_name(&self) -> &'static str {
        match self {
            PlyEncoding::Ascii => "ascii",
            PlyEncoding::BinaryLittleEndian => "binary_little_endian",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            ScalarType::I8 => "char",
            ScalarType::U8 => "uchar",
            ScalarType::I16 => "short",
            ScalarType::U16 => "ushort",
            ScalarType::I32 => "int",
            ScalarType::U32 => "uint",
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
        }
    }

    fn size(&self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    fn decode_le(&self, b: &[u8]) -> f64 {
        match self {
            ScalarType::I8 => b[0] as i8 as f64,
            ScalarType::U8 => b[0] as f64,
            ScalarType::I16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            ScalarType::U16 => u16::from_le_bytes([b[0], b[1]]) as f64,
            ScalarType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ScalarType::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ScalarType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            ScalarType::F64 => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        }
    }

    fn encode_le(&self, v: f64, out: &mut Vec<u8>) {
        match self {
            ScalarType::I8 => out.extend_from_slice(&(v.round() as i8).to_le_bytes()),
            ScalarType::U8 => out.extend_from_slice(&(v.round() as u8).to_le_bytes()),
            ScalarType::I16 => out.extend_from_slice(&(v.round() as i16).to_le_bytes()),
            ScalarType::U16 => out.extend_from_slice(&(v.round() as u16).to_le_bytes()),
            ScalarType::I32 => out.extend_from_slice(&(v.round() as i32).to_le_bytes()),
            ScalarType::U32 => out.extend_from_slice(&(v.round() as u32).to_le_bytes()),
            ScalarType::F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            ScalarType::F64 => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn format_ascii(&self, v: f64, out: &mut String) {
        let _ = match self {
            ScalarType::F32 => write!(out, "{}", v as f32),
            ScalarType::F64 => write!(out, "{}", v),
            _ => write!(out, "{}", v.round() as i64),
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlyProperty {
    pub name: String,
    pub kind: ScalarType,
}

/// Vertex table of a PLY file, one `f64` per property per vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub encoding: PlyEncoding,
    /// `comment` and `obj_info` header lines, verbatim
    pub comments: Vec<String>,
    pub properties: Vec<PlyProperty>,
    pub rows: Vec<Vec<f64>>,
}

impl PointCloud {
    /// Cloud with `double` x, y, z properties only.
    pub fn from_points(points: &[Point3<f64>], encoding: PlyEncoding) -> Self {
        let properties = ["x", "y", "z"]
            .iter()
            .map(|n| PlyProperty {
                name: n.to_string(),
                kind: ScalarType::F64,
            })
            .collect();
        Self {
            encoding,
            comments: Vec::new(),
            properties,
            rows: points.iter().map(|p| vec![p.x, p.y, p.z]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    fn xyz_indices(&self, names: [&str; 3]) -> Option<[usize; 3]> {
        Some([
            self.property_index(names[0])?,
            self.property_index(names[1])?,
            self.property_index(names[2])?,
        ])
    }

    pub fn points(&self) -> Vec<Point3<f64>> {
        match self.xyz_indices(["x", "y", "z"]) {
            Some([ix, iy, iz]) => self
                .rows
                .iter()
                .map(|r| Point3::new(r[ix], r[iy], r[iz]))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Applies a homogeneous transform to every point; normals, if present,
    /// are rotated by the linear part.
    pub fn transform(&mut self, matrix: &Matrix4<f64>) {
        if let Some([ix, iy, iz]) = self.xyz_indices(["x", "y", "z"]) {
            for row in &mut self.rows {
                let p = matrix.transform_point(&Point3::new(row[ix], row[iy], row[iz]));
                row[ix] = p.x;
                row[iy] = p.y;
                row[iz] = p.z;
            }
        }
        if let Some([ix, iy, iz]) = self.xyz_indices(["nx", "ny", "nz"]) {
            for row in &mut self.rows {
                let n = matrix.transform_vector(&Vector3::new(row[ix], row[iy], row[iz]));
                row[ix] = n.x;
                row[iy] = n.y;
                row[iz] = n.z;
            }
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| DatasetError::io(path, e))?;
        Self::parse(&bytes).map_err(|reason| DatasetError::point_cloud(path, reason))
    }

    /// Replaces the file at `path` with this cloud, in its own encoding.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode();
        let tmp = path.with_extension("ply.tmp");
        fs::write(&tmp, bytes).map_err(|e| DatasetError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| DatasetError::io(path, e))?;
        Ok(())
    }

    fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let marker = b"end_header";
        let header_end = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .ok_or("missing end_header")?;
        let body_start = bytes[header_end..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| header_end + i + 1)
            .unwrap_or(bytes.len());

        let header = std::str::from_utf8(&bytes[..header_end])
            .map_err(|_| "header is not valid UTF-8".to_string())?;
        let mut lines = header.lines().map(str::trim);

        if lines.next() != Some("ply") {
            return Err("not a PLY file".into());
        }

        let mut encoding = None;
        let mut comments = Vec::new();
        let mut properties = Vec::new();
        let mut vertex_count: Option<usize> = None;
        let mut in_vertex = false;

        for line in lines {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [] => {}
                ["format", fmt, _version] => {
                    encoding = Some(match *fmt {
                        "ascii" => PlyEncoding::Ascii,
                        "binary_little_endian" => PlyEncoding::BinaryLittleEndian,
                        other => return Err(format!("unsupported format {}", other)),
                    });
                }
                ["comment", ..] | ["obj_info", ..] => comments.push(line.to_string()),
                ["element", "vertex", count] => {
                    vertex_count =
                        Some(count.parse().map_err(|_| format!("bad vertex count {}", count))?);
                    in_vertex = true;
                }
                ["element", name, count] => {
                    if *count != "0" {
                        return Err(format!("unsupported element {} ({} entries)", name, count));
                    }
                    in_vertex = false;
                }
                ["property", "list", ..] if in_vertex => {
                    return Err("list properties on vertices are not supported".into());
                }
                ["property", kind, name] if in_vertex => {
                    let kind = ScalarType::parse(kind)
                        .ok_or_else(|| format!("unknown property type {}", kind))?;
                    properties.push(PlyProperty {
                        name: name.to_string(),
                        kind,
                    });
                }
                ["property", ..] => {}
                _ => return Err(format!("unexpected header line '{}'", line)),
            }
        }

        let encoding = encoding.ok_or("missing format line")?;
        let count = vertex_count.ok_or("no vertex element in header")?;
        let body = &bytes[body_start..];

        let rows = match encoding {
            PlyEncoding::Ascii => parse_ascii_rows(body, &properties, count)?,
            PlyEncoding::BinaryLittleEndian => parse_binary_rows(body, &properties, count)?,
        };

        Ok(Self {
            encoding,
            comments,
            properties,
            rows,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut header = String::new();
        header.push_str("ply\n");
        let _ = writeln!(header, "format {} 1.0", self.encoding.header_name());
        for comment in &self.comments {
            let _ = writeln!(header, "{}", comment);
        }
        let _ = writeln!(header, "element vertex {}", self.rows.len());
        for prop in &self.properties {
            let _ = writeln!(header, "property {} {}", prop.kind.name(), prop.name);
        }
        header.push_str("end_header\n");

        let mut out = header.into_bytes();
        match self.encoding {
            PlyEncoding::Ascii => {
                let mut text = String::new();
                for row in &self.rows {
                    for (i, (value, prop)) in row.iter().zip(&self.properties).enumerate() {
                        if i > 0 {
                            text.push(' ');
                        }
                        prop.kind.format_ascii(*value, &mut text);
                    }
                    text.push('\n');
                }
                out.extend_from_slice(text.as_bytes());
            }
            PlyEncoding::BinaryLittleEndian => {
                for row in &self.rows {
                    for (value, prop) in row.iter().zip(&self.properties) {
                        prop.kind.encode_le(*value, &mut out);
                    }
                }
            }
        }
        out
    }
}

fn parse_ascii_rows(
    body: &[u8],
    properties: &[PlyProperty],
    count: usize,
) -> std::result::Result<Vec<Vec<f64>>, String> {
    let text = std::str::from_utf8(body).map_err(|_| "vertex data is not valid UTF-8")?;
    let mut rows = Vec::with_capacity(count);
    for line in text.lines().filter(|l| !l.trim().is_empty()).take(count) {
        let values: Vec<f64> = line
            .split_whitespace()
            .take(properties.len())
            .map(|v| v.parse::<f64>().map_err(|_| format!("invalid value '{}'", v)))
            .collect::<std::result::Result<_, _>>()?;
        if values.len() != properties.len() {
            return Err(format!(
                "vertex {} has {} values, expected {}",
                rows.len(),
                values.len(),
                properties.len()
            ));
        }
        rows.push(values);
    }
    if rows.len() != count {
        return Err(format!("expected {} vertices, found {}", count, rows.len()));
    }
    Ok(rows)
}

fn parse_binary_rows(
    body: &[u8],
    properties: &[PlyProperty],
    count: usize,
) -> std::result::Result<Vec<Vec<f64>>, String> {
    let stride: usize = properties.iter().map(|p| p.kind.size()).sum();
    if body.len() < stride * count {
        return Err(format!(
            "truncated vertex data: {} bytes for {} vertices of {} bytes",
            body.len(),
            count,
            stride
        ));
    }

    let mut rows = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let mut row = Vec::with_capacity(properties.len());
        for prop in properties {
            let size = prop.kind.size();
            row.push(prop.kind.decode_le(&body[offset..offset + size]));
            offset += size;
        }
        rows.push(row);
    }
    Ok(rows)
}
