//! Polygon mesh storage, element selection, and primitive templates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::f64::consts::TAU;

use crate::error::SceneError;
use crate::geometry::Vec3;

/// Sub-element class of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementClass {
    #[serde(rename = "VERT")]
    Vertex,
    #[serde(rename = "EDGE")]
    Edge,
    #[serde(rename = "FACE")]
    Face,
}

impl ElementClass {
    pub const ALL: [ElementClass; 3] = [ElementClass::Vertex, ElementClass::Edge, ElementClass::Face];
}

/// Selected element indices, one set per class.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementSelection {
    pub verts: BTreeSet<usize>,
    pub edges: BTreeSet<usize>,
    pub faces: BTreeSet<usize>,
}

impl ElementSelection {
    pub fn is_empty(&self) -> bool {
        self.verts.is_empty() && self.edges.is_empty() && self.faces.is_empty()
    }

    pub fn get(&self, class: ElementClass) -> &BTreeSet<usize> {
        match class {
            ElementClass::Vertex => &self.verts,
            ElementClass::Edge => &self.edges,
            ElementClass::Face => &self.faces,
        }
    }

    pub fn get_mut(&mut self, class: ElementClass) -> &mut BTreeSet<usize> {
        match class {
            ElementClass::Vertex => &mut self.verts,
            ElementClass::Edge => &mut self.edges,
            ElementClass::Face => &mut self.faces,
        }
    }

    /// Iterate `(class, index)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ElementClass, usize)> + '_ {
        ElementClass::ALL
            .into_iter()
            .flat_map(move |class| self.get(class).iter().map(move |&i| (class, i)))
    }

    pub fn clear(&mut self) {
        self.verts.clear();
        self.edges.clear();
        self.faces.clear();
    }
}

/// Vertex/edge/face mesh with its own element selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub edges: Vec<[usize; 2]>,
    pub faces: Vec<Vec<usize>>,
    pub selection: ElementSelection,
}

impl Mesh {
    /// Build a mesh from face loops; edges are derived from the loops,
    /// followed by any loose edges not already covered.
    pub fn from_faces(vertices: Vec<Vec3>, faces: Vec<Vec<usize>>, loose_edges: &[[usize; 2]]) -> Self {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        let loop_edges = faces.iter().flat_map(|f| {
            (0..f.len()).map(move |i| [f[i], f[(i + 1) % f.len()]])
        });
        for [a, b] in loop_edges.chain(loose_edges.iter().copied()) {
            let key = (a.min(b), a.max(b));
            if seen.insert(key) {
                edges.push([key.0, key.1]);
            }
        }
        Self { vertices, edges, faces, selection: ElementSelection::default() }
    }

    pub fn element_count(&self, class: ElementClass) -> usize {
        match class {
            ElementClass::Vertex => self.vertices.len(),
            ElementClass::Edge => self.edges.len(),
            ElementClass::Face => self.faces.len(),
        }
    }

    pub fn select(&mut self, class: ElementClass, index: usize) -> Result<(), SceneError> {
        if index >= self.element_count(class) {
            return Err(SceneError::MissingElement { class, index });
        }
        self.selection.get_mut(class).insert(index);
        Ok(())
    }

    pub fn deselect(&mut self, class: ElementClass, index: usize) -> Result<(), SceneError> {
        if index >= self.element_count(class) {
            return Err(SceneError::MissingElement { class, index });
        }
        self.selection.get_mut(class).remove(&index);
        Ok(())
    }

    /// Vertex indices touched by the current element selection.
    pub fn affected_vertices(&self) -> BTreeSet<usize> {
        let mut out: BTreeSet<usize> = self.selection.verts.clone();
        for &e in &self.selection.edges {
            if let Some(edge) = self.edges.get(e) {
                out.extend(edge.iter().copied());
            }
        }
        for &f in &self.selection.faces {
            if let Some(face) = self.faces.get(f) {
                out.extend(face.iter().copied());
            }
        }
        out.retain(|&v| v < self.vertices.len());
        out
    }

    /// Median point of the affected vertices.
    pub fn selection_centroid(&self) -> Option<Vec3> {
        let affected = self.affected_vertices();
        Vec3::centroid(affected.iter().map(|&v| &self.vertices[v]))
    }

    /// Apply `f` to every affected vertex position.
    pub fn map_selected(&mut self, mut f: impl FnMut(Vec3) -> Vec3) {
        for v in self.affected_vertices() {
            self.vertices[v] = f(self.vertices[v]);
        }
    }

    /// Append `other` translated by `offset`; the new elements replace the
    /// current selection.
    pub fn merge(&mut self, other: &Mesh, offset: Vec3) {
        let (v0, e0, f0) = (self.vertices.len(), self.edges.len(), self.faces.len());
        self.vertices.extend(other.vertices.iter().map(|p| *p + offset));
        self.edges.extend(other.edges.iter().map(|[a, b]| [a + v0, b + v0]));
        self.faces
            .extend(other.faces.iter().map(|f| f.iter().map(|i| i + v0).collect::<Vec<_>>()));
        self.selection = ElementSelection {
            verts: (v0..self.vertices.len()).collect(),
            edges: (e0..self.edges.len()).collect(),
            faces: (f0..self.faces.len()).collect(),
        };
    }

    /// Delete selected elements of `class` together with dependent geometry.
    ///
    /// Vertex: drops every affected vertex and every edge/face using them.
    /// Edge: drops the edges and every face bounded by them.
    /// Face: drops the faces only.
    /// The element selection is cleared afterwards.
    pub fn delete(&mut self, class: ElementClass) {
        match class {
            ElementClass::Vertex => {
                let doomed = self.affected_vertices();
                let mut remap = Vec::with_capacity(self.vertices.len());
                let mut next = 0usize;
                for i in 0..self.vertices.len() {
                    if doomed.contains(&i) {
                        remap.push(None);
                    } else {
                        remap.push(Some(next));
                        next += 1;
                    }
                }
                let mut idx = 0;
                self.vertices.retain(|_| {
                    let keep = remap[idx].is_some();
                    idx += 1;
                    keep
                });
                self.edges = self
                    .edges
                    .iter()
                    .filter_map(|[a, b]| Some([remap[*a]?, remap[*b]?]))
                    .collect();
                self.faces = self
                    .faces
                    .iter()
                    .filter_map(|f| f.iter().map(|&v| remap[v]).collect::<Option<Vec<_>>>())
                    .collect();
            }
            ElementClass::Edge => {
                let doomed: HashSet<(usize, usize)> = self
                    .selection
                    .edges
                    .iter()
                    .filter_map(|&e| self.edges.get(e))
                    .map(|[a, b]| ((*a).min(*b), (*a).max(*b)))
                    .collect();
                self.faces.retain(|f| {
                    !(0..f.len()).any(|i| {
                        let (a, b) = (f[i], f[(i + 1) % f.len()]);
                        doomed.contains(&(a.min(b), a.max(b)))
                    })
                });
                let mut idx = 0;
                let selected = &self.selection.edges;
                self.edges.retain(|_| {
                    let keep = !selected.contains(&idx);
                    idx += 1;
                    keep
                });
            }
            ElementClass::Face => {
                let mut idx = 0;
                let selected = &self.selection.faces;
                self.faces.retain(|_| {
                    let keep = !selected.contains(&idx);
                    idx += 1;
                    keep
                });
            }
        }
        self.selection.clear();
    }
}

/// Primitive shapes that can be spawned by an AddPrimitive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveShape {
    #[default]
    Cube,
    Plane,
    Circle,
    Grid,
    UvSphere,
    IcoSphere,
    Cylinder,
    Cone,
    Torus,
}

const SEGMENTS: usize = 32;

impl PrimitiveShape {
    /// Name the host editor gives a freshly added primitive.
    pub fn default_name(&self) -> &'static str {
        match self {
            PrimitiveShape::Cube => "Cube",
            PrimitiveShape::Plane => "Plane",
            PrimitiveShape::Circle => "Circle",
            PrimitiveShape::Grid => "Grid",
            PrimitiveShape::UvSphere => "Sphere",
            PrimitiveShape::IcoSphere => "Icosphere",
            PrimitiveShape::Cylinder => "Cylinder",
            PrimitiveShape::Cone => "Cone",
            PrimitiveShape::Torus => "Torus",
        }
    }

    /// Template mesh centred on the origin.
    pub fn template(&self) -> Mesh {
        match self {
            PrimitiveShape::Cube => cube(),
            PrimitiveShape::Plane => grid(2, 2.0),
            PrimitiveShape::Circle => {
                let vertices = ring(SEGMENTS, 1.0, 0.0);
                let edges: Vec<[usize; 2]> = (0..SEGMENTS).map(|i| [i, (i + 1) % SEGMENTS]).collect();
                Mesh::from_faces(vertices, Vec::new(), &edges)
            }
            PrimitiveShape::Grid => grid(10, 2.0),
            PrimitiveShape::UvSphere => uv_sphere(SEGMENTS, 16, 1.0),
            PrimitiveShape::IcoSphere => icosahedron(),
            PrimitiveShape::Cylinder => {
                let mut vertices = ring(SEGMENTS, 1.0, -1.0);
                vertices.extend(ring(SEGMENTS, 1.0, 1.0));
                let mut faces: Vec<Vec<usize>> = (0..SEGMENTS)
                    .map(|i| {
                        let j = (i + 1) % SEGMENTS;
                        vec![i, j, SEGMENTS + j, SEGMENTS + i]
                    })
                    .collect();
                faces.push((0..SEGMENTS).rev().collect());
                faces.push((SEGMENTS..2 * SEGMENTS).collect());
                Mesh::from_faces(vertices, faces, &[])
            }
            PrimitiveShape::Cone => {
                let mut vertices = ring(SEGMENTS, 1.0, -1.0);
                vertices.push(Vec3::new(0.0, 0.0, 1.0));
                let mut faces: Vec<Vec<usize>> =
                    (0..SEGMENTS).map(|i| vec![i, (i + 1) % SEGMENTS, SEGMENTS]).collect();
                faces.push((0..SEGMENTS).rev().collect());
                Mesh::from_faces(vertices, faces, &[])
            }
            PrimitiveShape::Torus => torus(48, 12, 1.0, 0.25),
        }
    }
}

fn ring(n: usize, radius: f64, z: f64) -> Vec<Vec3> {
    (0..n)
        .map(|i| {
            let t = TAU * i as f64 / n as f64;
            Vec3::new(radius * t.cos(), radius * t.sin(), z)
        })
        .collect()
}

fn cube() -> Mesh {
    let mut vertices = Vec::with_capacity(8);
    for &x in &[-1.0, 1.0] {
        for &y in &[-1.0, 1.0] {
            for &z in &[-1.0, 1.0] {
                vertices.push(Vec3::new(x, y, z));
            }
        }
    }
    let faces = vec![
        vec![0, 1, 3, 2],
        vec![2, 3, 7, 6],
        vec![6, 7, 5, 4],
        vec![4, 5, 1, 0],
        vec![2, 6, 4, 0],
        vec![7, 3, 1, 5],
    ];
    Mesh::from_faces(vertices, faces, &[])
}

/// `n` x `n` vertex grid spanning `size` on X and Y.
fn grid(n: usize, size: f64) -> Mesh {
    let step = size / (n - 1) as f64;
    let half = size / 2.0;
    let mut vertices = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            vertices.push(Vec3::new(col as f64 * step - half, row as f64 * step - half, 0.0));
        }
    }
    let mut faces = Vec::with_capacity((n - 1) * (n - 1));
    for row in 0..n - 1 {
        for col in 0..n - 1 {
            let i = row * n + col;
            faces.push(vec![i, i + 1, i + n + 1, i + n]);
        }
    }
    Mesh::from_faces(vertices, faces, &[])
}

fn uv_sphere(segments: usize, rings: usize, radius: f64) -> Mesh {
    let mut vertices = vec![Vec3::new(0.0, 0.0, radius)];
    for r in 1..rings {
        let phi = std::f64::consts::PI * r as f64 / rings as f64;
        vertices.extend(ring(segments, radius * phi.sin(), radius * phi.cos()));
    }
    let south = vertices.len();
    vertices.push(Vec3::new(0.0, 0.0, -radius));

    let ring_start = |r: usize| 1 + r * segments;
    let mut faces = Vec::new();
    for s in 0..segments {
        let t = (s + 1) % segments;
        faces.push(vec![0, ring_start(0) + s, ring_start(0) + t]);
    }
    for r in 0..rings - 2 {
        for s in 0..segments {
            let t = (s + 1) % segments;
            faces.push(vec![
                ring_start(r) + s,
                ring_start(r + 1) + s,
                ring_start(r + 1) + t,
                ring_start(r) + t,
            ]);
        }
    }
    let last = ring_start(rings - 2);
    for s in 0..segments {
        let t = (s + 1) % segments;
        faces.push(vec![last + t, last + s, south]);
    }
    Mesh::from_faces(vertices, faces, &[])
}

fn icosahedron() -> Mesh {
    let phi = (1.0 + 5f64.sqrt()) / 2.0;
    let raw = [
        (-1.0, phi, 0.0),
        (1.0, phi, 0.0),
        (-1.0, -phi, 0.0),
        (1.0, -phi, 0.0),
        (0.0, -1.0, phi),
        (0.0, 1.0, phi),
        (0.0, -1.0, -phi),
        (0.0, 1.0, -phi),
        (phi, 0.0, -1.0),
        (phi, 0.0, 1.0),
        (-phi, 0.0, -1.0),
        (-phi, 0.0, 1.0),
    ];
    let vertices = raw
        .iter()
        .map(|&(x, y, z)| {
            let v = Vec3::new(x, y, z);
            v * (1.0 / v.length())
        })
        .collect();
    let faces = [
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ]
    .iter()
    .map(|f| f.to_vec())
    .collect();
    Mesh::from_faces(vertices, faces, &[])
}

fn torus(major_segments: usize, minor_segments: usize, major_radius: f64, minor_radius: f64) -> Mesh {
    let mut vertices = Vec::with_capacity(major_segments * minor_segments);
    for i in 0..major_segments {
        let u = TAU * i as f64 / major_segments as f64;
        for j in 0..minor_segments {
            let v = TAU * j as f64 / minor_segments as f64;
            let r = major_radius + minor_radius * v.cos();
            vertices.push(Vec3::new(r * u.cos(), r * u.sin(), minor_radius * v.sin()));
        }
    }
    let idx = |i: usize, j: usize| (i % major_segments) * minor_segments + (j % minor_segments);
    let mut faces = Vec::with_capacity(major_segments * minor_segments);
    for i in 0..major_segments {
        for j in 0..minor_segments {
            faces.push(vec![idx(i, j), idx(i + 1, j), idx(i + 1, j + 1), idx(i, j + 1)]);
        }
    }
    Mesh::from_faces(vertices, faces, &[])
}
