//! Positions-only lattice assembly over ChESS candidates.
//!
//! A seed is a candidate with a cross-shaped 4-neighbourhood (two pairs of
//! roughly opposite neighbours). From there the lattice grows breadth-first:
//! every missing neighbour is predicted from the local lattice step and
//! claimed by the nearest unused candidate inside a tolerance radius.

use crate::params::LatticeParams;
use calib_ar_core::{sample_bilinear, GrayImageView};
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, HashSet, VecDeque};

const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Integer grid coordinates assigned to candidate indices.
#[derive(Clone, Debug, Default)]
pub struct Lattice {
    pub nodes: HashMap<(i32, i32), usize>,
}

impl Lattice {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `(min_i, min_j, width, height)` of the bounding box in grid units.
    pub fn bounds(&self) -> Option<(i32, i32, usize, usize)> {
        let min_i = self.nodes.keys().map(|k| k.0).min()?;
        let max_i = self.nodes.keys().map(|k| k.0).max()?;
        let min_j = self.nodes.keys().map(|k| k.1).min()?;
        let max_j = self.nodes.keys().map(|k| k.1).max()?;
        Some((
            min_i,
            min_j,
            (max_i - min_i + 1) as usize,
            (max_j - min_j + 1) as usize,
        ))
    }

    /// True when every cell of the bounding box holds a corner.
    pub fn is_full(&self) -> bool {
        match self.bounds() {
            Some((_, _, w, h)) => w * h == self.len(),
            None => false,
        }
    }
}

/// The four arms of a seed cross: `+a`, `-a`, `+b`, `-b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedCross {
    pub center: usize,
    pub arms: [usize; 4],
}

pub struct LatticeBuilder<'a> {
    points: &'a [Point2<f64>],
    tree: KdTree<f64, 2>,
    params: &'a LatticeParams,
}

impl<'a> LatticeBuilder<'a> {
    pub fn new(points: &'a [Point2<f64>], params: &'a LatticeParams) -> Self {
        let coords: Vec<[f64; 2]> = points.iter().map(|p| [p.x, p.y]).collect();
        let tree: KdTree<f64, 2> = (&coords).into();
        Self {
            points,
            tree,
            params,
        }
    }

    fn spacing_ok(&self, d: f64) -> bool {
        d >= self.params.min_spacing_pix && d <= self.params.max_spacing_pix
    }

    /// Find the shortest pair of opposite neighbours and a second,
    /// non-parallel pair of similar length around `center`.
    pub fn seed_cross(&self, center: usize) -> Option<SeedCross> {
        let c = self.points[center];
        let neighbours: Vec<(usize, Vector2<f64>)> = self
            .tree
            .nearest_n::<SquaredEuclidean>(&[c.x, c.y], self.params.k_neighbors + 1)
            .into_iter()
            .map(|nn| nn.item as usize)
            .filter(|&idx| idx != center)
            .map(|idx| (idx, self.points[idx] - c))
            .filter(|(_, v)| self.spacing_ok(v.norm()))
            .collect();

        // (mean arm length, plus index, minus index, plus vector)
        let mut pairs = Vec::new();
        for (m, (im, vm)) in neighbours.iter().enumerate() {
            for (i_n, vn) in neighbours.iter().skip(m + 1) {
                let mean = 0.5 * (vm.norm() + vn.norm());
                if (vm + vn).norm() <= self.params.opposite_tolerance * mean {
                    pairs.push((mean, *im, *i_n, *vm));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let &(len_a, a_plus, a_minus, va) = pairs.first()?;
        let ua = va.normalize();
        let (_, b_plus, b_minus, _) = pairs.iter().skip(1).find(|(len, p, m, vb)| {
            let ratio = len / len_a;
            ua.dot(&vb.normalize()).abs() < 0.8
                && (0.5..=2.0).contains(&ratio)
                && ![a_plus, a_minus].contains(p)
                && ![a_plus, a_minus].contains(m)
        })?;

        Some(SeedCross {
            center,
            arms: [a_plus, a_minus, *b_plus, *b_minus],
        })
    }

    fn nearest_unused(
        &self,
        at: Point2<f64>,
        radius: f64,
        used: &HashSet<usize>,
    ) -> Option<usize> {
        let r2 = radius * radius;
        self.tree
            .nearest_n::<SquaredEuclidean>(&[at.x, at.y], 4)
            .into_iter()
            .filter(|nn| nn.distance <= r2)
            .map(|nn| nn.item as usize)
            .find(|idx| !used.contains(idx))
    }

    /// Image-space step from `at` towards `at + d`, taken from the nearest
    /// already-assigned edge parallel to `d`.
    fn local_step(
        &self,
        nodes: &HashMap<(i32, i32), usize>,
        at: (i32, i32),
        d: (i32, i32),
    ) -> Option<Vector2<f64>> {
        let p = |k: &(i32, i32)| nodes.get(k).map(|&idx| self.points[idx]);

        if let (Some(cur), Some(prev)) = (p(&at), p(&(at.0 - d.0, at.1 - d.1))) {
            return Some(cur - prev);
        }
        for e in [(d.1, d.0), (-d.1, -d.0)] {
            let n = (at.0 + e.0, at.1 + e.1);
            if let (Some(from), Some(to)) = (p(&n), p(&(n.0 + d.0, n.1 + d.1))) {
                return Some(to - from);
            }
        }
        None
    }

    /// Breadth-first growth from a seed cross.
    pub fn grow(&self, seed: &SeedCross) -> Lattice {
        let mut nodes = HashMap::new();
        let mut used = HashSet::new();
        let mut queue = VecDeque::new();

        let [a_plus, a_minus, b_plus, b_minus] = seed.arms;
        for (key, idx) in [
            ((0, 0), seed.center),
            ((1, 0), a_plus),
            ((-1, 0), a_minus),
            ((0, 1), b_plus),
            ((0, -1), b_minus),
        ] {
            nodes.insert(key, idx);
            used.insert(idx);
            queue.push_back(key);
        }

        while let Some(at) = queue.pop_front() {
            for d in DIRECTIONS {
                let target = (at.0 + d.0, at.1 + d.1);
                if nodes.contains_key(&target) {
                    continue;
                }
                let Some(step) = self.local_step(&nodes, at, d) else {
                    continue;
                };
                let step_len = step.norm();
                if !self.spacing_ok(step_len) {
                    continue;
                }
                let predicted = self.points[nodes[&at]] + step;
                let radius = self.params.prediction_tolerance * step_len;
                if let Some(idx) = self.nearest_unused(predicted, radius, &used) {
                    nodes.insert(target, idx);
                    used.insert(idx);
                    queue.push_back(target);
                }
            }
        }

        Lattice { nodes }
    }
}

// Signed area spanned by the lattice axes; positive when board x -> board y
// turns clockwise on screen (image y points down).
fn handedness(ordered: &[Point2<f64>], columns: usize, rows: usize) -> f64 {
    let p = |i: usize, j: usize| ordered[j * columns + i];
    let (c, r) = (columns - 1, rows - 1);
    let u = (p(c, 0) - p(0, 0)) + (p(c, r) - p(0, r));
    let v = (p(0, r) - p(0, 0)) + (p(c, r) - p(c, 0));
    u.x * v.y - u.y * v.x
}

// Grey-level difference below which two squares are not told apart.
const MIN_SQUARE_CONTRAST: f64 = 12.0;

fn patch_mean(img: &GrayImageView<'_>, c: Point2<f64>) -> f64 {
    let mut sum = 0.0;
    for dy in [-1.0, 0.0, 1.0] {
        for dx in [-1.0, 0.0, 1.0] {
            sum += sample_bilinear(img, c.x + dx, c.y + dy);
        }
    }
    sum / 9.0
}

/// Whether the square between corners 0, 1, `columns` and `columns + 1` is
/// darker than its right-hand neighbour. `None` when they look alike.
fn first_square_is_dark(img: &GrayImageView<'_>, ordered: &[Point2<f64>], columns: usize) -> Option<bool> {
    if columns < 3 || ordered.len() < 2 * columns {
        return None;
    }
    let centre = |i: usize| {
        Point2::from(
            (ordered[i].coords + ordered[i + 1].coords + ordered[columns + i].coords + ordered[columns + i + 1].coords)
                * 0.25,
        )
    };
    let contrast = patch_mean(img, centre(1)) - patch_mean(img, centre(0));
    (contrast.abs() >= MIN_SQUARE_CONTRAST).then_some(contrast > 0.0)
}

/// Lay a full lattice out row-major as `columns x rows`.
///
/// Candidates are the grid symmetries that give the requested dimensions and
/// positive handedness. With an image, those whose first square is dark are
/// preferred, which ties corner 0 to the same physical corner however the
/// board turns in-plane. Boards whose symmetric layouts share square colours
/// (and frames without usable contrast) fall back to the candidate that puts
/// corner 0 at the smallest `x + y`.
pub fn order_row_major(
    lattice: &Lattice,
    points: &[Point2<f64>],
    columns: usize,
    rows: usize,
    image: Option<&GrayImageView<'_>>,
) -> Option<Vec<Point2<f64>>> {
    if !lattice.is_full() {
        return None;
    }
    let (min_i, min_j, w, h) = lattice.bounds()?;

    let mut layouts: Vec<Vec<Point2<f64>>> = Vec::with_capacity(4);
    for swap in [false, true] {
        let (cw, ch) = if swap { (h, w) } else { (w, h) };
        if (cw, ch) != (columns, rows) {
            continue;
        }
        for flip_i in [false, true] {
            for flip_j in [false, true] {
                let mut ordered = vec![Point2::origin(); columns * rows];
                for (&(i, j), &idx) in &lattice.nodes {
                    let (i, j) = ((i - min_i) as usize, (j - min_j) as usize);
                    let (mut a, mut b) = if swap { (j, i) } else { (i, j) };
                    if flip_i {
                        a = cw - 1 - a;
                    }
                    if flip_j {
                        b = ch - 1 - b;
                    }
                    ordered[b * columns + a] = points[idx];
                }
                if handedness(&ordered, columns, rows) > 0.0 {
                    layouts.push(ordered);
                }
            }
        }
    }

    if let Some(img) = image {
        let dark_first: Vec<bool> = layouts
            .iter()
            .map(|o| first_square_is_dark(img, o, columns) == Some(true))
            .collect();
        if dark_first.contains(&true) && dark_first.contains(&false) {
            layouts = layouts
                .into_iter()
                .zip(dark_first)
                .filter_map(|(o, dark)| dark.then_some(o))
                .collect();
        }
    }

    layouts
        .into_iter()
        .min_by(|a, b| (a[0].x + a[0].y).total_cmp(&(b[0].x + b[0].y)))
}
