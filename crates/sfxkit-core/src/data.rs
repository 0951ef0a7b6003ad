use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;

use crate::cell::UnitCell;

/// Reflection-table I/O implementations and shared ingestion helpers.
pub mod io;

/// An integer Miller index `(h, k, l)` identifying a reflection.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MillerIndex {
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

impl MillerIndex {
    pub const fn new(h: i32, k: i32, l: i32) -> Self {
        Self { h, k, l }
    }

    /// The Friedel mate `(-h, -k, -l)`.
    pub const fn friedel_mate(&self) -> Self {
        Self {
            h: -self.h,
            k: -self.k,
            l: -self.l,
        }
    }

    pub const fn is_zero(&self) -> bool {
        self.h == 0 && self.k == 0 && self.l == 0
    }

    /// Whether this index is the canonical representative of its Friedel pair (the first
    /// nonzero component is positive). `(0, 0, 0)` is its own mate and counts as canonical.
    pub const fn is_friedel_canonical(&self) -> bool {
        if self.h != 0 {
            self.h > 0
        } else if self.k != 0 {
            self.k > 0
        } else {
            self.l >= 0
        }
    }
}

impl Display for MillerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.h, self.k, self.l)
    }
}

/// A single merged reflection: an index, an amplitude (or intensity) value, and its
/// estimated standard deviation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub hkl: MillerIndex,
    pub value: f64,
    pub sigma: f64,
}

impl Reflection {
    pub const fn new(hkl: MillerIndex, value: f64, sigma: f64) -> Self {
        Self { hkl, value, sigma }
    }
}

/// A merged reflection table together with the unit cell it was indexed in.
///
/// Reflections are held sorted by index with duplicates collapsed (last write wins), so
/// lookups, resolution selections, and pairwise matching against another set are cheap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReflectionSet {
    cell: UnitCell,
    reflections: Vec<Reflection>,
}

impl ReflectionSet {
    pub fn new(cell: UnitCell, mut reflections: Vec<Reflection>) -> Self {
        reflections.sort_by_key(|r| r.hkl);
        let mut deduped: Vec<Reflection> = Vec::with_capacity(reflections.len());
        for reflection in reflections {
            match deduped.last_mut() {
                Some(last) if last.hkl == reflection.hkl => {
                    log::warn!("duplicate reflection {} collapsed", reflection.hkl);
                    *last = reflection;
                }
                _ => deduped.push(reflection),
            }
        }
        Self {
            cell,
            reflections: deduped,
        }
    }

    pub fn cell(&self) -> &UnitCell {
        &self.cell
    }

    pub fn len(&self) -> usize {
        self.reflections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reflections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reflection> {
        self.reflections.iter()
    }

    pub fn get(&self, hkl: MillerIndex) -> Option<&Reflection> {
        self.reflections
            .binary_search_by(|r| r.hkl.cmp(&hkl))
            .ok()
            .map(|i| &self.reflections[i])
    }

    /// The `d`-spacing of a member reflection.
    pub fn d_of(&self, reflection: &Reflection) -> f64 {
        self.cell.d_spacing(reflection.hkl)
    }

    /// The highest resolution (smallest `d`) in the set.
    pub fn d_min(&self) -> Option<f64> {
        self.reflections
            .iter()
            .map(|r| self.d_of(r))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// The lowest resolution (largest `d`) in the set.
    pub fn d_max(&self) -> Option<f64> {
        self.reflections
            .iter()
            .map(|r| self.d_of(r))
            .max_by(|a, b| a.total_cmp(b))
    }

    /// The subset with `d_min <= d <= d_max`.
    pub fn select_resolution(&self, d_min: f64, d_max: f64) -> Self {
        let kept = self
            .reflections
            .iter()
            .filter(|r| {
                let d = self.d_of(r);
                d_min <= d && d <= d_max
            })
            .copied()
            .collect();
        Self::new(self.cell, kept)
    }

    /// The subset whose indices also appear in `other`. Convergence tracking restricts
    /// refined data to the indices observed by conventional merging before comparing.
    pub fn common_with(&self, other: &ReflectionSet) -> Self {
        let kept = self
            .reflections
            .iter()
            .filter(|r| other.get(r.hkl).is_some())
            .copied()
            .collect();
        Self::new(self.cell, kept)
    }

    /// Pairs of reflections present in both sets, in this set's index order.
    pub fn matching<'a>(
        &'a self,
        other: &'a ReflectionSet,
    ) -> impl Iterator<Item = (&'a Reflection, &'a Reflection)> + 'a {
        self.reflections
            .iter()
            .filter_map(move |r| other.get(r.hkl).map(|o| (r, o)))
    }
}

/// A reflection set that can be used to exercise the statistics in this workspace: a cubic
/// 10 Å cell with a handful of low-order reflections.
pub fn test_reflection_set() -> Arc<ReflectionSet> {
    let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0)
        .expect("test cell parameters should be valid");
    let reflections = vec![
        Reflection::new(MillerIndex::new(1, 0, 0), 120.0, 3.0),
        Reflection::new(MillerIndex::new(-1, 0, 0), 118.0, 3.1),
        Reflection::new(MillerIndex::new(1, 1, 0), 64.0, 2.0),
        Reflection::new(MillerIndex::new(1, 1, 1), 31.5, 1.5),
        Reflection::new(MillerIndex::new(2, 0, 0), 88.0, 4.0),
        Reflection::new(MillerIndex::new(2, 1, 0), 17.0, 1.0),
        Reflection::new(MillerIndex::new(2, 1, 1), 9.0, 0.9),
        Reflection::new(MillerIndex::new(2, 2, 0), 44.0, 2.2),
    ];
    Arc::new(ReflectionSet::new(cell, reflections))
}
