//! Path and time remapping across composition arcs.
//!
//! A [`MapFunction`] carries an ordered table of source→target path prefixes
//! plus a time offset. Crossing an arc translates every path through the
//! table by longest-prefix substitution; paths with no matching prefix are
//! dropped, which is how an arc expresses "I do not affect that path."
//!
//! The identity function maps every path to itself. A *null* function maps
//! every path to nothing; it stands in for arcs whose authored mapping was
//! ambiguous, so composition can carry the arc as data instead of failing.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::sdf::{LayerOffset, Path};

#[derive(Debug, PartialEq)]
struct Inner {
    /// Sorted by source path; longest match wins on lookup.
    path_map: Vec<(Path, Path)>,
    offset: LayerOffset,
    null: bool,
}

/// A pure value; cheap to clone and share.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFunction {
    inner: Arc<Inner>,
}

static IDENTITY: Lazy<MapFunction> = Lazy::new(|| MapFunction {
    inner: Arc::new(Inner {
        path_map: vec![(Path::abs_root(), Path::abs_root())],
        offset: LayerOffset::default(),
        null: false,
    }),
});

static NULL: Lazy<MapFunction> = Lazy::new(|| MapFunction {
    inner: Arc::new(Inner {
        path_map: Vec::new(),
        offset: LayerOffset::default(),
        null: true,
    }),
});

impl MapFunction {
    /// The singleton identity function.
    pub fn identity() -> MapFunction {
        IDENTITY.clone()
    }

    /// The degenerate function that maps every path to nothing.
    pub fn null() -> MapFunction {
        NULL.clone()
    }

    /// An identity path mapping carrying only a time offset. Used for the
    /// per-layer cumulative offsets in a layer stack.
    pub fn identity_paths_with_offset(offset: LayerOffset) -> MapFunction {
        if offset.is_identity() {
            return MapFunction::identity();
        }
        MapFunction {
            inner: Arc::new(Inner {
                path_map: vec![(Path::abs_root(), Path::abs_root())],
                offset,
                null: false,
            }),
        }
    }

    /// Build a function from an explicit prefix table. Duplicate source
    /// prefixes with conflicting targets make the mapping ambiguous; the
    /// result is then the null function rather than an error.
    pub fn create(pairs: Vec<(Path, Path)>, offset: LayerOffset) -> MapFunction {
        let mut path_map = pairs;
        path_map.retain(|(s, t)| !s.is_empty() && !t.is_empty());
        path_map.sort_by(|a, b| a.0.cmp(&b.0));
        for window in path_map.windows(2) {
            if window[0].0 == window[1].0 && window[0].1 != window[1].1 {
                return MapFunction::null();
            }
        }
        path_map.dedup();
        if path_map.is_empty() {
            return MapFunction::null();
        }
        let candidate = MapFunction {
            inner: Arc::new(Inner { path_map, offset, null: false }),
        };
        if candidate == *IDENTITY {
            MapFunction::identity()
        } else {
            candidate
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == *IDENTITY
    }

    pub fn is_null(&self) -> bool {
        self.inner.null
    }

    pub fn time_offset(&self) -> LayerOffset {
        self.inner.offset
    }

    /// Translate a path from the source namespace to the target namespace.
    pub fn map_source_to_target(&self, path: &Path) -> Option<Path> {
        self.map(path, false)
    }

    /// Translate a path from the target namespace back to the source.
    pub fn map_target_to_source(&self, path: &Path) -> Option<Path> {
        self.map(path, true)
    }

    fn map(&self, path: &Path, invert: bool) -> Option<Path> {
        if self.inner.null || path.is_empty() {
            return None;
        }
        let mut best: Option<(&Path, &Path)> = None;
        for (source, target) in &self.inner.path_map {
            let (from, to) = if invert { (target, source) } else { (source, target) };
            if path.has_prefix(from)
                && best.map_or(true, |(b, _)| from.as_str().len() > b.as_str().len())
            {
                best = Some((from, to));
            }
        }
        let (from, to) = best?;
        path.replace_prefix(from, to)
    }

    /// Compose: `self.compose(inner)` maps a path through `inner`, then
    /// through `self`. Composition is associative, and composing with the
    /// identity on either side is a no-op.
    pub fn compose(&self, inner: &MapFunction) -> MapFunction {
        if self.is_null() || inner.is_null() {
            return MapFunction::null();
        }
        let offset = self.inner.offset.compose(&inner.inner.offset);
        if inner.has_identity_paths() {
            return self.with_offset(offset);
        }
        if self.has_identity_paths() {
            return inner.with_offset(offset);
        }
        let mut pairs = Vec::with_capacity(inner.inner.path_map.len());
        for (source, target) in &inner.inner.path_map {
            if let Some(mapped) = self.map_source_to_target(target) {
                pairs.push((source.clone(), mapped));
            }
        }
        MapFunction::create(pairs, offset)
    }

    /// Swap source and target namespaces. The inverse of the identity is
    /// the identity.
    pub fn get_inverse(&self) -> MapFunction {
        if self.is_null() {
            return MapFunction::null();
        }
        let pairs = self
            .inner
            .path_map
            .iter()
            .map(|(s, t)| (t.clone(), s.clone()))
            .collect();
        let offset = self.inner.offset.inverse().unwrap_or_default();
        MapFunction::create(pairs, offset)
    }

    fn has_identity_paths(&self) -> bool {
        self.inner.path_map.len() == 1
            && self.inner.path_map[0].0.is_absolute_root_path()
            && self.inner.path_map[0].1.is_absolute_root_path()
    }

    fn with_offset(&self, offset: LayerOffset) -> MapFunction {
        if offset == self.inner.offset {
            return self.clone();
        }
        MapFunction {
            inner: Arc::new(Inner {
                path_map: self.inner.path_map.clone(),
                offset,
                null: self.inner.null,
            }),
        }
    }
}
