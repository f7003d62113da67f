//! Layer time offsets.

/// A time mapping applied when crossing into a layer or across an arc:
/// `t -> t * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerOffset {
    pub offset: f64,
    pub scale: f64,
}

impl Default for LayerOffset {
    fn default() -> Self {
        LayerOffset { offset: 0.0, scale: 1.0 }
    }
}

impl LayerOffset {
    pub fn new(offset: f64, scale: f64) -> Self {
        LayerOffset { offset, scale }
    }

    pub fn is_identity(&self) -> bool {
        self.offset == 0.0 && self.scale == 1.0
    }

    /// An offset is valid when it is finite and invertible.
    pub fn is_valid(&self) -> bool {
        self.offset.is_finite() && self.scale.is_finite() && self.scale != 0.0
    }

    pub fn apply(&self, time: f64) -> f64 {
        time * self.scale + self.offset
    }

    /// Compose offsets: `(a * b).apply(t) == a.apply(b.apply(t))`.
    pub fn compose(&self, inner: &LayerOffset) -> LayerOffset {
        LayerOffset {
            offset: inner.offset * self.scale + self.offset,
            scale: self.scale * inner.scale,
        }
    }

    pub fn inverse(&self) -> Option<LayerOffset> {
        if !self.is_valid() {
            return None;
        }
        Some(LayerOffset {
            offset: -self.offset / self.scale,
            scale: 1.0 / self.scale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_and_validity() {
        assert!(LayerOffset::default().is_identity());
        assert!(LayerOffset::new(1.0, 2.0).is_valid());
        assert!(!LayerOffset::new(0.0, 0.0).is_valid());
        assert!(!LayerOffset::new(f64::NAN, 1.0).is_valid());
    }

    #[test]
    fn compose_matches_application_order() {
        let a = LayerOffset::new(10.0, 2.0);
        let b = LayerOffset::new(3.0, 4.0);
        let t = 1.5;
        assert_eq!(a.compose(&b).apply(t), a.apply(b.apply(t)));
    }

    #[test]
    fn inverse_round_trips() {
        let a = LayerOffset::new(10.0, 2.0);
        let inv = a.inverse().unwrap();
        assert_eq!(inv.apply(a.apply(7.0)), 7.0);
        assert!(LayerOffset::new(1.0, 0.0).inverse().is_none());
    }
}
