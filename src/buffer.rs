//! Growable scratch space for compressed output

/// Growth factor used when the configured one would not grow the buffer
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.2;

/// A byte region that only ever grows.
///
/// Slices taken from the buffer are invalidated by [`extend`](Self::extend);
/// callers re-fetch them after every growth.
#[derive(Debug, Clone)]
pub struct DynamicBuffer {
    data: Vec<u8>,
    factor: f64,
}

impl DynamicBuffer {
    /// Create a buffer of `initial` bytes growing by `factor`.
    ///
    /// A factor of 1.0 or less (or NaN) falls back to [`DEFAULT_GROWTH_FACTOR`].
    pub fn new(initial: usize, factor: f64) -> Self {
        let factor = if factor > 1.0 && factor.is_finite() {
            factor
        } else {
            DEFAULT_GROWTH_FACTOR
        };

        Self {
            data: vec![0; initial.max(1)],
            factor,
        }
    }

    /// Current capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Get the growth factor
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Grow the buffer by the growth factor, by at least one byte.
    ///
    /// Existing bytes are kept.
    pub fn extend(&mut self) {
        let current = self.data.len();
        let grown = ((current as f64) * self.factor).ceil() as usize;
        self.data.resize(grown.max(current + 1), 0);
    }

    /// Grow until at least `margin` bytes are free after `offset`
    pub fn reserve_after(&mut self, offset: usize, margin: usize) {
        while self.data.len().saturating_sub(offset) < margin {
            self.extend();
        }
    }

    /// The whole region
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The whole region, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
