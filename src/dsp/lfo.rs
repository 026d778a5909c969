//! Quadrature LFO for tremolo and auto-pan.
//!
//! Two coupled state variables rotated by a small angle each sample. The
//! recurrence uses the freshly updated first state when updating the
//! second, which keeps the amplitude stable without renormalizing.

#[derive(Debug, Clone)]
pub struct QuadratureLfo {
    sin: f32,
    cos: f32,
}

impl Default for QuadratureLfo {
    fn default() -> Self {
        QuadratureLfo::new()
    }
}

impl QuadratureLfo {
    pub fn new() -> Self {
        QuadratureLfo { sin: 0.0, cos: 1.0 }
    }

    /// Rotate by `increment` radians and return the new cosine output.
    #[inline]
    pub fn advance(&mut self, increment: f32) -> f32 {
        self.sin += increment * self.cos;
        self.cos -= increment * self.sin;
        self.cos
    }

    /// Restart at a fixed phase (-45 degrees).
    pub fn reset_phase(&mut self) {
        self.sin = -0.7071;
        self.cos = 0.7071;
    }

    pub fn value(&self) -> f32 {
        self.cos
    }

    pub fn state(&self) -> (f32, f32) {
        (self.sin, self.cos)
    }
}
