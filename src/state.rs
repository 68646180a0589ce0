//! Per-cell numeric state and the fixed-size trajectory record codec.
//!
//! State vector per cell: wetted area A, discharge Q, and one concentration
//! per active solute. The trajectory file stores exactly these fields as
//! little-endian f64, so `record_size` here defines the binary layout of the
//! solution file.

use crate::system::SectionGeometry;

/// State of one mesh cell: flow variables plus solute concentrations.
#[derive(Clone, Debug, PartialEq)]
pub struct CellState {
    /// Wetted area (m²).
    pub a: f64,
    /// Discharge (m³/s).
    pub q: f64,
    /// Concentration per solute (kg/m³).
    pub c: Vec<f64>,
}

impl CellState {
    pub fn new(a: f64, q: f64, n_solutes: usize) -> Self {
        Self {
            a,
            q,
            c: vec![0.0; n_solutes],
        }
    }

    /// Dry cell with zero discharge.
    pub fn dry(n_solutes: usize) -> Self {
        Self::new(0.0, 0.0, n_solutes)
    }

    /// Velocity with dry-cell desingularization.
    ///
    /// u = 2 A Q / (A² + max(A, A_min)²); tends to Q/A for wet cells and to 0
    /// as the cell dries, without dividing by a vanishing area.
    pub fn velocity(&self, a_min: f64) -> f64 {
        let a_reg = self.a.max(a_min);
        let denom = self.a * self.a + a_reg * a_reg;
        if denom > 0.0 {
            2.0 * self.a * self.q / denom
        } else {
            0.0
        }
    }

    /// Water depth for the given section shape.
    pub fn depth(&self, geometry: &SectionGeometry) -> f64 {
        geometry.depth_from_area(self.a)
    }

    /// Free-surface elevation for the given section shape.
    pub fn level(&self, geometry: &SectionGeometry) -> f64 {
        geometry.z_bottom + self.depth(geometry)
    }

    /// True if any field is non-finite.
    pub fn has_invalid(&self) -> bool {
        !self.a.is_finite() || !self.q.is_finite() || self.c.iter().any(|v| !v.is_finite())
    }

    /// Append this cell's record (A, Q, c...) to `buf` as little-endian f64.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.a.to_le_bytes());
        buf.extend_from_slice(&self.q.to_le_bytes());
        for &c in &self.c {
            buf.extend_from_slice(&c.to_le_bytes());
        }
    }

    /// Decode one record from `bytes`; `bytes.len()` must equal the record
    /// size for this cell's solute count.
    pub fn decode_from(&mut self, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), record_size(self.c.len()));
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[8 * i..8 * i + 8]);
            f64::from_le_bytes(buf)
        };
        self.a = field(0);
        self.q = field(1);
        for (i, c) in self.c.iter_mut().enumerate() {
            *c = field(2 + i);
        }
    }
}

/// Bytes per trajectory record for the given solute count.
pub const fn record_size(n_solutes: usize) -> usize {
    8 * (2 + n_solutes)
}

/// Double-buffered state for the whole mesh.
///
/// The interior update reads `current` (including immediate neighbors across
/// thread-slice boundaries, finalized in the previous phase) and writes
/// `next`; a swap at the end of the step makes the update visible.
#[derive(Clone, Debug)]
pub struct StateBuffers {
    pub current: Vec<CellState>,
    pub next: Vec<CellState>,
}

impl StateBuffers {
    pub fn new(initial: Vec<CellState>) -> Self {
        let next = initial.clone();
        Self {
            current: initial,
            next,
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }
}
