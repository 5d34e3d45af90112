//! MNA matrix assembly and solving.

use crate::error::{Result, VoltgridError};

/// One additive contribution to the system matrix A.
///
/// Components never touch the matrix directly; they emit entries into a
/// [`StampSet`] that the owning subsystem aggregates sequentially, keeping a
/// single writer over the shared matrix.
#[derive(Debug, Clone, Copy)]
pub struct MatrixEntry {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// Collected matrix contributions for one rebuild.
#[derive(Debug, Default)]
pub struct StampSet {
    entries: Vec<MatrixEntry>,
}

impl StampSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add a single entry. Terms against ground (`None`) are dropped.
    pub fn add(&mut self, row: Option<usize>, col: Option<usize>, value: f64) {
        if let (Some(row), Some(col)) = (row, col) {
            self.entries.push(MatrixEntry { row, col, value });
        }
    }

    /// Stamp a conductance between two unknowns:
    ///   A[a,a] += g, A[b,b] += g, A[a,b] -= g, A[b,a] -= g
    pub fn conductance(&mut self, a: Option<usize>, b: Option<usize>, g: f64) {
        self.add(a, a, g);
        self.add(b, b, g);
        self.add(a, b, -g);
        self.add(b, a, -g);
    }

    /// Stamp the voltage-source augmentation between two unknowns and a
    /// branch-current row:
    ///   A[a,br] += 1, A[br,a] += 1, A[b,br] -= 1, A[br,b] -= 1
    pub fn source_coupling(&mut self, a: Option<usize>, b: Option<usize>, br: Option<usize>) {
        self.add(a, br, 1.0);
        self.add(br, a, 1.0);
        self.add(b, br, -1.0);
        self.add(br, b, -1.0);
    }

    pub(crate) fn entries(&self) -> &[MatrixEntry] {
        &self.entries
    }
}

/// MNA matrix system `A * x = i`.
///
/// Dense row-major storage with a cached LU decomposition: the matrix is
/// factored once per rebuild, and every tick only the right-hand side
/// changes before the substitution pass.
#[derive(Debug)]
pub struct MnaMatrix {
    /// System matrix A (row-major)
    a: Vec<f64>,
    /// Right-hand-side vector I
    rhs: Vec<f64>,
    /// Solution vector x
    x: Vec<f64>,
    /// Matrix dimension
    size: usize,
    /// LU decomposition of A
    lu: Vec<f64>,
    /// Pivot indices for the LU decomposition
    pivots: Vec<usize>,
}

impl MnaMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            a: vec![0.0; size * size],
            rhs: vec![0.0; size],
            x: vec![0.0; size],
            size,
            lu: vec![0.0; size * size],
            pivots: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Zero the matrix. The rhs is zeroed separately at the start of each
    /// tick's injection pass.
    pub fn clear(&mut self) {
        self.a.fill(0.0);
    }

    pub fn clear_rhs(&mut self) {
        self.rhs.fill(0.0);
    }

    /// Aggregate a set of collected stamps into A.
    pub fn apply(&mut self, stamps: &StampSet) {
        for entry in stamps.entries() {
            self.a[entry.row * self.size + entry.col] += entry.value;
        }
    }

    /// Add to the rhs; injections against ground are dropped.
    pub fn add_rhs(&mut self, row: Option<usize>, value: f64) {
        if let Some(row) = row {
            self.rhs[row] += value;
        }
    }

    pub fn solution(&self, index: usize) -> f64 {
        self.x[index]
    }

    /// Perform LU decomposition with partial pivoting.
    pub fn factor(&mut self) -> Result<()> {
        let n = self.size;
        self.lu.copy_from_slice(&self.a);

        for i in 0..n {
            self.pivots[i] = i;
        }

        for k in 0..n {
            // Find pivot
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;

            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < 1e-15 {
                return Err(VoltgridError::SingularMatrix);
            }

            // Swap rows if needed
            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            // Eliminate
            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }

        Ok(())
    }

    /// Solve the system using the cached LU decomposition.
    pub fn solve(&mut self) {
        let n = self.size;

        // Apply pivot permutation to the rhs
        for i in 0..n {
            self.x[i] = self.rhs[self.pivots[i]];
        }

        // Forward substitution (L * y = P * i)
        for i in 0..n {
            for j in 0..i {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
            self.x[i] /= self.lu[i * n + i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solves_two_by_two() {
        // 2x + y = 5, x + 3y = 10  ->  x = 1, y = 3
        let mut m = MnaMatrix::new(2);
        let mut stamps = StampSet::new();
        stamps.add(Some(0), Some(0), 2.0);
        stamps.add(Some(0), Some(1), 1.0);
        stamps.add(Some(1), Some(0), 1.0);
        stamps.add(Some(1), Some(1), 3.0);
        m.apply(&stamps);
        m.factor().unwrap();
        m.add_rhs(Some(0), 5.0);
        m.add_rhs(Some(1), 10.0);
        m.solve();
        assert_relative_eq!(m.solution(0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(m.solution(1), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn stamps_accumulate() {
        let mut m = MnaMatrix::new(1);
        let mut stamps = StampSet::new();
        stamps.conductance(Some(0), None, 0.5);
        stamps.conductance(Some(0), None, 0.5);
        m.apply(&stamps);
        m.factor().unwrap();
        m.add_rhs(Some(0), 2.0);
        m.solve();
        assert_relative_eq!(m.solution(0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn detects_singular_matrix() {
        // A lone conductance between two unknowns: rank 1.
        let mut m = MnaMatrix::new(2);
        let mut stamps = StampSet::new();
        stamps.conductance(Some(0), Some(1), 0.1);
        m.apply(&stamps);
        assert!(matches!(m.factor(), Err(VoltgridError::SingularMatrix)));
    }

    #[test]
    fn refactors_after_clear() {
        let mut m = MnaMatrix::new(1);
        let mut stamps = StampSet::new();
        stamps.add(Some(0), Some(0), 4.0);
        m.apply(&stamps);
        m.factor().unwrap();

        m.clear();
        stamps.clear();
        stamps.add(Some(0), Some(0), 8.0);
        m.apply(&stamps);
        m.factor().unwrap();
        m.clear_rhs();
        m.add_rhs(Some(0), 16.0);
        m.solve();
        assert_relative_eq!(m.solution(0), 2.0, epsilon = 1e-12);
    }
}
