//! Append-only binary trajectory file: full mesh state at scheduled instants.
//!
//! # Layout
//!
//! Every saved step is `4 + n * vsize` bytes:
//!
//! ```text
//! [n: i32 LE] [record 0] [record 1] ... [record n-1]
//! ```
//!
//! where `n` is the mesh cell count (constant for a run; the per-step copy
//! doubles as a header check when seeking) and each record is the cell's
//! `[A, Q, c...]` fields as little-endian f64 (`vsize` bytes, see
//! [`crate::state::record_size`]). Saved step `k` therefore starts at byte
//! `k * (4 + n * vsize)`, which is what lets profile and evolution extraction
//! seek instead of scan.
//!
//! # Contracts
//!
//! - `write_step` returns the number of cells persisted: `n` on success, 0 on
//!   any I/O error, never a silent partial write (the step is assembled in
//!   memory and written in one call).
//! - `read_step` returns the number of cells read: 0 on a short read, header
//!   mismatch, or I/O error, signaling truncation to the caller instead of
//!   returning garbage-filled buffers.
//! - The writer is only ever driven by the orchestrating thread at step
//!   checkpoints, so the file itself needs no locking.

pub mod export;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::TrajectoryError;
use crate::state::{record_size, CellState};

/// Writer for the binary trajectory file.
#[derive(Debug)]
pub struct TrajectoryWriter {
    file: File,
    n_cells: usize,
    n_solutes: usize,
    steps_written: usize,
    buf: Vec<u8>,
}

impl TrajectoryWriter {
    /// Create (truncate) the trajectory file for a mesh of `n_cells` cells.
    pub fn create(
        path: &Path,
        n_cells: usize,
        n_solutes: usize,
    ) -> Result<Self, TrajectoryError> {
        let file = File::create(path)?;
        Ok(Self {
            file,
            n_cells,
            n_solutes,
            steps_written: 0,
            buf: Vec::with_capacity(4 + n_cells * record_size(n_solutes)),
        })
    }

    /// Persist one saved step.
    ///
    /// Returns the number of cells written: `n_cells` on success, 0 on I/O
    /// failure. The step is staged in memory first so the file never ends
    /// mid-record on success.
    pub fn write_step(&mut self, states: &[CellState]) -> usize {
        debug_assert_eq!(states.len(), self.n_cells);

        self.buf.clear();
        self.buf
            .extend_from_slice(&(self.n_cells as i32).to_le_bytes());
        for state in states {
            debug_assert_eq!(state.c.len(), self.n_solutes);
            state.encode_into(&mut self.buf);
        }

        if self.file.write_all(&self.buf).is_err() {
            return 0;
        }
        if self.file.flush().is_err() {
            return 0;
        }
        self.steps_written += 1;
        self.n_cells
    }

    /// Number of steps successfully persisted so far.
    pub fn steps_written(&self) -> usize {
        self.steps_written
    }

    /// Flush and close.
    pub fn finish(mut self) -> Result<(), TrajectoryError> {
        self.file.flush()?;
        Ok(())
    }
}

/// Random-access reader for the binary trajectory file.
#[derive(Debug)]
pub struct TrajectoryReader {
    file: File,
    path: PathBuf,
    n_cells: usize,
    n_solutes: usize,
    step_bytes: u64,
    n_steps: usize,
}

impl TrajectoryReader {
    /// Open a trajectory file written for `n_solutes` active solutes.
    ///
    /// The cell count is taken from the first step header; the number of
    /// *complete* steps is derived from the file length, so a truncated file
    /// simply exposes fewer steps.
    pub fn open(path: &Path, n_solutes: usize) -> Result<Self, TrajectoryError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut header = [0u8; 4];
        if len < 4 || file.read_exact(&mut header).is_err() {
            return Err(TrajectoryError::Empty {
                path: path.to_path_buf(),
                len,
                step_size: 4,
            });
        }
        let n_cells = i32::from_le_bytes(header);
        if n_cells <= 0 {
            return Err(TrajectoryError::Empty {
                path: path.to_path_buf(),
                len,
                step_size: 4,
            });
        }
        let n_cells = n_cells as usize;
        let step_bytes = 4 + (n_cells * record_size(n_solutes)) as u64;
        let n_steps = (len / step_bytes) as usize;
        if n_steps == 0 {
            return Err(TrajectoryError::Empty {
                path: path.to_path_buf(),
                len,
                step_size: step_bytes,
            });
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            n_cells,
            n_solutes,
            step_bytes,
            n_steps,
        })
    }

    /// Mesh cell count of the run that produced this file.
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Number of complete saved steps available.
    pub fn step_count(&self) -> usize {
        self.n_steps
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read saved step `k` into `out`.
    ///
    /// `out` must hold `n_cells` states with the right solute count. Returns
    /// the number of cells read; 0 on seek failure, header mismatch, or a
    /// short read.
    pub fn read_step(&mut self, k: usize, out: &mut [CellState]) -> usize {
        if k >= self.n_steps || out.len() != self.n_cells {
            return 0;
        }
        if self
            .file
            .seek(SeekFrom::Start(k as u64 * self.step_bytes))
            .is_err()
        {
            return 0;
        }

        let mut header = [0u8; 4];
        if self.file.read_exact(&mut header).is_err() {
            return 0;
        }
        if i32::from_le_bytes(header) != self.n_cells as i32 {
            return 0;
        }

        let vsize = record_size(self.n_solutes);
        let mut record = vec![0u8; vsize];
        for (read, state) in out.iter_mut().enumerate() {
            if self.file.read_exact(&mut record).is_err() {
                return read;
            }
            state.decode_from(&record);
        }
        self.n_cells
    }

    /// Read one cell of saved step `k` without decoding the whole step.
    ///
    /// Used by the evolution export, which walks one cell across many steps.
    pub fn read_cell(&mut self, k: usize, cell: usize, out: &mut CellState) -> bool {
        if k >= self.n_steps || cell >= self.n_cells {
            return false;
        }
        let vsize = record_size(self.n_solutes);
        let offset = k as u64 * self.step_bytes + 4 + (cell * vsize) as u64;
        if self.file.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        let mut record = vec![0u8; vsize];
        if self.file.read_exact(&mut record).is_err() {
            return false;
        }
        out.decode_from(&record);
        true
    }
}
