use crate::error::Result;
use crate::util::check_argument;

/// Flattens the `shingle_size` most recent base points into one input of
/// dimension `shingle_size * base_dimensions`.
///
/// Sliding mode shifts the window so the newest point always occupies the
/// last block; cyclic mode overwrites blocks round-robin, leaving older
/// blocks in place.
#[derive(Clone, Debug)]
pub struct ShingleBuilder {
    base_dimensions: usize,
    shingle_size: usize,
    cyclic: bool,
    buffer: Vec<f32>,
    consumed: u64,
}

impl ShingleBuilder {
    pub fn new(base_dimensions: usize, shingle_size: usize, cyclic: bool) -> Result<Self> {
        check_argument(base_dimensions >= 1, "base dimensions must be positive")?;
        check_argument(shingle_size >= 1, "shingle size must be positive")?;
        Ok(ShingleBuilder {
            base_dimensions,
            shingle_size,
            cyclic,
            buffer: vec![0.0; base_dimensions * shingle_size],
            consumed: 0,
        })
    }

    pub fn base_dimensions(&self) -> usize {
        self.base_dimensions
    }

    pub fn shingled_dimensions(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// True once enough base points have been consumed to fill the window.
    pub fn is_full(&self) -> bool {
        self.consumed >= self.shingle_size as u64
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn push(&mut self, point: &[f32]) -> Result<()> {
        check_argument(
            point.len() == self.base_dimensions,
            "incorrect base point length",
        )?;
        let base = self.base_dimensions;
        if self.cyclic {
            let offset = (self.consumed as usize % self.shingle_size) * base;
            self.buffer[offset..offset + base].copy_from_slice(point);
        } else if (self.consumed as usize) < self.shingle_size {
            let offset = self.consumed as usize * base;
            self.buffer[offset..offset + base].copy_from_slice(point);
        } else {
            self.buffer.copy_within(base.., 0);
            let offset = self.buffer.len() - base;
            self.buffer[offset..].copy_from_slice(point);
        }
        self.consumed += 1;
        Ok(())
    }

    /// The current shingled input.
    pub fn shingled_point(&self) -> Vec<f32> {
        self.buffer.clone()
    }

    /// The shingled input that pushing `point` would produce, without
    /// consuming it. Used to phrase queries about a hypothetical next point.
    pub fn shingled_with(&self, point: &[f32]) -> Result<Vec<f32>> {
        check_argument(
            point.len() == self.base_dimensions,
            "incorrect base point length",
        )?;
        let base = self.base_dimensions;
        let mut shingled = self.buffer.clone();
        if self.cyclic {
            let offset = (self.consumed as usize % self.shingle_size) * base;
            shingled[offset..offset + base].copy_from_slice(point);
        } else {
            shingled.copy_within(base.., 0);
            let offset = shingled.len() - base;
            shingled[offset..].copy_from_slice(point);
        }
        Ok(shingled)
    }

    /// Positions within the shingled input that the next base point's
    /// coordinate `indices` occupy; lets callers phrase missing-value
    /// queries in base coordinates.
    pub fn map_next_indices(&self, indices: &[usize]) -> Result<Vec<usize>> {
        let base = self.base_dimensions;
        let mut mapped = Vec::with_capacity(indices.len());
        for &i in indices {
            check_argument(i < base, "missing index outside the base point")?;
            if self.cyclic {
                mapped.push((self.consumed as usize % self.shingle_size) * base + i);
            } else {
                mapped.push(self.buffer.len() - base + i);
            }
        }
        Ok(mapped)
    }

    pub(crate) fn restore(
        base_dimensions: usize,
        shingle_size: usize,
        cyclic: bool,
        buffer: Vec<f32>,
        consumed: u64,
    ) -> Result<Self> {
        let mut builder = ShingleBuilder::new(base_dimensions, shingle_size, cyclic)?;
        check_argument(
            buffer.len() == builder.buffer.len(),
            "shingle buffer length mismatch",
        )?;
        builder.buffer = buffer;
        builder.consumed = consumed;
        Ok(builder)
    }

    pub(crate) fn buffer(&self) -> &[f32] {
        &self.buffer
    }
}
