//! Packing of one batch into a single staging allocation.

/// Offsets of each payload in a batch's staging allocation.
///
/// Payloads are laid out back to back in request order, so
/// `offsets[i] == sizes[0] + .. + sizes[i - 1]` and the last payload ends
/// exactly at `total`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StagingLayout {
    offsets: Vec<u64>,
    sizes: Vec<u64>,
    total: u64,
}

impl StagingLayout {
    /// Lays out payloads of the given byte sizes.
    pub fn plan(sizes: impl IntoIterator<Item = u64>) -> Self {
        let sizes: Vec<u64> = sizes.into_iter().collect();
        let mut offsets = Vec::with_capacity(sizes.len());
        let mut total = 0;
        for size in &sizes {
            offsets.push(total);
            total += size;
        }
        Self {
            offsets,
            sizes,
            total,
        }
    }

    /// Offset of payload `index`.
    pub fn offset(&self, index: usize) -> u64 {
        self.offsets[index]
    }

    /// Byte range of payload `index` within the allocation.
    pub fn range(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.offsets[index] as usize;
        start..start + self.sizes[index] as usize
    }

    /// All offsets, in request order.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Size of the whole allocation.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true for a layout with no payloads.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
