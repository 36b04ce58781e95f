use super::DataError;

/// Extent of a dataset or chunk, one entry per dimension
pub type Extent = Vec<u64>;

/// Offset of a chunk inside a dataset, one entry per dimension
pub type Offset = Vec<u64>;

/// Number of elements covered by an extent
pub fn element_count(extent: &[u64]) -> u64 {
    extent.iter().product()
}

/// Check that `offset + extent` lies within `dataset` in every dimension
pub fn check_region(dataset: &[u64], offset: &[u64], extent: &[u64]) -> Result<(), DataError> {
    if offset.len() != dataset.len() || extent.len() != dataset.len() {
        return Err(DataError::RankMismatch {
            dataset: dataset.len(),
            selection: offset.len().max(extent.len()),
        });
    }
    for (dim, ((&bound, &off), &ext)) in dataset.iter().zip(offset).zip(extent).enumerate() {
        let end = off.checked_add(ext);
        if end.map_or(true, |end| end > bound) {
            return Err(DataError::OutOfBounds {
                dim,
                offset: off,
                extent: ext,
                bound,
            });
        }
    }
    Ok(())
}

fn strides(dims: &[u64]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for d in (0..dims.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * dims[d + 1] as usize;
    }
    strides
}

/// Visit the contiguous runs of a row-major selection.
///
/// The callback receives `(dataset_index, chunk_index, run_length)` for each
/// run along the innermost dimension. The region must already have passed
/// [`check_region`].
pub(crate) fn for_each_run<F>(dataset: &[u64], offset: &[u64], extent: &[u64], mut f: F)
where
    F: FnMut(usize, usize, usize),
{
    let rank = extent.len();
    if rank == 0 || extent.iter().any(|&e| e == 0) {
        return;
    }
    let dataset_strides = strides(dataset);
    let chunk_strides = strides(extent);
    let run = extent[rank - 1] as usize;
    let mut index = vec![0u64; rank - 1];

    loop {
        let mut dataset_pos = offset[rank - 1] as usize;
        let mut chunk_pos = 0usize;
        for d in 0..rank - 1 {
            dataset_pos += (offset[d] + index[d]) as usize * dataset_strides[d];
            chunk_pos += index[d] as usize * chunk_strides[d];
        }
        f(dataset_pos, chunk_pos, run);

        // odometer over all but the innermost dimension
        let mut d = rank - 1;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            index[d] += 1;
            if index[d] < extent[d] {
                break;
            }
            index[d] = 0;
        }
    }
}
