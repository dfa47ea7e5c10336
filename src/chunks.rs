//! Splitting work into chunks.
//!
//! Mapping over chunks instead of single items amortizes the per-task overhead
//! when the function itself is cheap.

/// Chunk size closest to `size` that splits `len` items into near-equal chunks.
pub fn balanced_size(len: usize, size: usize) -> usize {
    let size = size.max(1);
    if len == 0 {
        return size;
    }
    let count = (len as f64 / size as f64).round().max(1.0);
    ((len as f64 / count).round() as usize).max(1)
}

/// Iterator yielding owned chunks of another iterator.
///
/// When the number of items is known, either from an exact `size_hint` or from
/// [`length`](Chunks::length), the chunk size is rebalanced so the chunks come
/// out nearly equal.
///
/// ```
/// use parfor_rs::Chunks;
///
/// let chunks: Vec<Vec<u32>> = Chunks::new(0..12, 5).collect();
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].len(), 6);
/// ```
#[derive(Debug, Clone)]
pub struct Chunks<It> {
    iter: It,
    requested: usize,
    size: usize,
    remaining: Option<usize>,
}

impl<It: Iterator> Chunks<It> {
    pub fn new<T>(iterable: T, size: usize) -> Self
    where
        T: IntoIterator<IntoIter = It>,
    {
        let iter = iterable.into_iter();
        let remaining = match iter.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        };
        let size = match remaining {
            Some(len) => balanced_size(len, size),
            None => size.max(1),
        };
        Self {
            iter,
            requested: size,
            size,
            remaining,
        }
    }

    /// Declare the number of items, for iterators that cannot tell.
    pub fn length(mut self, len: usize) -> Self {
        self.size = balanced_size(len, self.requested);
        self.remaining = Some(len);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.size
    }
}

impl<It: Iterator> Iterator for Chunks<It> {
    type Item = Vec<It::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<_> = self.iter.by_ref().take(self.size).collect();
        if chunk.is_empty() {
            return None;
        }
        if let Some(ref mut remaining) = self.remaining {
            *remaining = remaining.saturating_sub(chunk.len());
        }
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining {
            Some(len) => {
                let n = len.div_ceil(self.size);
                (n, Some(n))
            }
            None => {
                let (lower, upper) = self.iter.size_hint();
                (
                    lower.div_ceil(self.size),
                    upper.map(|u| u.div_ceil(self.size)),
                )
            }
        }
    }
}

/// Near-equal borrowed chunks of `slice`, each close to `size` elements.
pub fn chunks<T>(slice: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    slice.chunks(balanced_size(slice.len(), size))
}

/// Near-equal chunks taken at the same offsets from several slices.
///
/// Each item holds one sub-slice per input. Slices of unequal length are
/// treated as if cut down to the shortest one.
///
/// ```
/// let xs = [1, 2, 3, 4, 5, 6];
/// let ys = [10, 20, 30, 40, 50, 60];
/// let parts: Vec<_> = parfor_rs::chunks_many(&[&xs[..], &ys[..]], 3).collect();
/// assert_eq!(parts.len(), 2);
/// assert_eq!(parts[1], [&xs[3..], &ys[3..]]);
/// ```
pub fn chunks_many<'a, T>(slices: &[&'a [T]], size: usize) -> ChunksMany<'a, T> {
    let len = slices.iter().map(|s| s.len()).min().unwrap_or(0);
    ChunksMany {
        slices: slices.to_vec(),
        size: balanced_size(len, size),
        offset: 0,
        len,
    }
}

/// Iterator returned by [`chunks_many`].
#[derive(Debug, Clone)]
pub struct ChunksMany<'a, T> {
    slices: Vec<&'a [T]>,
    size: usize,
    offset: usize,
    len: usize,
}

impl<'a, T> Iterator for ChunksMany<'a, T> {
    type Item = Vec<&'a [T]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.len {
            return None;
        }
        let start = self.offset;
        let end = self.len.min(start + self.size);
        let parts = self.slices.iter().copied().map(|s| &s[start..end]).collect();
        self.offset = end;
        Some(parts)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.len - self.offset).div_ceil(self.size);
        (n, Some(n))
    }
}

impl<T> ExactSizeIterator for ChunksMany<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_size() {
        assert_eq!(balanced_size(12, 5), 6);
        assert_eq!(balanced_size(10, 3), 3);
        assert_eq!(balanced_size(100, 30), 33);
        assert_eq!(balanced_size(2, 10), 2);
        assert_eq!(balanced_size(0, 4), 4);
        assert_eq!(balanced_size(5, 0), 1);
    }

    #[test]
    fn test_chunks_are_balanced() {
        let sizes: Vec<usize> = Chunks::new((0..12).collect::<Vec<_>>(), 5)
            .map(|c| c.len())
            .collect();
        assert_eq!(sizes, vec![6, 6]);
    }

    #[test]
    fn test_unknown_length_uses_fixed_size() {
        let iter = (0..7).filter(|_| true);
        let chunks: Vec<Vec<i32>> = Chunks::new(iter, 3).collect();
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn test_explicit_length() {
        let iter = (0..12).filter(|_| true);
        let chunks = Chunks::new(iter, 5).length(12);
        assert_eq!(chunks.chunk_size(), 6);
        assert_eq!(chunks.size_hint(), (2, Some(2)));
        assert_eq!(chunks.count(), 2);
    }

    #[test]
    fn test_length_starts_from_requested_size() {
        let chunks = Chunks::new(vec![0u8; 25], 10);
        assert_eq!(chunks.chunk_size(), 8);
        let chunks = chunks.length(12);
        assert_eq!(chunks.chunk_size(), 12);
        assert_eq!(chunks.count(), 1);
    }

    #[test]
    fn test_size_hint_counts_down() {
        let mut chunks = Chunks::new(0..10, 3);
        assert_eq!(chunks.size_hint(), (4, Some(4)));
        chunks.next();
        assert_eq!(chunks.size_hint(), (3, Some(3)));
    }

    #[test]
    fn test_slice_chunks() {
        let data: Vec<u8> = (0..12).collect();
        let parts: Vec<&[u8]> = chunks(&data, 5).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], &data[6..]);
        assert_eq!(chunks::<u8>(&[], 3).count(), 0);
    }

    #[test]
    fn test_chunks_many_lines_up_slices() {
        let xs: Vec<u32> = (0..12).collect();
        let ys: Vec<u32> = (100..112).collect();
        let parts: Vec<Vec<&[u32]>> = chunks_many(&[&xs[..], &ys[..]], 5).collect();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], vec![&xs[..6], &ys[..6]]);
        assert_eq!(parts[1], vec![&xs[6..], &ys[6..]]);
    }

    #[test]
    fn test_chunks_many_uses_shortest_slice() {
        let long = [1u8; 10];
        let short = [2u8; 4];
        let mut parts = chunks_many(&[&long[..], &short[..]], 2);
        assert_eq!(parts.len(), 2);
        let first = parts.next().unwrap();
        assert_eq!(first[0].len(), 2);
        assert_eq!(first[1].len(), 2);
        assert_eq!(parts.map(|p| p[0].len()).sum::<usize>(), 2);
        assert_eq!(chunks_many::<u8>(&[], 3).count(), 0);
    }
}
