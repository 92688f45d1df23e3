//! Packed upper-triangle storage of symmetric `Nfreqs x Nfreqs` matrices.
//!
//! Channel pairs `(n, nn)` with `n <= nn` are laid out in the order of the
//! nested loop `for n in 0..F { for nn in n..F { .. } }`, so the pair index is
//!
//! ```text
//! c(n, nn) = n * (2F - n - 1) / 2 + nn
//! ```
//!
//! Row `n` starts at `n * (2F - n + 1) / 2` and the offset inside the row is
//! `nn - n`; the two forms agree.

use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut2};

/// Number of stored entries, `F(F+1)/2`.
#[inline]
pub fn packed_len(nfreqs: usize) -> usize {
    nfreqs * (nfreqs + 1) / 2
}

/// Index of channel pair `(n, nn)`; the pair is unordered.
#[inline]
pub fn pair_index(n: usize, nn: usize, nfreqs: usize) -> usize {
    let (lo, hi) = if n <= nn { (n, nn) } else { (nn, n) };
    debug_assert!(hi < nfreqs);
    lo * (2 * nfreqs - lo - 1) / 2 + hi
}

/// Channel pairs in storage order.
pub fn channel_pairs(nfreqs: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..nfreqs).flat_map(move |n| (n..nfreqs).map(move |nn| (n, nn)))
}

/// Fills both triangles of `out` from one packed row.
pub fn unpack_into(packed: ArrayView1<'_, f64>, mut out: ArrayViewMut2<'_, f64>) {
    let nfreqs = out.nrows();
    debug_assert_eq!(packed.len(), packed_len(nfreqs));
    for (c, (n, nn)) in channel_pairs(nfreqs).enumerate() {
        let v = packed[c];
        out[(n, nn)] = v;
        out[(nn, n)] = v;
    }
}

/// Packs the upper triangle of a symmetric matrix.
pub fn pack(matrix: ArrayView2<'_, f64>) -> Array1<f64> {
    let nfreqs = matrix.nrows();
    channel_pairs(nfreqs).map(|(n, nn)| matrix[(n, nn)]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn pair_index_follows_accumulation_order() {
        for nfreqs in 1..12 {
            let mut c = 0;
            for n in 0..nfreqs {
                for nn in n..nfreqs {
                    assert_eq!(pair_index(n, nn, nfreqs), c, "F={nfreqs} ({n},{nn})");
                    assert_eq!(pair_index(nn, n, nfreqs), c);
                    c += 1;
                }
            }
            assert_eq!(c, packed_len(nfreqs));
        }
    }

    #[test]
    fn row_start_form_agrees() {
        let nfreqs = 7;
        for n in 0..nfreqs {
            for nn in n..nfreqs {
                let row_start = n * (2 * nfreqs - n + 1) / 2;
                assert_eq!(pair_index(n, nn, nfreqs), row_start + (nn - n));
            }
        }
    }

    #[test]
    fn pack_then_unpack_is_exact() {
        let nfreqs = 5;
        let mut sym = Array2::zeros((nfreqs, nfreqs));
        for n in 0..nfreqs {
            for nn in n..nfreqs {
                let v = 1.0 / (1.0 + n as f64 + 3.7 * nn as f64);
                sym[(n, nn)] = v;
                sym[(nn, n)] = v;
            }
        }
        let packed = pack(sym.view());
        assert_eq!(packed.len(), packed_len(nfreqs));
        let mut back = Array2::from_elem((nfreqs, nfreqs), f64::NAN);
        unpack_into(packed.view(), back.view_mut());
        assert_eq!(back, sym);
    }

    #[test]
    fn unpack_places_known_entries() {
        // [a b c; b d e; c e f] packed as [a b c d e f]
        let packed = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut m = Array2::zeros((3, 3));
        unpack_into(packed.view(), m.view_mut());
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(2, 0)], 3.0);
        assert_eq!(m[(1, 1)], 4.0);
        assert_eq!(m[(1, 2)], 5.0);
        assert_eq!(m[(2, 2)], 6.0);
    }
}
