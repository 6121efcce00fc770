//! Bit-twiddling helpers for the split-ordered list: full-width bit reversal
//! (the list's sort key) and the order-table addressing scheme from
//! `4.2.2` of the table's design.

/// Reverse all 64 bits of `x`.
///
/// User keys and dummy bucket anchors share one reversed-hash sort key built
/// from this function: a dummy for bucket `b` reverses the zero-extended
/// bucket index, while a real node reverses its full hash. Because nodes
/// routed to bucket `b` all share `b`'s low `log2(size)` bits, after
/// reversal those shared bits become the *high* bits of the sort key, and
/// the dummy (whose higher-order bits are all zero before reversal, hence
/// all zero in the low bits after) always sorts first among them.
pub(crate) const fn bit_reverse_u64(x: u64) -> u64 {
    x.reverse_bits()
}

/// `floor(log2(x)) + 1` for `x > 0`, and `0` for `x == 0`.
///
/// This is "find last set bit" (`fls`), which is what the order-table
/// addressing scheme actually needs: see `DESIGN.md` for why the plain
/// `floor(log2(b+1))` phrasing elsewhere undercounts at non-power-of-two
/// boundaries and why `fls` is the form that keeps the per-order array size
/// `2^(order-1)` self-consistent.
pub(crate) fn fls_usize(x: usize) -> u32 {
    if x == 0 {
        0
    } else {
        usize::BITS - x.leading_zeros()
    }
}

/// The order table entry a bucket index is anchored in, and its sub-index
/// within that order's dummy array.
pub(crate) fn bucket_order_and_sub(bucket: usize) -> (usize, usize) {
    if bucket == 0 {
        return (0, 0);
    }
    let order = fls_usize(bucket) as usize;
    let sub = bucket - (1usize << (order - 1));
    (order, sub)
}

/// Reversed sort key for the dummy anchoring `bucket` in a table whose
/// current size is a power of two no larger than `2^63`.
pub(crate) fn dummy_reverse_hash(bucket: usize) -> u64 {
    bit_reverse_u64(bucket as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reverse_is_involutive() {
        for x in [0u64, 1, 2, 3, 0xdead_beef, u64::MAX, 0x8000_0000_0000_0000] {
            assert_eq!(bit_reverse_u64(bit_reverse_u64(x)), x);
        }
    }

    #[test]
    fn fls_matches_bit_length() {
        assert_eq!(fls_usize(0), 0);
        assert_eq!(fls_usize(1), 1);
        assert_eq!(fls_usize(2), 2);
        assert_eq!(fls_usize(3), 2);
        assert_eq!(fls_usize(4), 3);
        assert_eq!(fls_usize(7), 3);
        assert_eq!(fls_usize(8), 4);
    }

    #[test]
    fn order_table_addressing_matches_array_sizes() {
        // order o (o >= 1) must hold exactly 2^(o-1) buckets: [2^(o-1), 2^o - 1].
        let mut expected_order = 0usize;
        let mut next_boundary = 1usize;
        for b in 0..64usize {
            if b == next_boundary {
                expected_order += 1;
                next_boundary *= 2;
            }
            let (order, sub) = bucket_order_and_sub(b);
            assert_eq!(order, expected_order, "bucket {b}");
            if order > 0 {
                assert!(sub < (1usize << (order - 1)));
            }
        }
    }

    #[test]
    fn dummy_sorts_before_its_bucket_members() {
        // All hashes sharing bucket b's low bits (for table size s) should
        // reverse to a key >= the dummy's reversed bucket index.
        let s: u64 = 8; // table size
        for b in 0..s {
            let dummy_key = dummy_reverse_hash(b as usize);
            for high in 0..4u64 {
                let h = (high << 3) | b; // shares low 3 bits with bucket b
                let member_key = bit_reverse_u64(h);
                assert!(dummy_key <= member_key, "bucket {b} high {high}");
            }
        }
    }
}
