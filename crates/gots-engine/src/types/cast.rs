//! Implicit numeric widening ("cast-up") rules, spec.md §4.3 and the
//! lattice law in §8 item 6.

use super::Ty;

fn int_of(width: u32, signed: bool) -> Ty {
    match (width, signed) {
        (8, true) => Ty::I8,
        (8, false) => Ty::U8,
        (16, true) => Ty::I16,
        (16, false) => Ty::U16,
        (32, true) => Ty::I32,
        (32, false) => Ty::U32,
        (64, true) => Ty::I64,
        _ => Ty::U64,
    }
}

/// Widens two numeric types to their common arithmetic type.
///
/// Commutative and idempotent by construction: the result depends only
/// on the unordered pair `{a, b}`, and `cast_up(a, a) == a`.
pub fn cast_up(a: &Ty, b: &Ty) -> Ty {
    if a == b {
        return a.clone();
    }
    if a.is_float() || b.is_float() {
        // Mixing integer and float, or two different float widths,
        // always yields 64-bit float: precision loss is accepted in
        // exchange for range (spec.md §4.3).
        return Ty::F64;
    }
    debug_assert!(a.is_integer() && b.is_integer());
    let (wa, wb) = (a.width(), b.width());
    let width = wa.max(wb);
    if a.is_signed() != b.is_signed() {
        // Mixing signed and unsigned always yields signed at the wider
        // width, regardless of which operand was wider (spec.md §4.3).
        return int_of(width, true);
    }
    if wa != wb {
        return if wa > wb { a.clone() } else { b.clone() };
    }
    a.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commutative_and_idempotent() {
        let pairs = [
            (Ty::I32, Ty::F32),
            (Ty::I64, Ty::F64),
            (Ty::I32, Ty::I64),
            (Ty::I32, Ty::U32),
            (Ty::U8, Ty::I64),
        ];
        for (a, b) in pairs {
            assert_eq!(cast_up(&a, &b), cast_up(&b, &a));
            assert_eq!(cast_up(&a, &a), a);
        }
    }

    #[test]
    fn spec_examples() {
        assert_eq!(cast_up(&Ty::I32, &Ty::F32), Ty::F64);
        assert_eq!(cast_up(&Ty::I64, &Ty::F64), Ty::F64);
        assert_eq!(cast_up(&Ty::I32, &Ty::I64), Ty::I64);
        assert_eq!(cast_up(&Ty::I32, &Ty::U32), Ty::I32);
        assert_eq!(cast_up(&Ty::U8, &Ty::I64), Ty::I64);
    }

    #[test]
    fn signed_wins_even_when_unsigned_is_wider() {
        assert_eq!(cast_up(&Ty::I8, &Ty::U64), Ty::I64);
        assert_eq!(cast_up(&Ty::I16, &Ty::U32), Ty::I32);
        assert_eq!(cast_up(&Ty::U32, &Ty::I16), Ty::I32);
    }
}
