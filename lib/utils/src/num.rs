//! Numeric Utilities

/// Alignment helpers for integer sizes and addresses.
///
/// `align` must be non-zero; a zero alignment panics on the remainder like any integer division.
pub trait AlignableTo: Sized {
    /// Rounds up to the nearest multiple of `align`, or `None` on overflow.
    fn align_up(self, align: Self) -> Option<Self>;

    /// Rounds down to the nearest multiple of `align`.
    fn align_down(self, align: Self) -> Self;

    /// Whether the value is already a multiple of `align`.
    fn is_aligned_to(self, align: Self) -> bool;
}

macro_rules! impl_alignable {
    ($($t:ty),*) => {
        $(
            impl AlignableTo for $t {
                fn align_up(self, align: Self) -> Option<Self> {
                    match self % align {
                        0 => Some(self),
                        rem => self.checked_add(align - rem),
                    }
                }

                fn align_down(self, align: Self) -> Self {
                    self - (self % align)
                }

                fn is_aligned_to(self, align: Self) -> bool {
                    self % align == 0
                }
            }
        )*
    };
}

impl_alignable!(u16, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(0x1001u64.align_up(0x1000), Some(0x2000));
        assert_eq!(0x1000u64.align_up(0x1000), Some(0x1000));
        assert_eq!(0x1fffu64.align_down(0x1000), 0x1000);
        assert!(0x3000u64.is_aligned_to(0x1000));
        assert!(!0x3001u64.is_aligned_to(0x1000));
    }
}
