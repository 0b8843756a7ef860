use std::time::Duration;

use engine::{schedule_offsets, slice_quantity, MAX_SLICE_COUNT};
use proptest::prelude::*;
use rust_decimal::Decimal;

proptest! {
    /// Slices always add back up to the requested total, exactly.
    #[test]
    fn slices_sum_to_total(
        mantissa in 1i64..1_000_000_000,
        precision in 0u32..=8,
        slice_count in 1u32..200,
    ) {
        let total = Decimal::new(mantissa, precision);
        let base_units = Decimal::new(mantissa, 0) / Decimal::from(slice_count);
        prop_assume!(base_units >= Decimal::ONE);

        let slices = slice_quantity(total, slice_count, precision).unwrap();
        prop_assert_eq!(slices.len(), slice_count as usize);
        prop_assert_eq!(slices.iter().copied().sum::<Decimal>(), total);
        for q in &slices {
            prop_assert!(*q > Decimal::ZERO);
            prop_assert!(q.normalize().scale() <= precision);
        }
        // Every slice but the last is identical; the last carries the remainder.
        let first = slices[0];
        prop_assert!(slices[..slices.len() - 1].iter().all(|q| *q == first));
        prop_assert!(slices[slices.len() - 1] >= first);
    }

    /// Offsets start at zero, never decrease and stay inside the window.
    #[test]
    fn schedule_is_monotonic_and_bounded(
        duration_ms in 0u64..86_400_000,
        slice_count in 1u32..500,
    ) {
        let total = Duration::from_millis(duration_ms);
        let offsets = schedule_offsets(total, slice_count);

        prop_assert_eq!(offsets.len(), slice_count as usize);
        prop_assert_eq!(offsets[0], Duration::ZERO);
        for pair in offsets.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        let last = offsets[offsets.len() - 1];
        prop_assert!(last <= total);
        if slice_count > 1 && !total.is_zero() {
            prop_assert!(last < total);
        }
    }

    /// Slicing never panics, whatever the input.
    #[test]
    fn slicing_never_panics(
        mantissa in any::<i64>(),
        scale in 0u32..=28,
        slice_count in prop_oneof![0u32..=MAX_SLICE_COUNT + 10, any::<u32>()],
        precision in 0u32..40,
    ) {
        let result = slice_quantity(Decimal::new(mantissa, scale), slice_count, precision);
        if slice_count > MAX_SLICE_COUNT {
            prop_assert!(result.is_err());
        }
    }
}
