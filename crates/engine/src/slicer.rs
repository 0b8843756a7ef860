use rust_decimal::{Decimal, RoundingStrategy};

use common::{Error, Result, MAX_QUANTITY_PRECISION};

/// Most slices a single run may be split into.
pub const MAX_SLICE_COUNT: u32 = 10_000;

/// Split `total` into `slice_count` positive quantities at `precision`
/// decimal places whose sum is exactly `total`.
///
/// Every slice gets `total / slice_count` truncated to `precision`; the
/// truncation remainder goes to the last slice, so the sum never drifts no
/// matter how many slices there are.
pub fn slice_quantity(total: Decimal, slice_count: u32, precision: u32) -> Result<Vec<Decimal>> {
    if slice_count == 0 {
        return Err(Error::InvalidPlan("slice count must be at least 1".into()));
    }
    if slice_count > MAX_SLICE_COUNT {
        return Err(Error::InvalidPlan(format!(
            "slice count {slice_count} exceeds the maximum of {MAX_SLICE_COUNT}"
        )));
    }
    if total <= Decimal::ZERO {
        return Err(Error::InvalidPlan(format!(
            "total quantity must be positive, got {total}"
        )));
    }
    if precision > MAX_QUANTITY_PRECISION {
        return Err(Error::InvalidPlan(format!(
            "quantity precision {precision} exceeds the maximum of {MAX_QUANTITY_PRECISION}"
        )));
    }
    if total.normalize().scale() > precision {
        return Err(Error::InvalidPlan(format!(
            "total quantity {total} has more than {precision} decimal places"
        )));
    }

    let count = Decimal::from(slice_count);
    let base = (total / count).round_dp_with_strategy(precision, RoundingStrategy::ToZero);
    if base.is_zero() {
        return Err(Error::InvalidPlan(format!(
            "{total} is too small to split into {slice_count} slices at {precision} decimal places; \
             reduce the slice count"
        )));
    }

    let remainder = total - base * count;
    let mut slices = vec![base; slice_count as usize];
    if let Some(last) = slices.last_mut() {
        *last = (base + remainder).round_dp(precision);
    }
    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn remainder_lands_on_last_slice() {
        let slices = slice_quantity(dec!(1.0000), 3, 4).unwrap();
        assert_eq!(slices, vec![dec!(0.3333), dec!(0.3333), dec!(0.3334)]);
        assert_eq!(slices.iter().sum::<Decimal>(), dec!(1));
    }

    #[test]
    fn slice_count_is_capped() {
        assert!(matches!(
            slice_quantity(dec!(1000), u32::MAX, 18),
            Err(Error::InvalidPlan(_))
        ));
        assert!(matches!(
            slice_quantity(dec!(1000), MAX_SLICE_COUNT + 1, 18),
            Err(Error::InvalidPlan(_))
        ));
        assert_eq!(
            slice_quantity(dec!(1000), MAX_SLICE_COUNT, 18).unwrap().len(),
            MAX_SLICE_COUNT as usize
        );
    }

    #[test]
    fn even_split_has_no_remainder() {
        let slices = slice_quantity(dec!(0.003), 3, 3).unwrap();
        assert_eq!(slices, vec![dec!(0.001); 3]);
    }

    #[test]
    fn single_slice_is_the_whole_quantity() {
        assert_eq!(slice_quantity(dec!(2.5), 1, 1).unwrap(), vec![dec!(2.5)]);
    }

    #[test]
    fn many_slices_do_not_drift() {
        let slices = slice_quantity(dec!(10), 7, 8).unwrap();
        assert_eq!(slices.len(), 7);
        assert_eq!(slices.iter().sum::<Decimal>(), dec!(10));
        assert!(slices.iter().all(|q| *q > Decimal::ZERO));
    }

    #[test]
    fn zero_slices_is_invalid() {
        assert!(matches!(
            slice_quantity(dec!(1), 0, 4),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn zero_quantity_is_invalid() {
        assert!(matches!(
            slice_quantity(Decimal::ZERO, 3, 4),
            Err(Error::InvalidPlan(_))
        ));
        assert!(matches!(
            slice_quantity(dec!(-1), 3, 4),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn slice_rounding_to_zero_is_invalid() {
        // 0.002 / 3 truncates to 0.000 at three decimals
        assert!(matches!(
            slice_quantity(dec!(0.002), 3, 3),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn quantity_finer_than_precision_is_invalid() {
        assert!(matches!(
            slice_quantity(dec!(0.0031), 3, 3),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        assert!(slice_quantity(dec!(1.500000), 2, 1).is_ok());
    }
}
