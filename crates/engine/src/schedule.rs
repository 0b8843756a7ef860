use std::time::Duration;

/// Dispatch offsets from run start, one per slice:
/// `offset[i] = total_duration * i / slice_count`.
///
/// The first slice always fires at zero. A zero duration yields all-zero
/// offsets, i.e. every slice goes out back-to-back.
pub fn schedule_offsets(total_duration: Duration, slice_count: u32) -> Vec<Duration> {
    if slice_count == 0 {
        return Vec::new();
    }
    let total_nanos = total_duration.as_nanos();
    let count = u128::from(slice_count);

    (0..slice_count)
        .map(|i| {
            let nanos = total_nanos * u128::from(i) / count;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_seconds_four_slices() {
        let offsets = schedule_offsets(Duration::from_secs(60), 4);
        let secs: Vec<u64> = offsets.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![0, 15, 30, 45]);
    }

    #[test]
    fn zero_duration_fires_everything_at_once() {
        let offsets = schedule_offsets(Duration::ZERO, 5);
        assert_eq!(offsets, vec![Duration::ZERO; 5]);
    }

    #[test]
    fn uneven_spacing_stays_exact() {
        let offsets = schedule_offsets(Duration::from_secs(10), 3);
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_nanos(3_333_333_333));
        assert_eq!(offsets[2], Duration::from_nanos(6_666_666_666));
    }

    #[test]
    fn single_slice_fires_immediately() {
        assert_eq!(
            schedule_offsets(Duration::from_secs(300), 1),
            vec![Duration::ZERO]
        );
    }
}
