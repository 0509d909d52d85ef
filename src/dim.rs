// 📅 DIM Correction - rebuild days-in-milk from dates
// Recorded DIM is mostly wrong at the start and end of a lactation, so it is
// re-derived from a trusted anchor in the middle of the group.

use crate::records::{sort_chronologically, MilkRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimMethod {
    /// No DIM at all: day offset from the first record
    Synthesized,
    /// Offsets from the middle non-missing record
    Anchored { anchor_row: usize },
    /// Anchoring produced too many negative values; recorded DIM kept
    Recorded { negatives: usize },
}

/// Correct DIM for one lactation group; records come back in date order
pub fn correct_group(mut group: Vec<MilkRecord>, max_negative: usize) -> (Vec<MilkRecord>, DimMethod) {
    sort_chronologically(&mut group);
    let Some(first) = group.first() else {
        return (group, DimMethod::Synthesized);
    };
    let first_date = first.date;

    let present: Vec<(usize, chrono::NaiveDate, i64)> = group
        .iter()
        .filter_map(|r| r.dim.map(|d| (r.row, r.date, d)))
        .collect();
    let Some(&(anchor_row, anchor_date, anchor_dim)) = present.get(present.len() / 2) else {
        for record in group.iter_mut() {
            record.dim = Some((record.date - first_date).num_days());
        }
        return (group, DimMethod::Synthesized);
    };

    let recomputed: Vec<i64> = group
        .iter()
        .map(|r| anchor_dim.saturating_add((r.date - anchor_date).num_days()))
        .collect();

    let negatives = recomputed.iter().filter(|&&d| d < 0).count();
    if negatives > max_negative {
        return (group, DimMethod::Recorded { negatives });
    }

    for (record, dim) in group.iter_mut().zip(recomputed) {
        record.dim = Some(dim);
    }
    (group, DimMethod::Anchored { anchor_row })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn create_test_group(dims: &[Option<i64>], day_steps: &[i64]) -> Vec<MilkRecord> {
        let mut date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        dims.iter()
            .enumerate()
            .map(|(i, &dim)| {
                if i > 0 {
                    date = date + Duration::days(day_steps[i - 1]);
                }
                MilkRecord {
                    row: i,
                    animal_id: "A1".to_string(),
                    parity: 2,
                    date,
                    dim,
                    milk_yield: Some(30.0),
                }
            })
            .collect()
    }

    #[test]
    fn test_all_missing_synthesizes_day_offsets() {
        let group = create_test_group(&[None, None, None, None], &[1, 3, 2]);

        let (corrected, method) = correct_group(group, 3);

        assert_eq!(method, DimMethod::Synthesized);
        let dims: Vec<Option<i64>> = corrected.iter().map(|r| r.dim).collect();
        assert_eq!(dims, vec![Some(0), Some(1), Some(4), Some(6)]);
    }

    #[test]
    fn test_anchor_fixes_edges() {
        // Wrong DIM at both ends, anchor in the middle (index 2 of 5) is 12
        let group = create_test_group(
            &[Some(0), Some(11), Some(12), Some(13), Some(99)],
            &[1, 1, 1, 1],
        );

        let (corrected, method) = correct_group(group, 3);

        assert_eq!(method, DimMethod::Anchored { anchor_row: 2 });
        let dims: Vec<Option<i64>> = corrected.iter().map(|r| r.dim).collect();
        assert_eq!(dims, vec![Some(10), Some(11), Some(12), Some(13), Some(14)]);
    }

    #[test]
    fn test_anchor_chosen_among_present_values() {
        // Present values at rows 0, 3, 4 -> middle is row 3 (DIM 7)
        let group = create_test_group(&[Some(1), None, None, Some(7), Some(8)], &[1, 1, 1, 1]);

        let (corrected, method) = correct_group(group, 3);

        assert_eq!(method, DimMethod::Anchored { anchor_row: 3 });
        assert_eq!(corrected[0].dim, Some(4));
        assert_eq!(corrected[1].dim, Some(5));
    }

    #[test]
    fn test_too_many_negatives_keeps_recorded() {
        // Anchor DIM 0 leaves four records before calving
        let group = create_test_group(
            &[Some(50), Some(51), Some(52), Some(53), Some(0), Some(1), Some(2), Some(3), Some(4)],
            &[1, 1, 1, 1, 1, 1, 1, 1],
        );

        let (corrected, method) = correct_group(group, 3);

        assert_eq!(method, DimMethod::Recorded { negatives: 4 });
        assert_eq!(corrected[0].dim, Some(50));
        assert_eq!(corrected[4].dim, Some(0));
    }

    #[test]
    fn test_three_negatives_tolerated() {
        let group = create_test_group(
            &[Some(50), Some(51), Some(52), Some(0), Some(1), Some(2), Some(3)],
            &[1, 1, 1, 1, 1, 1],
        );

        let (corrected, method) = correct_group(group, 3);

        assert_eq!(method, DimMethod::Anchored { anchor_row: 3 });
        assert_eq!(corrected[0].dim, Some(-3));
        assert_eq!(corrected[6].dim, Some(3));
    }

    #[test]
    fn test_anchor_offsets_saturate() {
        let group = create_test_group(&[Some(i64::MAX - 1), Some(i64::MAX), Some(i64::MAX)], &[1, 1]);

        let (corrected, method) = correct_group(group, 3);

        assert_eq!(method, DimMethod::Anchored { anchor_row: 1 });
        let dims: Vec<Option<i64>> = corrected.iter().map(|r| r.dim).collect();
        assert_eq!(dims, vec![Some(i64::MAX - 1), Some(i64::MAX), Some(i64::MAX)]);
    }
}
