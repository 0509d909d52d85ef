// 🔢 Parity Correction - recompute lactation numbers from calving gaps
// Recorded parity is unreliable. A long pause in milkings marks a calving;
// each segment between calvings gets the parity most often recorded in its
// reliable DIM window.

use crate::config::CleaningConfig;
use crate::records::{sort_chronologically, MilkRecord};
use crate::stats;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome for one segment of an animal's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCorrection {
    pub start_date: NaiveDate,
    pub records: usize,
    pub corrected_parity: u32,
    pub method: CorrectionMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionMethod {
    /// Mode of recorded parity within the reliable DIM window
    ReliableMode,
    /// Previous segment's parity + 1
    FollowsPrevious,
    /// No evidence at all, recorded parity left alone
    Unchanged,
}

/// Indices where a new lactation starts: gap to the previous record >= `gap_days`
pub fn calving_boundaries(dates: &[NaiveDate], gap_days: i64) -> Vec<usize> {
    dates
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| (pair[1] - pair[0]).num_days() >= gap_days)
        .map(|(i, _)| i + 1)
        .collect()
}

/// Correct parity for one animal's records
///
/// Records are returned in chronological order with every record of a
/// segment carrying that segment's corrected parity.
pub fn correct_animal(
    mut records: Vec<MilkRecord>,
    config: &CleaningConfig,
) -> (Vec<MilkRecord>, Vec<SegmentCorrection>) {
    sort_chronologically(&mut records);

    let dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
    let boundaries = calving_boundaries(&dates, config.calving_gap_days);

    let mut starts = vec![0];
    starts.extend(boundaries);
    let (lo, hi) = config.reliable_dim;

    let mut corrections = Vec::with_capacity(starts.len());
    let mut previous_parity: Option<u32> = None;

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(records.len());
        let segment = &mut records[start..end];
        if segment.is_empty() {
            continue;
        }

        let reliable: Vec<u32> = segment
            .iter()
            .filter(|r| matches!(r.dim, Some(d) if d > lo && d < hi))
            .map(|r| r.parity)
            .collect();

        let (method, parity) = match (stats::mode(&reliable), previous_parity) {
            (Some(mode), _) => (CorrectionMethod::ReliableMode, Some(mode)),
            (None, Some(prev)) => (CorrectionMethod::FollowsPrevious, Some(prev.saturating_add(1))),
            (None, None) => (CorrectionMethod::Unchanged, None),
        };

        if let Some(parity) = parity {
            for record in segment.iter_mut() {
                record.parity = parity;
            }
            previous_parity = Some(parity);
        }

        // An unchanged segment can still hold mixed labels; report the last one
        let segment_parity = parity.unwrap_or(segment[segment.len() - 1].parity);

        corrections.push(SegmentCorrection {
            start_date: segment[0].date,
            records: segment.len(),
            corrected_parity: segment_parity,
            method,
        });
    }

    if let Some(first) = records.first() {
        debug!(animal = %first.animal_id, segments = corrections.len(), "parity corrected");
    }

    (records, corrections)
}
