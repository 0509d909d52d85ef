// Property checks for the cleaning and scaling invariants

use chrono::{Duration, NaiveDate};
use lactation_forecast::features::bin_labels;
use lactation_forecast::parity::correct_animal;
use lactation_forecast::{schema, CleaningConfig, FeatureConfig, MilkRecord, MinMaxScaler, ParityType};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const MIN_PROPTEST_CASES: u32 = 256;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

/// (days since previous record, recorded parity, recorded DIM)
fn animal_history_strategy() -> impl Strategy<Value = Vec<MilkRecord>> {
    prop::collection::vec((1i64..40, 1u32..5, prop::option::of(0i64..400)), 1..150).prop_map(|steps| {
        let mut date = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        steps
            .into_iter()
            .enumerate()
            .map(|(row, (gap, parity, dim))| {
                date += Duration::days(gap);
                MilkRecord {
                    row,
                    animal_id: "P1".to_string(),
                    parity,
                    date,
                    dim,
                    milk_yield: Some(25.0),
                }
            })
            .collect()
    })
}

fn parities(records: &[MilkRecord]) -> Vec<u32> {
    records.iter().map(|r| r.parity).collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        .. ProptestConfig::default()
    })]

    #[test]
    fn parity_correction_is_idempotent(records in animal_history_strategy()) {
        let config = CleaningConfig::default();
        let count = records.len();

        let (once, _) = correct_animal(records, &config);
        let (twice, _) = correct_animal(once.clone(), &config);

        prop_assert_eq!(once.len(), count);
        prop_assert_eq!(parities(&once), parities(&twice));
    }

    #[test]
    fn scaler_maps_training_range_into_feature_range(
        bounds in prop::collection::vec((-1000.0f64..1000.0, 0.1f64..500.0, 0.0f64..1.0), 1..12),
    ) {
        let names: Vec<String> = (0..bounds.len()).map(|i| format!("f{}", i)).collect();
        let data_min: Vec<f64> = bounds.iter().map(|(lo, _, _)| *lo).collect();
        let data_max: Vec<f64> = bounds.iter().map(|(lo, width, _)| lo + width).collect();
        let row: Vec<f64> = bounds.iter().map(|(lo, width, t)| lo + width * t).collect();
        let scaler = MinMaxScaler::new(names, data_min, data_max, (-1.0, 1.0)).unwrap();

        let first = scaler.transform(&row);
        let second = scaler.transform(&row);

        prop_assert_eq!(&first, &second);
        for value in first {
            prop_assert!((-1.0 - 1e-9..=1.0 + 1e-9).contains(&value));
        }
    }

    #[test]
    fn schema_width_follows_bin_count(bin_count in 1usize..12) {
        let config = FeatureConfig {
            bin_count,
            early_dim: bin_count as i64 * 10,
            ..FeatureConfig::default()
        };

        prop_assert_eq!(bin_labels(&config).len(), bin_count);
        prop_assert_eq!(schema(ParityType::Multiparous, &config).len(), bin_count + 23);
        prop_assert_eq!(schema(ParityType::Primiparous, &config).len(), bin_count + 10);
    }
}
