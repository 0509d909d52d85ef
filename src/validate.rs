// 📐 Upload Validation - required columns, typed parsing, lactation eligibility
// Pure function of the uploaded table: fails fast on fatal problems,
// otherwise reports which lactations have enough data to continue.

use crate::config::ValidationConfig;
use crate::error::{PipelineError, Result};
use crate::records::{group_by_lactation, LactationKey, MilkRecord, RawTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// REQUIRED COLUMNS
// ============================================================================

/// Logical column names with the upload headers accepted for each
pub const REQUIRED_COLUMNS: [(&str, &[&str]); 5] = [
    ("animal_id", &["animal_id", "Cow"]),
    ("dim", &["dim"]),
    ("parity", &["parity"]),
    ("date", &["date"]),
    ("milk_yield", &["milk_yield", "MilkTotal"]),
];

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const REASON_EARLY_DENSITY: &str = "insufficient early-lactation density";
pub const REASON_PREVIOUS_DENSITY: &str = "insufficient previous-lactation density";

// ============================================================================
// ELIGIBILITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub animal_id: String,
    pub parity: u32,
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EligibilityDecision {
    fn eligible(key: &LactationKey) -> Self {
        EligibilityDecision {
            animal_id: key.animal_id.clone(),
            parity: key.parity,
            eligible: true,
            reason: None,
        }
    }

    fn ineligible(key: &LactationKey, reason: &str) -> Self {
        EligibilityDecision {
            animal_id: key.animal_id.clone(),
            parity: key.parity,
            eligible: false,
            reason: Some(reason.to_string()),
        }
    }

    pub fn key(&self) -> LactationKey {
        LactationKey::new(self.animal_id.clone(), self.parity)
    }
}

/// Output of validation: typed records plus one decision per lactation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedBatch {
    pub records: Vec<MilkRecord>,
    pub decisions: Vec<EligibilityDecision>,
}

impl ValidatedBatch {
    pub fn eligible_keys(&self) -> Vec<LactationKey> {
        self.decisions
            .iter()
            .filter(|d| d.eligible)
            .map(|d| d.key())
            .collect()
    }

    /// (animal_id, parity, reason) for every rejected lactation
    pub fn ineligible(&self) -> Vec<(String, u32, String)> {
        self.decisions
            .iter()
            .filter(|d| !d.eligible)
            .map(|d| {
                (
                    d.animal_id.clone(),
                    d.parity,
                    d.reason.clone().unwrap_or_default(),
                )
            })
            .collect()
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new() -> Self {
        Validator {
            config: ValidationConfig::default(),
        }
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Validator { config }
    }

    /// Check columns, parse every row and decide eligibility per lactation
    pub fn validate(&self, table: &RawTable) -> Result<ValidatedBatch> {
        let columns = resolve_columns(table)?;
        if table.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let records = parse_records(table, &columns)?;
        let decisions = self.decide_eligibility(&records);

        let eligible = decisions.iter().filter(|d| d.eligible).count();
        info!(
            records = records.len(),
            lactations = decisions.len(),
            eligible,
            "validated upload"
        );

        Ok(ValidatedBatch { records, decisions })
    }

    /// One decision per (animal, parity) present in the records
    pub fn decide_eligibility(&self, records: &[MilkRecord]) -> Vec<EligibilityDecision> {
        let groups = group_by_lactation(records);
        let totals: BTreeMap<&LactationKey, usize> =
            groups.iter().map(|(k, v)| (k, v.len())).collect();
        let (lo, hi) = self.config.early_window;

        groups
            .iter()
            .map(|(key, group)| {
                let early = group
                    .iter()
                    .filter(|r| matches!(r.dim, Some(d) if d >= lo && d <= hi))
                    .count();
                if early < self.config.min_early_records {
                    debug!(lactation = %key, early, "ineligible: early density");
                    return EligibilityDecision::ineligible(key, REASON_EARLY_DENSITY);
                }

                if let Some(previous) = key.previous() {
                    let previous_total = totals.get(&previous).copied().unwrap_or(0);
                    if previous_total < self.config.min_previous_records {
                        debug!(lactation = %key, previous_total, "ineligible: previous density");
                        return EligibilityDecision::ineligible(key, REASON_PREVIOUS_DENSITY);
                    }
                }

                EligibilityDecision::eligible(key)
            })
            .collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PARSING
// ============================================================================

struct ColumnMap {
    animal_id: usize,
    dim: usize,
    parity: usize,
    date: usize,
    milk_yield: usize,
}

/// Locate the required columns; everything else in the upload is ignored
fn resolve_columns(table: &RawTable) -> Result<ColumnMap> {
    let mut found = Vec::with_capacity(REQUIRED_COLUMNS.len());
    let mut missing = Vec::new();

    for (name, aliases) in REQUIRED_COLUMNS.iter() {
        match aliases.iter().find_map(|alias| table.column_index(alias)) {
            Some(index) => found.push(index),
            None => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::Schema { missing });
    }

    Ok(ColumnMap {
        animal_id: found[0],
        dim: found[1],
        parity: found[2],
        date: found[3],
        milk_yield: found[4],
    })
}

fn is_missing(text: &str) -> bool {
    text.is_empty()
        || text.eq_ignore_ascii_case("na")
        || text.eq_ignore_ascii_case("nan")
        || text.eq_ignore_ascii_case("null")
}

/// Integer text or integral float text ("12", "12.0")
fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
        _ => None,
    }
}

fn parse_records(table: &RawTable, columns: &ColumnMap) -> Result<Vec<MilkRecord>> {
    let mut bad_dates = Vec::new();
    let mut dates = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        match NaiveDate::parse_from_str(table.cell(row, columns.date), DATE_FORMAT) {
            Ok(date) => dates.push(date),
            Err(_) => bad_dates.push(row),
        }
    }
    if !bad_dates.is_empty() {
        return Err(PipelineError::DateParse { rows: bad_dates });
    }

    let mut bad_parity = Vec::new();
    let mut bad_dim = Vec::new();
    let mut bad_yield = Vec::new();
    let mut bad_animal = Vec::new();
    let mut records = Vec::with_capacity(table.len());

    for (row, date) in dates.into_iter().enumerate() {
        let animal_id = table.cell(row, columns.animal_id);
        if animal_id.is_empty() {
            bad_animal.push(row);
        }

        let parity = match parse_integer(table.cell(row, columns.parity)) {
            Some(p) if p >= 1 && p <= u32::MAX as i64 => p as u32,
            _ => {
                bad_parity.push(row);
                0
            }
        };

        let dim_text = table.cell(row, columns.dim);
        let dim = if is_missing(dim_text) {
            None
        } else {
            let parsed = parse_integer(dim_text);
            if parsed.is_none() {
                bad_dim.push(row);
            }
            parsed
        };

        let yield_text = table.cell(row, columns.milk_yield);
        let milk_yield = if is_missing(yield_text) {
            None
        } else {
            match yield_text.parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => {
                    bad_yield.push(row);
                    None
                }
            }
        };

        records.push(MilkRecord {
            row,
            animal_id: animal_id.to_string(),
            parity,
            date,
            dim,
            milk_yield,
        });
    }

    for (column, rows) in [
        ("animal_id", bad_animal),
        ("parity", bad_parity),
        ("dim", bad_dim),
        ("milk_yield", bad_yield),
    ] {
        if !rows.is_empty() {
            return Err(PipelineError::ValueParse {
                column: column.to_string(),
                rows,
            });
        }
    }

    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table(rows: Vec<Vec<&str>>) -> RawTable {
        RawTable::new(
            vec!["animal_id", "dim", "parity", "date", "milk_yield"]
                .into_iter()
                .map(String::from)
                .collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        )
    }

    /// `count` daily records starting at `first_dim`
    fn create_test_lactation(animal: &str, parity: u32, first_dim: i64, count: usize) -> Vec<MilkRecord> {
        let start = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        (0..count)
            .map(|i| MilkRecord {
                row: i,
                animal_id: animal.to_string(),
                parity,
                date: start + chrono::Duration::days(i as i64),
                dim: Some(first_dim + i as i64),
                milk_yield: Some(30.0),
            })
            .collect()
    }

    #[test]
    fn test_missing_columns_reported() {
        let table = RawTable::new(
            vec!["Cow".to_string(), "Date".to_string(), "Other".to_string()],
            vec![],
        );

        match Validator::new().validate(&table) {
            Err(PipelineError::Schema { missing }) => {
                assert_eq!(missing, vec!["dim", "parity", "milk_yield"]);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_original_headers_accepted_and_extra_dropped() {
        let table = RawTable::new(
            vec!["Cow", "DIM", "Parity", "Date", "MilkTotal", "Notes"]
                .into_iter()
                .map(String::from)
                .collect(),
            vec![vec!["A1", "5", "2", "2024-01-05", "31.5", "ignored"]
                .into_iter()
                .map(String::from)
                .collect()],
        );

        let batch = Validator::new().validate(&table).unwrap();
        assert_eq!(batch.records.len(), 1);
        let record = &batch.records[0];
        assert_eq!(record.animal_id, "A1");
        assert_eq!(record.dim, Some(5));
        assert_eq!(record.parity, 2);
        assert_eq!(record.milk_yield, Some(31.5));
    }

    #[test]
    fn test_bad_dates_fail_with_row_indices() {
        let table = create_test_table(vec![
            vec!["A1", "1", "1", "2024-01-01", "20"],
            vec!["A1", "2", "1", "01/02/2024", "20"],
            vec!["A1", "3", "1", "2024-01-03", "20"],
            vec!["A1", "4", "1", "not a date", "20"],
        ]);

        match Validator::new().validate(&table) {
            Err(PipelineError::DateParse { rows }) => assert_eq!(rows, vec![1, 3]),
            other => panic!("expected date error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_values_parsed_as_none() {
        let table = create_test_table(vec![
            vec!["A1", "", "1", "2024-01-01", "NaN"],
            vec!["A1", "12.0", "1", "2024-01-02", ""],
        ]);

        let batch = Validator::new().validate(&table).unwrap();
        assert_eq!(batch.records[0].dim, None);
        assert_eq!(batch.records[0].milk_yield, None);
        assert_eq!(batch.records[1].dim, Some(12));
    }

    #[test]
    fn test_non_numeric_parity_rejected() {
        let table = create_test_table(vec![
            vec!["A1", "1", "one", "2024-01-01", "20"],
            vec!["A1", "2", "0", "2024-01-02", "20"],
        ]);

        match Validator::new().validate(&table) {
            Err(PipelineError::ValueParse { column, rows }) => {
                assert_eq!(column, "parity");
                assert_eq!(rows, vec![0, 1]);
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_table_rejected() {
        let table = create_test_table(vec![]);
        assert!(matches!(
            Validator::new().validate(&table),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn test_eligibility_boundary_at_fifty() {
        let validator = Validator::new();

        // DIM 11..=60 is 50 records inside [0, 60]
        let fifty = create_test_lactation("A1", 1, 11, 50);
        let decisions = validator.decide_eligibility(&fifty);
        assert!(decisions[0].eligible);

        // DIM 12..=60 plus one record outside the window is 49 inside
        let forty_nine = create_test_lactation("A1", 1, 12, 50);
        let decisions = validator.decide_eligibility(&forty_nine);
        assert!(!decisions[0].eligible);
        assert_eq!(decisions[0].reason.as_deref(), Some(REASON_EARLY_DENSITY));
    }

    #[test]
    fn test_previous_lactation_density() {
        let validator = Validator::new();

        let mut records = create_test_lactation("A1", 1, 0, 99);
        records.extend(create_test_lactation("A1", 2, 0, 70));
        records.extend(create_test_lactation("B2", 1, 0, 100));
        records.extend(create_test_lactation("B2", 2, 0, 70));
        records.extend(create_test_lactation("C3", 3, 0, 70));

        let decisions = validator.decide_eligibility(&records);
        let find = |animal: &str, parity: u32| {
            decisions
                .iter()
                .find(|d| d.animal_id == animal && d.parity == parity)
                .unwrap()
                .clone()
        };

        assert!(!find("A1", 2).eligible);
        assert_eq!(find("A1", 2).reason.as_deref(), Some(REASON_PREVIOUS_DENSITY));
        assert!(find("B2", 2).eligible);
        assert!(!find("C3", 3).eligible);
        assert!(find("A1", 1).eligible);
    }

    #[test]
    fn test_batch_lists_eligible_and_ineligible() {
        let validator = Validator::new();
        let mut records = create_test_lactation("A1", 1, 0, 60);
        records.extend(create_test_lactation("B2", 1, 100, 60));

        let batch = ValidatedBatch {
            decisions: validator.decide_eligibility(&records),
            records,
        };

        assert_eq!(batch.eligible_keys(), vec![LactationKey::new("A1", 1)]);
        let ineligible = batch.ineligible();
        assert_eq!(ineligible.len(), 1);
        assert_eq!(ineligible[0].0, "B2");
        assert_eq!(ineligible[0].2, REASON_EARLY_DENSITY);
    }
}
