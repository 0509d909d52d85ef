// 🐄 Milk Records - raw upload table and typed daily records
// The raw table keeps every column as text; the validator turns it into MilkRecords.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

// ============================================================================
// RAW TABLE
// ============================================================================

/// Uploaded table exactly as read: header names plus string cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        RawTable { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a header, trimmed and case-insensitive
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    /// Cell text, empty when the row is short
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

/// Read a CSV upload into a RawTable
pub fn load_csv(csv_path: &Path) -> Result<RawTable> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    read_csv(file)
}

/// Read CSV text from any reader (header row required)
pub fn read_csv<R: Read>(reader: R) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", i))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

// ============================================================================
// PARITY TYPE
// ============================================================================

/// Which model family a lactation feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityType {
    Primiparous,
    Multiparous,
}

impl ParityType {
    pub fn from_parity(parity: u32) -> Self {
        if parity <= 1 {
            ParityType::Primiparous
        } else {
            ParityType::Multiparous
        }
    }

    /// Key used for artifact filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            ParityType::Primiparous => "primiparous",
            ParityType::Multiparous => "multiparous",
        }
    }
}

impl std::fmt::Display for ParityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MILK RECORD
// ============================================================================

/// Identifies one lactation: an animal and its (corrected) parity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LactationKey {
    pub animal_id: String,
    pub parity: u32,
}

impl LactationKey {
    pub fn new(animal_id: impl Into<String>, parity: u32) -> Self {
        LactationKey {
            animal_id: animal_id.into(),
            parity,
        }
    }

    /// The lactation before this one, if any
    pub fn previous(&self) -> Option<LactationKey> {
        if self.parity > 1 {
            Some(LactationKey::new(self.animal_id.clone(), self.parity - 1))
        } else {
            None
        }
    }

    pub fn parity_type(&self) -> ParityType {
        ParityType::from_parity(self.parity)
    }
}

impl std::fmt::Display for LactationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.animal_id, self.parity)
    }
}

/// One daily milking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilkRecord {
    /// 0-based position in the uploaded table
    pub row: usize,
    pub animal_id: String,
    pub parity: u32,
    pub date: NaiveDate,
    /// Days in milk; missing in the upload or unresolved by correction
    pub dim: Option<i64>,
    pub milk_yield: Option<f64>,
}

impl MilkRecord {
    pub fn key(&self) -> LactationKey {
        LactationKey::new(self.animal_id.clone(), self.parity)
    }
}

// ============================================================================
// GROUPING
// ============================================================================

/// Index records by lactation, each group in date order
pub fn group_by_lactation(records: &[MilkRecord]) -> BTreeMap<LactationKey, Vec<MilkRecord>> {
    let mut groups: BTreeMap<LactationKey, Vec<MilkRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.key()).or_default().push(record.clone());
    }
    for group in groups.values_mut() {
        sort_chronologically(group);
    }
    groups
}

/// Index records by animal, each group in date order
pub fn group_by_animal(records: &[MilkRecord]) -> BTreeMap<String, Vec<MilkRecord>> {
    let mut groups: BTreeMap<String, Vec<MilkRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.animal_id.clone())
            .or_default()
            .push(record.clone());
    }
    for group in groups.values_mut() {
        sort_chronologically(group);
    }
    groups
}

/// Stable sort by date, upload order breaking ties
pub fn sort_chronologically(records: &mut [MilkRecord]) {
    records.sort_by(|a, b| a.date.cmp(&b.date).then(a.row.cmp(&b.row)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record(row: usize, animal: &str, parity: u32, day: u32) -> MilkRecord {
        MilkRecord {
            row,
            animal_id: animal.to_string(),
            parity,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            dim: Some(day as i64),
            milk_yield: Some(30.0),
        }
    }

    #[test]
    fn test_read_csv_keeps_all_columns() {
        let csv = "Cow,DIM,Parity,Date,MilkTotal,Extra\nA1,5,2,2024-01-05,31.5,x\nA1,,2,2024-01-06,,y\n";
        let table = read_csv(csv.as_bytes()).unwrap();

        assert_eq!(table.headers.len(), 6);
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_index("milktotal"), Some(4));
        assert_eq!(table.cell(1, 1), "");
        assert_eq!(table.cell(0, 5), "x");
    }

    #[test]
    fn test_lactation_key_previous() {
        let key = LactationKey::new("A1", 3);
        assert_eq!(key.previous(), Some(LactationKey::new("A1", 2)));
        assert_eq!(LactationKey::new("A1", 1).previous(), None);
        assert_eq!(key.parity_type(), ParityType::Multiparous);
        assert_eq!(key.to_string(), "A1/3");
    }

    #[test]
    fn test_group_by_lactation_sorts_by_date() {
        let records = vec![
            create_test_record(0, "A1", 2, 3),
            create_test_record(1, "A1", 2, 1),
            create_test_record(2, "B7", 1, 2),
            create_test_record(3, "A1", 2, 2),
        ];

        let groups = group_by_lactation(&records);
        assert_eq!(groups.len(), 2);

        let a1 = &groups[&LactationKey::new("A1", 2)];
        let rows: Vec<usize> = a1.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![1, 3, 0]);
    }

    #[test]
    fn test_parity_type_names() {
        assert_eq!(ParityType::from_parity(1).as_str(), "primiparous");
        assert_eq!(ParityType::from_parity(4).as_str(), "multiparous");
    }
}
