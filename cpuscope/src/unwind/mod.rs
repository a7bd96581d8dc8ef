//! # Unwind Tables
//!
//! In-memory form of the per-process unwind table handed to the sampler.
//!
//! A table maps instruction pointer ranges to the rules needed to recover the
//! caller's frame: where the Call Frame Address (CFA) is, and where the
//! previous frame pointer was saved relative to it. Rows are kept in
//! ascending `location` order because the sampler binary-searches them.
//!
//! Tables are computed elsewhere (by a DWARF CFI analyzer) and are only
//! encoded and installed here. Rules coming from `gimli` convert directly:
//!
//! ```
//! use cpuscope::unwind::CfaRule;
//!
//! let rule: gimli::CfaRule<usize> =
//!     gimli::CfaRule::RegisterAndOffset { register: gimli::X86_64::RSP, offset: 8 };
//! assert_eq!(CfaRule::from(&rule), CfaRule::ByRegisterOffset { register: 7, offset: 8 });
//! ```

use serde::{Deserialize, Serialize};

/// How to compute the Call Frame Address for a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CfaRule {
    /// CFA = value of `register` + `offset`
    ByRegisterOffset { register: u64, offset: i64 },

    /// CFA is given by a DWARF expression
    ///
    /// Expressions have no wire encoding yet; the sampler receives a sentinel
    /// pair and special-cases the row. Real support will be a new variant.
    ByExpression,
}

impl<T: gimli::ReaderOffset> From<&gimli::CfaRule<T>> for CfaRule {
    fn from(rule: &gimli::CfaRule<T>) -> Self {
        match rule {
            gimli::CfaRule::RegisterAndOffset { register, offset } => {
                CfaRule::ByRegisterOffset { register: u64::from(register.0), offset: *offset }
            }
            gimli::CfaRule::Expression(_) => CfaRule::ByExpression,
        }
    }
}

/// One row of an unwind table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// First instruction pointer this row applies to
    pub location: u64,

    /// Rule for the Call Frame Address
    pub cfa: CfaRule,

    /// Where `$rbp` was saved, relative to the CFA
    pub frame_pointer_offset: i64,
}

impl Row {
    pub fn new(location: u64, cfa: CfaRule, frame_pointer_offset: i64) -> Self {
        Self { location, cfa, frame_pointer_offset }
    }
}

/// Unwind table for one process, sorted by `location`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Row>", into = "Vec<Row>")]
pub struct UnwindTable {
    rows: Vec<Row>,
}

impl UnwindTable {
    /// Build a table, ordering rows by location
    ///
    /// The sort is stable, so rows sharing a location keep their input order.
    pub fn new(mut rows: Vec<Row>) -> Self {
        rows.sort_by_key(|row| row.location);
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl From<Vec<Row>> for UnwindTable {
    fn from(rows: Vec<Row>) -> Self {
        UnwindTable::new(rows)
    }
}

impl From<UnwindTable> for Vec<Row> {
    fn from(table: UnwindTable) -> Self {
        table.rows
    }
}

impl<'a> IntoIterator for &'a UnwindTable {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(location: u64) -> Row {
        Row::new(location, CfaRule::ByRegisterOffset { register: 7, offset: 8 }, 0)
    }

    #[test]
    fn test_rows_sorted_on_construction() {
        let table = UnwindTable::new(vec![reg(0x30), reg(0x10), reg(0x20)]);
        let locations: Vec<u64> = table.iter().map(|r| r.location).collect();
        assert_eq!(locations, vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_gimli_rules() {
        let rule: gimli::CfaRule<usize> =
            gimli::CfaRule::RegisterAndOffset { register: gimli::Register(6), offset: 16 };
        assert_eq!(CfaRule::from(&rule), CfaRule::ByRegisterOffset { register: 6, offset: 16 });
    }

    #[test]
    fn test_json_input_is_sorted() {
        let json = r#"[
            {"location": 4112, "cfa": {"rule": "by_expression"}, "frame_pointer_offset": -16},
            {"location": 4096, "cfa": {"rule": "by_register_offset", "register": 6, "offset": 16}, "frame_pointer_offset": -8}
        ]"#;
        let table: UnwindTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].location, 0x1000);
        assert_eq!(table.rows()[1].cfa, CfaRule::ByExpression);
    }
}
