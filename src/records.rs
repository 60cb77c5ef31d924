use crate::store::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const ID_COLUMN: &str = "student id";
/// Name column spellings accepted in a loaded sheet, first match wins.
pub const NAME_COLUMNS: [&str; 2] = ["student name", "full_name"];
pub const CLASS_COLUMN: &str = "class";
pub const SUBJECT_COLUMNS: [&str; 5] = ["maths", "english", "physics", "chemistry", "biology"];
pub const TOTAL_COLUMN: &str = "total";
pub const AVERAGE_COLUMN: &str = "average";
pub const GRADE_COLUMN: &str = "grade";

const ARM_COLUMN: &str = "arm";
const GENDER_COLUMN: &str = "gender";
const DOB_COLUMNS: [&str; 2] = ["date of birth", "date_of_birth"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn letter(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

/// Step function over closed thresholds, highest band first. Boundary
/// values belong to the higher band: 70 is an A, 45 a D.
pub fn compute_grade(average: f64) -> Grade {
    if average >= 70.0 {
        Grade::A
    } else if average >= 60.0 {
        Grade::B
    } else if average >= 50.0 {
        Grade::C
    } else if average >= 45.0 {
        Grade::D
    } else {
        Grade::F
    }
}

/// Half-up rounding to 2 decimal places used for the average column:
/// `floor(100*x + 0.5) / 100`
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RecordError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }

    fn missing_column(column: &str) -> Self {
        Self::with_details(
            "missing_column",
            format!("sheet has no '{}' column", column),
            json!({ "column": column }),
        )
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    fn not_found(id: &str) -> Self {
        Self::new(
            "not_found",
            format!("no result found for student id '{}'", id.trim()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SubjectScores {
    pub maths: f64,
    pub english: f64,
    pub physics: f64,
    pub chemistry: f64,
    pub biology: f64,
}

impl SubjectScores {
    /// Ordered exactly as `SUBJECT_COLUMNS`.
    pub fn entries(self) -> [(&'static str, f64); 5] {
        [
            ("maths", self.maths),
            ("english", self.english),
            ("physics", self.physics),
            ("chemistry", self.chemistry),
            ("biology", self.biology),
        ]
    }

    pub fn validate(self) -> Result<(), RecordError> {
        for (name, value) in self.entries() {
            if !(0.0..=100.0).contains(&value) {
                return Err(RecordError::bad_params(format!(
                    "{} must be a number between 0 and 100",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn total(self) -> f64 {
        self.maths + self.english + self.physics + self.chemistry + self.biology
    }

    pub fn average(self) -> f64 {
        round2(self.total() / 5.0)
    }

    pub fn derived(self) -> DerivedFields {
        let total = self.total();
        let average = self.average();
        DerivedFields {
            total,
            average,
            grade: compute_grade(average),
        }
    }
}

/// Always recomputed from the five scores, never edited directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFields {
    pub total: f64,
    pub average: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub student_id: String,
    pub student_name: String,
    pub class: String,
    pub arm: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub scores: SubjectScores,
}

fn id_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// First row whose identifier matches after trimming and case folding.
/// A sheet without the identifier column is a schema error, which callers
/// must not collapse into "no matching row".
pub fn find_by_id<'a>(
    table: &'a Table,
    id: &str,
) -> Result<Option<(usize, &'a [String])>, RecordError> {
    let col = table
        .col_index(ID_COLUMN)
        .ok_or_else(|| RecordError::missing_column(ID_COLUMN))?;
    let key = id_key(id);
    for (idx, row) in table.rows.iter().enumerate() {
        if row.get(col).map(|cell| id_key(cell) == key).unwrap_or(false) {
            return Ok(Some((idx, row.as_slice())));
        }
    }
    Ok(None)
}

pub fn name_col_index(table: &Table) -> Option<usize> {
    NAME_COLUMNS.iter().find_map(|name| table.col_index(name))
}

/// Validates the record, computes the derived columns, and returns a new
/// table with one row appended. The identifier is stored verbatim; only
/// comparisons fold case and whitespace. With `allow_duplicate_ids` off,
/// an existing matching identifier rejects the add instead.
pub fn add_record(
    table: &Table,
    record: &NewRecord,
    allow_duplicate_ids: bool,
) -> Result<Table, RecordError> {
    if record.student_id.trim().is_empty() {
        return Err(RecordError::bad_params("student id must not be empty"));
    }
    if record.student_name.trim().is_empty() {
        return Err(RecordError::bad_params("student name must not be empty"));
    }
    if record.class.trim().is_empty() {
        return Err(RecordError::bad_params("class must not be empty"));
    }
    record.scores.validate()?;
    if let Some(dob) = record.date_of_birth.as_deref() {
        parse_birth_date(dob)?;
    }

    let id_col = table
        .col_index(ID_COLUMN)
        .ok_or_else(|| RecordError::missing_column(ID_COLUMN))?;
    let name_col = name_col_index(table).ok_or_else(|| RecordError::missing_column(NAME_COLUMNS[0]))?;
    let class_col = table
        .col_index(CLASS_COLUMN)
        .ok_or_else(|| RecordError::missing_column(CLASS_COLUMN))?;
    let subject_cols = subject_col_indexes(table)?;
    let (total_col, average_col, grade_col) = derived_col_indexes(table)?;

    if !allow_duplicate_ids && find_by_id(table, &record.student_id)?.is_some() {
        return Err(RecordError::with_details(
            "duplicate_id",
            format!(
                "a result for student id '{}' already exists",
                record.student_id.trim()
            ),
            json!({ "studentId": record.student_id }),
        ));
    }

    let derived = record.scores.derived();
    let mut row = vec![String::new(); table.columns.len()];
    row[id_col] = record.student_id.clone();
    row[name_col] = record.student_name.clone();
    row[class_col] = record.class.clone();
    for ((_, score), col) in record.scores.entries().into_iter().zip(subject_cols) {
        row[col] = fmt_number(score);
    }
    row[total_col] = fmt_number(derived.total);
    row[average_col] = fmt_number(derived.average);
    row[grade_col] = derived.grade.letter().to_string();
    set_optional(&mut row, table, &[ARM_COLUMN], record.arm.as_deref());
    set_optional(&mut row, table, &[GENDER_COLUMN], record.gender.as_deref());
    set_optional(&mut row, table, &DOB_COLUMNS, record.date_of_birth.as_deref());

    let mut next = table.clone();
    next.rows.push(row);
    Ok(next)
}

/// Rewrites the five score cells and the three derived cells of the first
/// matching row, leaving every profile cell untouched.
pub fn update_scores(
    table: &Table,
    id: &str,
    scores: SubjectScores,
) -> Result<Table, RecordError> {
    scores.validate()?;
    let subject_cols = subject_col_indexes(table)?;
    let (total_col, average_col, grade_col) = derived_col_indexes(table)?;
    let Some((row_idx, _)) = find_by_id(table, id)? else {
        return Err(RecordError::not_found(id));
    };

    let derived = scores.derived();
    let mut next = table.clone();
    let row = &mut next.rows[row_idx];
    for ((_, score), col) in scores.entries().into_iter().zip(subject_cols) {
        row[col] = fmt_number(score);
    }
    row[total_col] = fmt_number(derived.total);
    row[average_col] = fmt_number(derived.average);
    row[grade_col] = derived.grade.letter().to_string();
    Ok(next)
}

/// Removes every row whose identifier matches, case-insensitively, and
/// reports how many went. Zero removed is a valid outcome the caller
/// surfaces distinctly from a deletion.
pub fn delete_records(table: &Table, id: &str) -> Result<(Table, usize), RecordError> {
    let col = table
        .col_index(ID_COLUMN)
        .ok_or_else(|| RecordError::missing_column(ID_COLUMN))?;
    let key = id_key(id);
    let mut next = table.clone();
    let before = next.rows.len();
    next.rows
        .retain(|row| row.get(col).map(|cell| id_key(cell) != key).unwrap_or(true));
    let removed = before - next.rows.len();
    Ok((next, removed))
}

fn parse_birth_date(raw: &str) -> Result<NaiveDate, RecordError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        RecordError::bad_params(format!(
            "date of birth '{}' is not a valid YYYY-MM-DD date",
            raw.trim()
        ))
    })
}

fn subject_col_indexes(table: &Table) -> Result<[usize; 5], RecordError> {
    let mut out = [0usize; 5];
    for (slot, name) in out.iter_mut().zip(SUBJECT_COLUMNS) {
        *slot = table
            .col_index(name)
            .ok_or_else(|| RecordError::missing_column(name))?;
    }
    Ok(out)
}

fn derived_col_indexes(table: &Table) -> Result<(usize, usize, usize), RecordError> {
    let total = table
        .col_index(TOTAL_COLUMN)
        .ok_or_else(|| RecordError::missing_column(TOTAL_COLUMN))?;
    let average = table
        .col_index(AVERAGE_COLUMN)
        .ok_or_else(|| RecordError::missing_column(AVERAGE_COLUMN))?;
    let grade = table
        .col_index(GRADE_COLUMN)
        .ok_or_else(|| RecordError::missing_column(GRADE_COLUMN))?;
    Ok((total, average, grade))
}

/// Fills the first present column from `names`; a sheet without any of
/// them simply does not carry the field.
fn set_optional(row: &mut [String], table: &Table, names: &[&str], value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    for name in names {
        if let Some(col) = table.col_index(name) {
            row[col] = value.to_string();
            return;
        }
    }
}

/// Whole values print without a decimal point so integer sheets stay
/// integer on rewrite.
fn fmt_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CANONICAL_COLUMNS;

    fn canonical_table() -> Table {
        Table::empty_canonical()
    }

    fn scores(m: f64, e: f64, p: f64, c: f64, b: f64) -> SubjectScores {
        SubjectScores {
            maths: m,
            english: e,
            physics: p,
            chemistry: c,
            biology: b,
        }
    }

    fn record(id: &str, name: &str, class: &str, s: SubjectScores) -> NewRecord {
        NewRecord {
            student_id: id.to_string(),
            student_name: name.to_string(),
            class: class.to_string(),
            arm: None,
            gender: None,
            date_of_birth: None,
            scores: s,
        }
    }

    fn cell<'a>(table: &'a Table, row: usize, column: &str) -> &'a str {
        &table.rows[row][table.col_index(column).unwrap()]
    }

    #[test]
    fn grade_bands_are_closed_at_the_bottom() {
        assert_eq!(compute_grade(100.0), Grade::A);
        assert_eq!(compute_grade(70.0), Grade::A);
        assert_eq!(compute_grade(69.99), Grade::B);
        assert_eq!(compute_grade(60.0), Grade::B);
        assert_eq!(compute_grade(59.99), Grade::C);
        assert_eq!(compute_grade(50.0), Grade::C);
        assert_eq!(compute_grade(49.99), Grade::D);
        assert_eq!(compute_grade(45.0), Grade::D);
        assert_eq!(compute_grade(44.99), Grade::F);
        assert_eq!(compute_grade(0.0), Grade::F);
    }

    #[test]
    fn round2_is_half_up() {
        assert_eq!(round2(80.0), 80.0);
        assert_eq!(round2(3.544), 3.54);
        assert_eq!(round2(3.546), 3.55);
        assert_eq!(round2(35.6818), 35.68);
        assert_eq!(round2(33.4), 33.4);
    }

    #[test]
    fn derived_fields_recompute_from_scores() {
        let d = scores(80.0, 70.0, 60.0, 90.0, 100.0).derived();
        assert_eq!(d.total, 400.0);
        assert_eq!(d.average, 80.0);
        assert_eq!(d.grade, Grade::A);

        let d = scores(40.0, 40.0, 40.0, 40.0, 40.0).derived();
        assert_eq!(d.total, 200.0);
        assert_eq!(d.average, 40.0);
        assert_eq!(d.grade, Grade::F);
    }

    #[test]
    fn add_then_find_by_id_ignores_case_and_whitespace() {
        let table = canonical_table();
        let table = add_record(
            &table,
            &record("S001", "Ada", "JS1", scores(80.0, 70.0, 60.0, 90.0, 100.0)),
            true,
        )
        .unwrap();

        let (idx, row) = find_by_id(&table, "  s001 ").unwrap().expect("row exists");
        assert_eq!(idx, 0);
        assert_eq!(row[table.col_index(ID_COLUMN).unwrap()], "S001");
        assert_eq!(cell(&table, 0, TOTAL_COLUMN), "400");
        assert_eq!(cell(&table, 0, AVERAGE_COLUMN), "80");
        assert_eq!(cell(&table, 0, GRADE_COLUMN), "A");
    }

    #[test]
    fn add_rejects_blank_required_fields() {
        let table = canonical_table();
        let s = scores(10.0, 10.0, 10.0, 10.0, 10.0);
        for rec in [
            record("   ", "Ada", "JS1", s),
            record("S001", "", "JS1", s),
            record("S001", "Ada", " ", s),
        ] {
            let err = add_record(&table, &rec, true).unwrap_err();
            assert_eq!(err.code, "bad_params");
        }
    }

    #[test]
    fn add_rejects_scores_outside_the_domain() {
        let table = canonical_table();
        let err = add_record(
            &table,
            &record("S001", "Ada", "JS1", scores(101.0, 10.0, 10.0, 10.0, 10.0)),
            true,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad_params");
        assert!(err.message.contains("maths"));

        let err = add_record(
            &table,
            &record("S001", "Ada", "JS1", scores(10.0, 10.0, 10.0, 10.0, -1.0)),
            true,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad_params");
        assert!(err.message.contains("biology"));
    }

    #[test]
    fn duplicate_ids_append_by_default_and_reject_when_disallowed() {
        let table = canonical_table();
        let s = scores(50.0, 50.0, 50.0, 50.0, 50.0);
        let table = add_record(&table, &record("S001", "Ada", "JS1", s), true).unwrap();
        let table = add_record(&table, &record("s001", "Ada Again", "JS1", s), true).unwrap();
        assert_eq!(table.rows.len(), 2);

        let err = add_record(&table, &record(" S001 ", "Third", "JS1", s), false).unwrap_err();
        assert_eq!(err.code, "duplicate_id");
    }

    #[test]
    fn missing_columns_are_schema_errors_not_lookup_misses() {
        let table = Table {
            columns: vec!["student name".to_string(), "class".to_string()],
            rows: Vec::new(),
        };
        let err = find_by_id(&table, "S001").unwrap_err();
        assert_eq!(err.code, "missing_column");

        let mut no_total = canonical_table();
        let idx = no_total.col_index(TOTAL_COLUMN).unwrap();
        no_total.columns.remove(idx);
        let err = add_record(
            &no_total,
            &record("S001", "Ada", "JS1", scores(10.0, 10.0, 10.0, 10.0, 10.0)),
            true,
        )
        .unwrap_err();
        assert_eq!(err.code, "missing_column");
    }

    #[test]
    fn legacy_name_column_variant_is_accepted() {
        let mut table = canonical_table();
        let idx = table.col_index("student name").unwrap();
        table.columns[idx] = "full_name".to_string();
        let table = add_record(
            &table,
            &record("S001", "Ada", "JS1", scores(10.0, 10.0, 10.0, 10.0, 10.0)),
            true,
        )
        .unwrap();
        assert_eq!(cell(&table, 0, "full_name"), "Ada");
    }

    #[test]
    fn update_replaces_scores_and_derived_cells_only() {
        let mut columns: Vec<String> = CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.push("arm".to_string());
        let table = Table {
            columns,
            rows: Vec::new(),
        };
        let mut rec = record("S001", "Ada", "JS1", scores(80.0, 70.0, 60.0, 90.0, 100.0));
        rec.arm = Some("Blue".to_string());
        let table = add_record(&table, &rec, true).unwrap();

        let table = update_scores(&table, "s001", scores(40.0, 40.0, 40.0, 40.0, 40.0)).unwrap();
        assert_eq!(cell(&table, 0, TOTAL_COLUMN), "200");
        assert_eq!(cell(&table, 0, AVERAGE_COLUMN), "40");
        assert_eq!(cell(&table, 0, GRADE_COLUMN), "F");
        assert_eq!(cell(&table, 0, "student name"), "Ada");
        assert_eq!(cell(&table, 0, "class"), "JS1");
        assert_eq!(cell(&table, 0, "arm"), "Blue");
    }

    #[test]
    fn update_of_absent_id_is_not_found() {
        let table = canonical_table();
        let err = update_scores(&table, "S404", scores(10.0, 10.0, 10.0, 10.0, 10.0)).unwrap_err();
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn update_touches_only_the_first_matching_row() {
        let table = canonical_table();
        let s = scores(50.0, 50.0, 50.0, 50.0, 50.0);
        let table = add_record(&table, &record("S001", "Ada", "JS1", s), true).unwrap();
        let table = add_record(&table, &record("s001", "Ada Again", "JS1", s), true).unwrap();

        let table = update_scores(&table, "S001", scores(40.0, 40.0, 40.0, 40.0, 40.0)).unwrap();
        assert_eq!(cell(&table, 0, GRADE_COLUMN), "F");
        assert_eq!(cell(&table, 1, GRADE_COLUMN), "C");
    }

    #[test]
    fn delete_removes_every_matching_row() {
        let table = canonical_table();
        let s = scores(50.0, 50.0, 50.0, 50.0, 50.0);
        let table = add_record(&table, &record("S001", "Ada", "JS1", s), true).unwrap();
        let table = add_record(&table, &record("s001", "Ada Again", "JS1", s), true).unwrap();
        let table = add_record(&table, &record("S002", "Grace", "JS2", s), true).unwrap();

        let (table, removed) = delete_records(&table, "S001").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(cell(&table, 0, ID_COLUMN), "S002");
    }

    #[test]
    fn delete_of_absent_id_reports_zero_removed() {
        let table = canonical_table();
        let s = scores(50.0, 50.0, 50.0, 50.0, 50.0);
        let table = add_record(&table, &record("S001", "Ada", "JS1", s), true).unwrap();

        let (after, removed) = delete_records(&table, "S404").unwrap();
        assert_eq!(removed, 0);
        assert_eq!(after, table);
    }

    #[test]
    fn birth_dates_must_be_real_calendar_dates() {
        let table = canonical_table();
        let mut rec = record("S001", "Ada", "JS1", scores(10.0, 10.0, 10.0, 10.0, 10.0));
        rec.date_of_birth = Some("2010-02-31".to_string());
        let err = add_record(&table, &rec, true).unwrap_err();
        assert_eq!(err.code, "bad_params");

        rec.date_of_birth = Some("2010-02-01".to_string());
        assert!(add_record(&table, &rec, true).is_ok());
    }

    #[test]
    fn fractional_averages_are_preserved_in_cells() {
        let table = canonical_table();
        let table = add_record(
            &table,
            &record("S001", "Ada", "JS1", scores(33.0, 33.0, 33.0, 33.0, 34.0)),
            true,
        )
        .unwrap();
        assert_eq!(cell(&table, 0, TOTAL_COLUMN), "166");
        assert_eq!(cell(&table, 0, AVERAGE_COLUMN), "33.2");
    }
}
