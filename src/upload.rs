//! Bulk upload parsing for student and attendance files.
//!
//! Files are read into header-keyed rows first (CSV via `csv`, spreadsheets
//! via `calamine`), then validated as a whole. A file that fails validation
//! is rejected before anything reaches the record store.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{NewAttendanceRecord, NewStudent, Status, Year};

const ROLL_COLUMNS: &[&str] = &["rollno", "roll_no"];
const NAME_COLUMNS: &[&str] = &["name"];
const YEAR_COLUMNS: &[&str] = &["year"];
const DATE_COLUMNS: &[&str] = &["date"];
const SUBJECT_COLUMNS: &[&str] = &["subject"];
const STATUS_COLUMNS: &[&str] = &["status"];

const ATTENDANCE_FORMAT_ERROR: &str =
    "Invalid file format. Ensure all rows have RollNo, Date, Subject, and Status columns.";

/// Rows of the first sheet keyed by lowercased, trimmed header. Cell values
/// are kept as written.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<HashMap<String, String>>,
}

impl Table {
    fn from_parts(headers: Vec<String>, raw_rows: Vec<Vec<String>>) -> Self {
        let rows = raw_rows
            .into_iter()
            .filter(|cells| cells.iter().any(|cell| !cell.trim().is_empty()))
            .map(|cells| {
                headers
                    .iter()
                    .cloned()
                    .zip(cells.into_iter().chain(std::iter::repeat(String::new())))
                    .collect()
            })
            .collect();
        Table { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, synonyms: &[&str]) -> Option<String> {
        self.headers
            .iter()
            .find(|header| synonyms.contains(&header.as_str()))
            .cloned()
    }
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

pub fn read_table(path: &Path) -> Result<Table> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let table = match extension.as_str() {
        "csv" => {
            let file = std::fs::File::open(path).map_err(|err| {
                AppError::validation(format!("Failed to read file {}: {err}", path.display()))
            })?;
            read_csv(file)?
        }
        "xlsx" | "xls" | "xlsm" | "ods" => read_workbook(path)?,
        _ => {
            return Err(AppError::validation(format!(
                "Unsupported file type for {}; upload a CSV or Excel file",
                path.display()
            )))
        }
    };

    debug!(path = %path.display(), rows = table.len(), "read upload file");
    Ok(table)
}

pub fn read_csv<R: Read>(reader: R) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let parse_error = |err: csv::Error| AppError::validation(format!("Failed to parse file: {err}"));

    let headers: Vec<String> = reader
        .headers()
        .map_err(parse_error)?
        .iter()
        .map(normalize_header)
        .collect();

    let mut raw_rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_error)?;
        raw_rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table::from_parts(headers, raw_rows))
}

fn read_workbook(path: &Path) -> Result<Table> {
    let parse_error = |err: calamine::Error| {
        AppError::validation(format!(
            "Failed to parse file. Please ensure it is a valid Excel or CSV file: {err}"
        ))
    };

    let mut workbook = open_workbook_auto(path).map_err(parse_error)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::validation("File is empty"))?
        .map_err(parse_error)?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Table::default());
    };
    let headers = header_row
        .iter()
        .map(|cell| normalize_header(&cell_text(cell)))
        .collect();
    let raw_rows = rows
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    Ok(Table::from_parts(headers, raw_rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Float(value) if value.fract() == 0.0 => format!("{}", *value as i64),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

#[derive(Debug)]
pub struct StudentUpload {
    pub students: Vec<NewStudent>,
    pub skipped: usize,
}

/// Validates a student file. Rows with a blank roll number or name, or a
/// year outside 1..=4, are skipped; a blank year counts as year 1.
pub fn parse_students(table: &Table) -> Result<StudentUpload> {
    if table.is_empty() {
        return Err(AppError::validation("File is empty"));
    }

    let (Some(roll_col), Some(name_col)) =
        (table.column(ROLL_COLUMNS), table.column(NAME_COLUMNS))
    else {
        return Err(AppError::validation(
            "No valid students found. Ensure columns: RollNo, Name, Year",
        ));
    };
    let year_col = table.column(YEAR_COLUMNS);

    let mut students = Vec::new();
    let mut skipped = 0usize;
    let mut seen = HashSet::new();

    for row in &table.rows {
        let roll_no = row.get(&roll_col).map(String::as_str).unwrap_or_default();
        let name = row.get(&name_col).map(String::as_str).unwrap_or_default();
        let year_text = year_col
            .as_ref()
            .and_then(|col| row.get(col))
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
            .unwrap_or("1");

        let student = year_text
            .parse::<Year>()
            .and_then(|year| NewStudent::validated(roll_no, name, year));
        let Ok(student) = student else {
            skipped += 1;
            continue;
        };

        if !seen.insert(student.roll_no.clone()) {
            return Err(AppError::validation(format!(
                "Roll number {} appears more than once in the file",
                student.roll_no
            )));
        }
        students.push(student);
    }

    if students.is_empty() {
        return Err(AppError::validation(
            "No valid students found. Ensure columns: RollNo, Name, Year",
        ));
    }

    Ok(StudentUpload { students, skipped })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAttendance {
    pub roll_no: String,
    pub date: NaiveDate,
    pub subject: String,
    pub status: Status,
}

/// Validates an attendance file as a whole: any missing column, blank
/// cell, unparseable date or status other than exactly `Present`/`Absent`
/// rejects every row.
pub fn parse_attendance(table: &Table) -> Result<Vec<ParsedAttendance>> {
    if table.is_empty() {
        return Err(AppError::validation("File is empty"));
    }

    let columns = (
        table.column(ROLL_COLUMNS),
        table.column(DATE_COLUMNS),
        table.column(SUBJECT_COLUMNS),
        table.column(STATUS_COLUMNS),
    );
    let (Some(roll_col), Some(date_col), Some(subject_col), Some(status_col)) = columns else {
        return Err(AppError::validation(ATTENDANCE_FORMAT_ERROR));
    };

    let cell = |row: &HashMap<String, String>, col: &str| -> Result<String> {
        row.get(col)
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .ok_or_else(|| AppError::validation(ATTENDANCE_FORMAT_ERROR))
    };

    let mut records = Vec::with_capacity(table.len());
    for (index, row) in table.rows.iter().enumerate() {
        let roll_no = cell(row, roll_col.as_str())?;
        let date_text = cell(row, date_col.as_str())?;
        let subject = cell(row, subject_col.as_str())?;
        let status = cell(row, status_col.as_str())?.parse::<Status>()?;
        let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|_| {
            AppError::validation(format!(
                "Row {}: date {date_text:?} is not in YYYY-MM-DD format",
                index + 2
            ))
        })?;

        records.push(ParsedAttendance {
            roll_no,
            date,
            subject,
            status,
        });
    }

    Ok(records)
}

/// Attaches the acting user and each student's stored year.
pub fn stamp_attendance(
    parsed: Vec<ParsedAttendance>,
    years: &HashMap<String, Year>,
    created_by: Uuid,
) -> Vec<NewAttendanceRecord> {
    parsed
        .into_iter()
        .map(|row| NewAttendanceRecord {
            year: years.get(&row.roll_no).copied(),
            roll_no: row.roll_no,
            date: row.date,
            subject: row.subject,
            status: row.status,
            created_by: Some(created_by),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table(text: &str) -> Table {
        read_csv(text.as_bytes()).unwrap()
    }

    #[test]
    fn headers_match_case_insensitively() {
        let parsed = parse_students(&table("ROLLNO,name,YEAR\n21A91A01A1,John Doe,2\n")).unwrap();
        assert_eq!(parsed.students.len(), 1);
        assert_eq!(parsed.students[0].year, Year::new(2).unwrap());

        let parsed = parse_students(&table("roll_no,Name\n21A91A01A2,Jane Smith\n")).unwrap();
        assert_eq!(parsed.students[0].roll_no, "21A91A01A2");
        assert_eq!(parsed.students[0].year, Year::new(1).unwrap());
    }

    #[test]
    fn invalid_student_rows_are_skipped() {
        let parsed = parse_students(&table(
            "RollNo,Name,Year\nA1,Avery,1\n,Nameless,2\nA3,Kiara,9\nA4, ,3\nA5,Jules,4\n",
        ))
        .unwrap();
        assert_eq!(parsed.students.len(), 2);
        assert_eq!(parsed.skipped, 3);
    }

    #[test]
    fn student_file_without_roll_column_is_rejected() {
        let err = parse_students(&table("Name,Year\nAvery,1\n")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn duplicate_rolls_in_student_file_are_rejected() {
        let err = parse_students(&table("RollNo,Name,Year\nA1,Avery,1\nA1,Jules,1\n")).unwrap_err();
        assert!(err.to_string().contains("A1"));
    }

    #[test]
    fn attendance_file_parses() {
        let rows = parse_attendance(&table(
            "RollNo,Date,Subject,Status\n\
             21A91A01A1,2025-10-28,Maths,Present\n\
             21A91A01A1,2025-10-28,Physics,Absent\n",
        ))
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, Status::Absent);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2025, 10, 28).unwrap());
    }

    #[test]
    fn missing_status_column_rejects_file() {
        let err = parse_attendance(&table("RollNo,Date,Subject\nA1,2025-10-28,Maths\n")).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), ATTENDANCE_FORMAT_ERROR);
    }

    #[test]
    fn inexact_status_rejects_file() {
        for bad in ["present", "Late", "ABSENT"] {
            let text = format!(
                "RollNo,Date,Subject,Status\nA1,2025-10-28,Maths,Present\nA1,2025-10-28,Physics,{bad}\n"
            );
            let err = parse_attendance(&table(&text)).unwrap_err();
            assert!(err.is_validation(), "{bad} should be rejected");
        }
    }

    #[test]
    fn padded_status_rejects_file() {
        for bad in [" Present ", "Absent "] {
            let text = format!(
                "RollNo,Date,Subject,Status\nA1,2025-10-28,Maths,Present\nA1,2025-10-28,Physics,{bad}\n"
            );
            let err = parse_attendance(&table(&text)).unwrap_err();
            assert!(err.is_validation(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn padded_headers_still_match() {
        let rows = parse_attendance(&table(
            " RollNo , Date,Subject ,Status\nA1,2025-10-28,Maths,Absent\n",
        ))
        .unwrap();
        assert_eq!(rows[0].status, Status::Absent);
    }

    #[test]
    fn blank_cell_or_bad_date_rejects_file() {
        assert!(parse_attendance(&table(
            "RollNo,Date,Subject,Status\nA1,2025-10-28,,Present\n"
        ))
        .is_err());
        assert!(parse_attendance(&table(
            "RollNo,Date,Subject,Status\nA1,28/10/2025,Maths,Present\n"
        ))
        .is_err());
    }

    #[test]
    fn blank_rows_are_ignored() {
        let rows = parse_attendance(&table(
            "RollNo,Date,Subject,Status\nA1,2025-10-28,Maths,Present\n,,,\n",
        ))
        .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn stamping_fills_year_for_known_rolls() {
        let parsed = parse_attendance(&table(
            "RollNo,Date,Subject,Status\nA1,2025-10-28,Maths,Present\nZZ,2025-10-28,Maths,Absent\n",
        ))
        .unwrap();
        let years = HashMap::from([("A1".to_string(), Year::new(3).unwrap())]);
        let admin = Uuid::new_v4();

        let records = stamp_attendance(parsed, &years, admin);
        assert_eq!(records[0].year, Some(Year::new(3).unwrap()));
        assert_eq!(records[1].year, None);
        assert!(records.iter().all(|r| r.created_by == Some(admin)));
    }

    #[test]
    fn reads_csv_from_disk_and_rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "RollNo,Name,Year").unwrap();
        writeln!(file, "A1,Avery Lee,1").unwrap();
        drop(file);

        let table = read_table(&path).unwrap();
        assert_eq!(table.len(), 1);

        let other = dir.path().join("students.txt");
        std::fs::write(&other, "RollNo,Name,Year\n").unwrap();
        assert!(read_table(&other).unwrap_err().is_validation());
    }

    #[test]
    fn reads_dates_and_numeric_rolls_from_xlsx() {
        use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        for (col, header) in ["RollNo", "Date", "Subject", "Status"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        let date = ExcelDateTime::from_ymd(2025, 10, 28).unwrap();
        sheet.write_number(1, 0, 2101.0).unwrap();
        sheet.write_datetime_with_format(1, 1, &date, &date_format).unwrap();
        sheet.write_string(1, 2, "Maths").unwrap();
        sheet.write_string(1, 3, "Present").unwrap();
        sheet.write_string(2, 0, "21A91A01A1").unwrap();
        sheet.write_datetime_with_format(2, 1, &date, &date_format).unwrap();
        sheet.write_string(2, 2, "Physics").unwrap();
        sheet.write_string(2, 3, "Absent").unwrap();
        workbook.save(&path).unwrap();

        let rows = parse_attendance(&read_table(&path).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].roll_no, "2101");
        assert_eq!(rows[1].roll_no, "21A91A01A1");
        let expected = NaiveDate::from_ymd_opt(2025, 10, 28).unwrap();
        assert!(rows.iter().all(|row| row.date == expected));
        assert_eq!(rows[1].status, Status::Absent);
    }

    #[test]
    fn xlsx_status_is_not_trimmed() {
        use rust_xlsxwriter::Workbook;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, value) in ["RollNo", "Date", "Subject", "Status"].iter().enumerate() {
            sheet.write_string(0, col as u16, *value).unwrap();
        }
        for (col, value) in ["A1", "2025-10-28", "Maths", "Present "].iter().enumerate() {
            sheet.write_string(1, col as u16, *value).unwrap();
        }
        workbook.save(&path).unwrap();

        let err = parse_attendance(&read_table(&path).unwrap()).unwrap_err();
        assert!(err.is_validation());
    }
}
