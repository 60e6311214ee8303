use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::attendance::{self, classify, format_percentage};
use crate::error::{AppError, Result};
use crate::models::{AttendanceRecord, AttendanceStats, Student, StudentBreakdown, Year};

/// Everything the student lookup shows, rebuilt from the fetched records.
#[derive(Debug)]
pub struct StudentView<'a> {
    pub student: &'a Student,
    pub overall: AttendanceStats,
    pub dates: Vec<NaiveDate>,
    pub selected: Option<(NaiveDate, Vec<&'a AttendanceRecord>)>,
}

impl<'a> StudentView<'a> {
    /// `date` picks the day to expand; defaults to the most recent one.
    pub fn build(
        student: &'a Student,
        records: &'a [AttendanceRecord],
        date: Option<NaiveDate>,
    ) -> Self {
        let grouped = attendance::group_by_date(records);
        let dates = grouped.iter().map(|(day, _)| *day).collect();
        let selected = match date {
            Some(wanted) => grouped.into_iter().find(|(day, _)| *day == wanted),
            None => grouped.into_iter().next(),
        };

        StudentView {
            student,
            overall: attendance::overall_stats(records),
            dates,
            selected,
        }
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        let overall = self.overall;
        let standing = if overall.percentage >= 75 {
            "on track"
        } else {
            "below 75%"
        };

        let _ = writeln!(output, "{} (Roll No: {})", self.student.name, self.student.roll_no);
        let _ = writeln!(
            output,
            "Overall attendance: {}% ({}/{} classes, {})",
            overall.percentage, overall.present, overall.total, standing
        );

        if self.dates.is_empty() {
            let _ = writeln!(output, "No attendance records found for this student.");
            return output;
        }

        let listed: Vec<String> = self.dates.iter().map(NaiveDate::to_string).collect();
        let _ = writeln!(output, "Dates on record: {}", listed.join(", "));

        match &self.selected {
            None => {
                let _ = writeln!(output, "No attendance recorded on the requested date.");
            }
            Some((day, records)) => {
                let daily = attendance::daily_stats(records);
                let _ = writeln!(output);
                let _ = writeln!(output, "Daily attendance for {}", day.format("%A, %B %-d, %Y"));
                for record in records {
                    let _ = writeln!(output, "- {}: {}", record.subject, record.status);
                }
                let _ = writeln!(
                    output,
                    "Attended {} of {} classes ({}%)",
                    daily.present, daily.total, daily.percentage
                );
            }
        }

        output
    }
}

/// Sorted union of subjects across the given students.
pub fn subject_columns(rows: &[&StudentBreakdown]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.subjects.keys().cloned())
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Breakdown rows for one year, in the order they were computed.
pub fn rows_for_year(breakdown: &[StudentBreakdown], year: Year) -> Vec<&StudentBreakdown> {
    breakdown.iter().filter(|row| row.year == year).collect()
}

fn subject_cell(row: &StudentBreakdown, subject: &str) -> Option<String> {
    row.subjects
        .get(subject)
        .map(|stats| format_percentage(stats.percentage))
}

pub fn render_analytics(year: Year, rows: &[&StudentBreakdown]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Attendance analytics for Year {year}");

    if rows.is_empty() {
        let _ = writeln!(output, "No students found for Year {year}");
        return output;
    }

    let subjects = subject_columns(rows);
    let mut header = vec!["Roll No".to_string(), "Name".to_string()];
    header.extend(subjects.iter().cloned());
    header.push("Overall %".to_string());
    header.push("Standing".to_string());
    let _ = writeln!(output, "{}", header.join(" | "));

    for row in rows {
        let mut cells = vec![row.roll_no.clone(), row.name.clone()];
        for subject in &subjects {
            cells.push(subject_cell(row, subject).unwrap_or_else(|| "-".to_string()));
        }
        cells.push(format_percentage(row.overall_percentage));
        cells.push(classify(row.overall_percentage).to_string());
        let _ = writeln!(output, "{}", cells.join(" | "));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Standing: good >= 75%, fair 50% - 74%, low < 50%");
    output
}

/// CSV with the same values the analytics table shows.
pub fn analytics_csv(rows: &[&StudentBreakdown]) -> Result<String> {
    let subjects = subject_columns(rows);
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["Roll No".to_string(), "Name".to_string(), "Year".to_string()];
    header.extend(subjects.iter().cloned());
    header.push("Overall %".to_string());
    writer.write_record(&header).map_err(std::io::Error::from)?;

    for row in rows {
        let mut record = vec![row.roll_no.clone(), row.name.clone(), row.year.to_string()];
        for subject in &subjects {
            record.push(subject_cell(row, subject).unwrap_or_default());
        }
        record.push(format_percentage(row.overall_percentage));
        writer.write_record(&record).map_err(std::io::Error::from)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    String::from_utf8(bytes).map_err(|err| AppError::validation(err.to_string()))
}

pub fn export_file_name(year: Year, today: NaiveDate) -> String {
    format!("attendance-year{year}-{}.csv", today.format("%Y-%m-%d"))
}

pub fn write_export(
    dir: &Path,
    year: Year,
    today: NaiveDate,
    rows: &[&StudentBreakdown],
) -> Result<PathBuf> {
    let path = dir.join(export_file_name(year, today));
    let contents = analytics_csv(rows)?;
    std::fs::write(&path, contents)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::subject_breakdown;
    use crate::models::{AttendanceMark, Status};
    use chrono::Utc;
    use uuid::Uuid;

    fn student(roll_no: &str, name: &str, year: i64) -> Student {
        Student {
            id: Uuid::new_v4(),
            roll_no: roll_no.to_string(),
            name: name.to_string(),
            year: Year::new(year).unwrap(),
            created_at: Utc::now(),
        }
    }

    fn marks(roll_no: &str, subject: &str, present: usize, absent: usize) -> Vec<AttendanceMark> {
        let mark = |status| AttendanceMark {
            roll_no: roll_no.to_string(),
            subject: subject.to_string(),
            status,
        };
        let mut all: Vec<AttendanceMark> = (0..present).map(|_| mark(Status::Present)).collect();
        all.extend((0..absent).map(|_| mark(Status::Absent)));
        all
    }

    fn sample() -> Vec<StudentBreakdown> {
        let students = vec![
            student("21A91A01A1", "Doe, John", 1),
            student("21A91A01A2", "Jane Smith", 1),
            student("22A91A01A1", "Kiara Patel", 2),
        ];
        let mut all = marks("21A91A01A1", "Maths", 2, 0);
        all.extend(marks("21A91A01A1", "Physics", 1, 3));
        all.extend(marks("21A91A01A2", "Maths", 1, 2));
        all.extend(marks("21A91A01A2", "Physics", 2, 0));
        all.extend(marks("22A91A01A1", "Python Programming", 1, 0));
        subject_breakdown(&students, &all)
    }

    #[test]
    fn export_round_trips_displayed_values() {
        let breakdown = sample();
        let year = Year::new(1).unwrap();
        let rows = rows_for_year(&breakdown, year);
        let table = render_analytics(year, &rows);
        let csv_text = analytics_csv(&rows).unwrap();

        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, ["Roll No", "Name", "Year", "Maths", "Physics", "Overall %"]);

        let parsed: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(parsed.len(), rows.len());
        for (record, row) in parsed.iter().zip(&rows) {
            assert_eq!(&record[0], row.roll_no);
            assert_eq!(&record[1], row.name);
            assert_eq!(&record[3], format_percentage(row.subjects["Maths"].percentage));
            assert_eq!(&record[5], format_percentage(row.overall_percentage));
            let shown = format!(
                "{} | {} | {} | {} | {}",
                &record[0], &record[1], &record[3], &record[4], &record[5]
            );
            assert!(table.contains(&shown), "table is missing {shown}");
        }
        assert_eq!(&parsed[0][5], "62.5");
        assert_eq!(&parsed[1][3], "33.3");
    }

    #[test]
    fn missing_subjects_show_as_blank() {
        let students = vec![student("A1", "Avery", 3), student("A2", "Jules", 3)];
        let mut all = marks("A1", "Computer Networks", 1, 0);
        all.extend(marks("A2", "NPTEL", 0, 1));
        let breakdown = subject_breakdown(&students, &all);
        let year = Year::new(3).unwrap();
        let rows = rows_for_year(&breakdown, year);

        let csv_text = analytics_csv(&rows).unwrap();
        let lines: Vec<&str> = csv_text.lines().collect();
        assert_eq!(lines[1], "A1,Avery,3,100.0,,100.0");
        assert_eq!(lines[2], "A2,Jules,3,,0.0,0.0");
        assert!(render_analytics(year, &rows).contains("A1 | Avery | 100.0 | - | 100.0 | good"));
    }

    #[test]
    fn export_name_embeds_year_and_date() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        assert_eq!(
            export_file_name(Year::new(2).unwrap(), today),
            "attendance-year2-2026-02-02.csv"
        );

        let dir = tempfile::tempdir().unwrap();
        let breakdown = sample();
        let rows = rows_for_year(&breakdown, Year::new(2).unwrap());
        let path = write_export(dir.path(), Year::new(2).unwrap(), today, &rows).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("Roll No,Name,Year"));
    }

    #[test]
    fn student_view_defaults_to_latest_date() {
        let avery = student("21A91A01A1", "Avery Lee", 1);
        let day = |d| NaiveDate::from_ymd_opt(2025, 10, d).unwrap();
        let record = |date, subject: &str, status| AttendanceRecord {
            id: Uuid::new_v4(),
            roll_no: avery.roll_no.clone(),
            date,
            subject: subject.to_string(),
            status,
            year: Some(1),
            created_by: None,
            created_at: Utc::now(),
        };
        let records = vec![
            record(day(28), "Maths", Status::Present),
            record(day(28), "Physics", Status::Absent),
            record(day(27), "Maths", Status::Present),
        ];

        let view = StudentView::build(&avery, &records, None);
        assert_eq!(view.overall.percentage, 67);
        assert_eq!(view.dates, vec![day(28), day(27)]);
        let text = view.render();
        assert!(text.contains("Overall attendance: 67% (2/3 classes, below 75%)"));
        assert!(text.contains("Attended 1 of 2 classes (50%)"));

        let earlier = StudentView::build(&avery, &records, Some(day(27)));
        assert!(earlier.render().contains("Attended 1 of 1 classes (100%)"));
    }

    #[test]
    fn student_without_records() {
        let avery = student("21A91A01A1", "Avery Lee", 1);
        let view = StudentView::build(&avery, &[], None);
        assert_eq!(view.overall, AttendanceStats::default());
        assert!(view
            .render()
            .contains("No attendance records found for this student."));
    }
}
