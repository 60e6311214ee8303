use std::collections::HashSet;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{NewAttendanceRecord, Status, Student, Year};
use crate::subjects;

/// One class session for a year: which students, which subject, which day,
/// and who is marking it.
#[derive(Debug, Clone)]
pub struct ClassSession<'a> {
    pub year: Year,
    pub subject: &'a str,
    pub date: NaiveDate,
    pub created_by: Uuid,
}

/// Students of `year` narrowed by a case-insensitive roll/name search.
pub fn filter_students<'a>(students: &'a [Student], year: Year, search: Option<&str>) -> Vec<&'a Student> {
    let term = search
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase);

    students
        .iter()
        .filter(|student| student.year == year)
        .filter(|student| match &term {
            Some(term) => {
                student.roll_no.to_lowercase().contains(term.as_str())
                    || student.name.to_lowercase().contains(term.as_str())
            }
            None => true,
        })
        .collect()
}

/// Marks every listed student with `default_status`, flipping the ones in
/// `toggled`.
pub fn build_class_register(
    session: &ClassSession<'_>,
    students: &[&Student],
    default_status: Status,
    toggled: &[String],
) -> Result<Vec<NewAttendanceRecord>> {
    if students.is_empty() {
        return Err(AppError::validation("No students to mark attendance"));
    }
    if session.subject.trim().is_empty() {
        return Err(AppError::validation("Subject is required"));
    }

    let listed: HashSet<&str> = students.iter().map(|s| s.roll_no.as_str()).collect();
    let toggled: HashSet<&str> = toggled.iter().map(|roll| roll.trim()).collect();
    if let Some(unknown) = toggled.iter().find(|roll| !listed.contains(*roll)) {
        return Err(AppError::validation(format!(
            "Roll number {unknown} is not in the Year {} list being marked",
            session.year
        )));
    }

    Ok(students
        .iter()
        .map(|student| {
            let status = if toggled.contains(student.roll_no.as_str()) {
                default_status.toggled()
            } else {
                default_status
            };
            NewAttendanceRecord {
                roll_no: student.roll_no.clone(),
                date: session.date,
                subject: session.subject.trim().to_string(),
                status,
                year: Some(session.year),
                created_by: Some(session.created_by),
            }
        })
        .collect())
}

/// Parses a `Subject=Status` pair as given on the command line.
pub fn parse_entry(raw: &str) -> Result<(String, Status)> {
    let (subject, status) = raw
        .rsplit_once('=')
        .ok_or_else(|| AppError::validation(format!("expected Subject=Status, got {raw:?}")))?;
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(AppError::validation("All subjects must have a name"));
    }
    Ok((subject.to_string(), status.trim().parse()?))
}

/// Several subjects for one student on one date. With no entries, every
/// catalogue subject for the student's year is marked present.
pub fn build_manual_entries(
    student: &Student,
    date: NaiveDate,
    entries: &[(String, Status)],
    created_by: Uuid,
) -> Result<Vec<NewAttendanceRecord>> {
    if student.roll_no.trim().is_empty() {
        return Err(AppError::validation("Please select a student"));
    }

    let entries: Vec<(String, Status)> = if entries.is_empty() {
        subjects::subjects_for_year(student.year)
            .iter()
            .map(|subject| (subject.to_string(), Status::Present))
            .collect()
    } else {
        entries.to_vec()
    };

    if entries.iter().any(|(subject, _)| subject.trim().is_empty()) {
        return Err(AppError::validation("All subjects must have a name"));
    }

    Ok(entries
        .into_iter()
        .map(|(subject, status)| NewAttendanceRecord {
            roll_no: student.roll_no.clone(),
            date,
            subject,
            status,
            year: Some(student.year),
            created_by: Some(created_by),
        })
        .collect())
}

/// Bulk deletion only proceeds when the typed confirmation is exactly the
/// current student count.
pub fn confirm_bulk_delete(expected: i64, input: &str) -> Result<()> {
    if input.trim() == expected.to_string() {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "confirmation {:?} does not match the {expected} students in this year; nothing deleted",
            input.trim()
        )))
    }
}
