use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::models::{
    AttendanceMark, AttendanceRecord, AttendanceStats, HasStatus, Standing, Status, Student,
    StudentBreakdown, SubjectStats,
};

/// Present count, total count and whole-number percentage for a set of
/// entries. Rounds half away from zero; an empty set is 0%.
pub fn attendance_ratio<T: HasStatus>(entries: &[T]) -> AttendanceStats {
    let total = entries.len();
    let present = entries
        .iter()
        .filter(|entry| entry.status() == Status::Present)
        .count();

    AttendanceStats {
        present,
        total,
        percentage: whole_percentage(present, total),
    }
}

/// Ratio over the entries of a single date.
pub fn daily_stats<T: HasStatus>(entries_for_date: &[T]) -> AttendanceStats {
    attendance_ratio(entries_for_date)
}

/// Ratio over every entry a student has, across all dates and subjects
/// pooled together. Not the same figure as
/// [`StudentBreakdown::overall_percentage`], which averages subjects.
pub fn overall_stats<T: HasStatus>(entries_for_student: &[T]) -> AttendanceStats {
    attendance_ratio(entries_for_student)
}

fn whole_percentage(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (present as f64 / total as f64 * 100.0).round() as u32
}

fn raw_percentage(present: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        present as f64 / total as f64 * 100.0
    }
}

/// Groups a student's records by date, newest first. Record order within a
/// date is preserved.
pub fn group_by_date(records: &[AttendanceRecord]) -> Vec<(NaiveDate, Vec<&AttendanceRecord>)> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&AttendanceRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.date).or_default().push(record);
    }
    grouped.into_iter().rev().collect()
}

/// Per-subject percentages for every known student, plus each student's
/// overall figure as the unweighted mean of their subject percentages.
///
/// Marks for roll numbers that match no student are ignored. Output keeps
/// the order of `students`.
pub fn subject_breakdown(students: &[Student], marks: &[AttendanceMark]) -> Vec<StudentBreakdown> {
    let mut counts: HashMap<&str, BTreeMap<String, (usize, usize)>> = students
        .iter()
        .map(|student| (student.roll_no.as_str(), BTreeMap::new()))
        .collect();

    for mark in marks {
        let Some(subjects) = counts.get_mut(mark.roll_no.as_str()) else {
            continue;
        };
        let entry = subjects.entry(mark.subject.clone()).or_insert((0, 0));
        entry.1 += 1;
        if mark.status == Status::Present {
            entry.0 += 1;
        }
    }

    students
        .iter()
        .map(|student| {
            let subjects: BTreeMap<String, SubjectStats> = counts
                .remove(student.roll_no.as_str())
                .unwrap_or_default()
                .into_iter()
                .map(|(subject, (present, total))| {
                    (
                        subject,
                        SubjectStats {
                            present,
                            total,
                            percentage: raw_percentage(present, total),
                        },
                    )
                })
                .collect();

            let overall_percentage = if subjects.is_empty() {
                0.0
            } else {
                subjects.values().map(|s| s.percentage).sum::<f64>() / subjects.len() as f64
            };

            StudentBreakdown {
                roll_no: student.roll_no.clone(),
                name: student.name.clone(),
                year: student.year,
                subjects,
                overall_percentage,
            }
        })
        .collect()
}

pub fn classify(percentage: f64) -> Standing {
    if percentage >= 75.0 {
        Standing::Good
    } else if percentage >= 50.0 {
        Standing::Fair
    } else {
        Standing::Low
    }
}

/// One decimal place, as shown in the analytics table and the export.
pub fn format_percentage(percentage: f64) -> String {
    format!("{percentage:.1}")
}
