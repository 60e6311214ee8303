use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppError;

/// Academic year, 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Year(u8);

impl Year {
    pub const ALL: [Year; 4] = [Year(1), Year(2), Year(3), Year(4)];

    pub fn new(value: i64) -> Result<Self, AppError> {
        match value {
            1..=4 => Ok(Year(value as u8)),
            _ => Err(AppError::validation(format!(
                "year must be between 1 and 4, got {value}"
            ))),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_db(self) -> i32 {
        i32::from(self.0)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Year {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| AppError::validation(format!("year must be a number, got {s:?}")))?;
        Year::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Present,
    Absent,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "Present",
            Status::Absent => "Absent",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Status::Present => Status::Absent,
            Status::Absent => Status::Present,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, case-sensitive match: only `Present` and `Absent` are accepted.
impl FromStr for Status {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(Status::Present),
            "Absent" => Ok(Status::Absent),
            other => Err(AppError::validation(format!(
                "Status must be either \"Present\" or \"Absent\", got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub roll_no: String,
    pub name: String,
    pub year: Year,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub roll_no: String,
    pub name: String,
    pub year: Year,
}

impl NewStudent {
    /// Trims the inputs and rejects blank fields.
    pub fn validated(roll_no: &str, name: &str, year: Year) -> Result<Self, AppError> {
        let roll_no = roll_no.trim();
        let name = name.trim();
        if roll_no.is_empty() || name.is_empty() {
            return Err(AppError::validation("Please fill in all fields"));
        }
        Ok(NewStudent {
            roll_no: roll_no.to_string(),
            name: name.to_string(),
            year,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub roll_no: String,
    pub date: NaiveDate,
    pub subject: String,
    pub status: Status,
    pub year: Option<i32>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendanceRecord {
    pub roll_no: String,
    pub date: NaiveDate,
    pub subject: String,
    pub status: Status,
    pub year: Option<Year>,
    pub created_by: Option<Uuid>,
}

/// The slim projection the analytics view reads.
#[derive(Debug, Clone)]
pub struct AttendanceMark {
    pub roll_no: String,
    pub subject: String,
    pub status: Status,
}

/// Anything that carries a present/absent status can be counted.
pub trait HasStatus {
    fn status(&self) -> Status;
}

impl HasStatus for AttendanceRecord {
    fn status(&self) -> Status {
        self.status
    }
}

impl HasStatus for AttendanceMark {
    fn status(&self) -> Status {
        self.status
    }
}

impl HasStatus for NewAttendanceRecord {
    fn status(&self) -> Status {
        self.status
    }
}

impl<T: HasStatus> HasStatus for &T {
    fn status(&self) -> Status {
        (**self).status()
    }
}

impl HasStatus for Status {
    fn status(&self) -> Status {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttendanceStats {
    pub present: usize,
    pub total: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SubjectStats {
    pub present: usize,
    pub total: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct StudentBreakdown {
    pub roll_no: String,
    pub name: String,
    pub year: Year,
    pub subjects: BTreeMap<String, SubjectStats>,
    pub overall_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Good,
    Fair,
    Low,
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Standing::Good => "good",
            Standing::Fair => "fair",
            Standing::Low => "low",
        };
        f.write_str(label)
    }
}
