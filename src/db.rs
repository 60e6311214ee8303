use std::collections::HashMap;

use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AttendanceMark, AttendanceRecord, NewAttendanceRecord, NewStudent, Student, Year,
};

// Keeps each statement well under the Postgres bind-parameter ceiling.
const INSERT_CHUNK: usize = 2_000;

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn student_from_row(row: &sqlx::postgres::PgRow) -> Result<Student> {
    let year: i32 = row.get("year");
    Ok(Student {
        id: row.get("id"),
        roll_no: row.get("roll_no"),
        name: row.get("name"),
        year: Year::new(i64::from(year))?,
        created_at: row.get("created_at"),
    })
}

pub async fn list_students(pool: &PgPool, year: Option<Year>) -> Result<Vec<Student>> {
    let mut query = String::from("SELECT id, roll_no, name, year, created_at FROM students");
    if year.is_some() {
        query.push_str(" WHERE year = $1");
    }
    query.push_str(" ORDER BY year ASC, roll_no ASC");

    let mut rows = sqlx::query(&query);
    if let Some(value) = year {
        rows = rows.bind(value.as_db());
    }

    let records = rows.fetch_all(pool).await?;
    debug!(count = records.len(), "fetched students");
    records.iter().map(student_from_row).collect()
}

pub async fn find_student(pool: &PgPool, roll_no: &str) -> Result<Option<Student>> {
    let row = sqlx::query(
        "SELECT id, roll_no, name, year, created_at FROM students WHERE roll_no = $1",
    )
    .bind(roll_no)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(student_from_row).transpose()
}

pub async fn find_student_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Student>> {
    let row = sqlx::query("SELECT id, roll_no, name, year, created_at FROM students WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(student_from_row).transpose()
}

pub async fn count_students(pool: &PgPool, year: Year) -> Result<i64> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM students WHERE year = $1")
        .bind(year.as_db())
        .fetch_one(pool)
        .await?
        .get("count");
    Ok(count)
}

/// Inserts every student in one transaction; a single failure rejects the
/// whole batch.
pub async fn insert_students(pool: &PgPool, students: &[NewStudent]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for chunk in students.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO students (id, roll_no, name, year) ");
        builder.push_values(chunk, |mut row, student| {
            row.push_bind(Uuid::new_v4())
                .push_bind(student.roll_no.clone())
                .push_bind(student.name.clone())
                .push_bind(student.year.as_db());
        });
        inserted += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    info!(inserted, "inserted students");
    Ok(inserted)
}

pub async fn delete_student(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM students WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    info!(%id, deleted = result.rows_affected(), "deleted student");
    Ok(result.rows_affected())
}

pub async fn delete_students_in_year(pool: &PgPool, year: Year) -> Result<u64> {
    let result = sqlx::query("DELETE FROM students WHERE year = $1")
        .bind(year.as_db())
        .execute(pool)
        .await?;
    info!(%year, deleted = result.rows_affected(), "deleted students for year");
    Ok(result.rows_affected())
}

/// Appends attendance rows in one transaction. Rows are never updated.
pub async fn insert_attendance(pool: &PgPool, records: &[NewAttendanceRecord]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for chunk in records.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO attendance_records \
             (id, roll_no, date, subject, status, year, created_by) ",
        );
        builder.push_values(chunk, |mut row, record| {
            row.push_bind(Uuid::new_v4())
                .push_bind(record.roll_no.clone())
                .push_bind(record.date)
                .push_bind(record.subject.clone())
                .push_bind(record.status.as_str())
                .push_bind(record.year.map(Year::as_db))
                .push_bind(record.created_by);
        });
        inserted += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    info!(inserted, "inserted attendance records");
    Ok(inserted)
}

/// A student's records, newest date first and subjects alphabetical.
pub async fn fetch_attendance_for_roll(
    pool: &PgPool,
    roll_no: &str,
) -> Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, roll_no, date, subject, status, year, created_by, created_at
        FROM attendance_records
        WHERE roll_no = $1
        ORDER BY date DESC, subject ASC
        "#,
    )
    .bind(roll_no)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.get("status");
        records.push(AttendanceRecord {
            id: row.get("id"),
            roll_no: row.get("roll_no"),
            date: row.get("date"),
            subject: row.get("subject"),
            status: status.parse()?,
            year: row.get("year"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
        });
    }

    Ok(records)
}

pub async fn fetch_attendance_marks(pool: &PgPool) -> Result<Vec<AttendanceMark>> {
    let rows = sqlx::query("SELECT roll_no, subject, status FROM attendance_records")
        .fetch_all(pool)
        .await?;

    let mut marks = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.get("status");
        marks.push(AttendanceMark {
            roll_no: row.get("roll_no"),
            subject: row.get("subject"),
            status: status.parse()?,
        });
    }

    debug!(count = marks.len(), "fetched attendance marks");
    Ok(marks)
}

/// Current year for each known roll number among `rolls`.
pub async fn student_years(pool: &PgPool, rolls: &[String]) -> Result<HashMap<String, Year>> {
    let rows = sqlx::query("SELECT roll_no, year FROM students WHERE roll_no = ANY($1)")
        .bind(rolls)
        .fetch_all(pool)
        .await?;

    let mut years = HashMap::with_capacity(rows.len());
    for row in rows {
        let year: i32 = row.get("year");
        years.insert(row.get::<String, _>("roll_no"), Year::new(i64::from(year))?);
    }
    Ok(years)
}
