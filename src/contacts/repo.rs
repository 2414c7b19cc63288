use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, Duration};

use super::dto::ContactPayload;

/// Contact record. The book is shared: rows carry no owner column and any
/// authenticated user can read or mutate any contact.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub birth_date: Date,
    pub note: Option<String>,
}

const CONTACT_COLUMNS: &str = "id, first_name, last_name, email, phone_number, birth_date, note";

/// Inclusive seven-day window starting today. Compares absolute dates, so
/// birthdays whose month/day fall early next year are missed near the
/// year boundary; kept to match the recorded behavior.
pub fn birthday_window(today: Date) -> (Date, Date) {
    (today, today + Duration::days(7))
}

pub async fn create(db: &PgPool, payload: &ContactPayload) -> sqlx::Result<Contact> {
    sqlx::query_as::<_, Contact>(&format!(
        "INSERT INTO contacts (first_name, last_name, email, phone_number, birth_date, note)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {CONTACT_COLUMNS}"
    ))
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(&payload.email)
    .bind(&payload.phone_number)
    .bind(payload.birth_date)
    .bind(&payload.note)
    .fetch_one(db)
    .await
}

pub async fn get(db: &PgPool, id: i64) -> sqlx::Result<Option<Contact>> {
    sqlx::query_as::<_, Contact>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn list(db: &PgPool, limit: i64, offset: i64) -> sqlx::Result<Vec<Contact>> {
    sqlx::query_as::<_, Contact>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY id LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
}

pub async fn update(db: &PgPool, id: i64, payload: &ContactPayload) -> sqlx::Result<Option<Contact>> {
    sqlx::query_as::<_, Contact>(&format!(
        "UPDATE contacts
         SET first_name = $1, last_name = $2, email = $3,
             phone_number = $4, birth_date = $5, note = $6
         WHERE id = $7
         RETURNING {CONTACT_COLUMNS}"
    ))
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(&payload.email)
    .bind(&payload.phone_number)
    .bind(payload.birth_date)
    .bind(&payload.note)
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn delete(db: &PgPool, id: i64) -> sqlx::Result<Option<Contact>> {
    sqlx::query_as::<_, Contact>(&format!(
        "DELETE FROM contacts WHERE id = $1 RETURNING {CONTACT_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Case-insensitive substring match across first name, last name and email.
pub async fn search(db: &PgPool, query: &str) -> sqlx::Result<Vec<Contact>> {
    let pattern = format!("%{}%", query);
    sqlx::query_as::<_, Contact>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts
         WHERE first_name ILIKE $1 OR last_name ILIKE $1 OR email ILIKE $1
         ORDER BY id"
    ))
    .bind(pattern)
    .fetch_all(db)
    .await
}

pub async fn upcoming_birthdays(db: &PgPool, today: Date) -> sqlx::Result<Vec<Contact>> {
    let (from, to) = birthday_window(today);
    sqlx::query_as::<_, Contact>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts
         WHERE birth_date BETWEEN $1 AND $2
         ORDER BY birth_date"
    ))
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn window_spans_seven_days_inclusive() {
        let (from, to) = birthday_window(date!(2024 - 06 - 10));
        assert_eq!(from, date!(2024 - 06 - 10));
        assert_eq!(to, date!(2024 - 06 - 17));
    }

    #[test]
    fn window_crosses_month_boundary() {
        let (from, to) = birthday_window(date!(2024 - 06 - 28));
        assert_eq!(from, date!(2024 - 06 - 28));
        assert_eq!(to, date!(2024 - 07 - 05));
    }

    #[test]
    fn window_crosses_year_boundary_by_absolute_date() {
        // The window runs into January of the next year; a birth_date
        // stored with its original year never lands in it.
        let (from, to) = birthday_window(date!(2024 - 12 - 29));
        assert_eq!(from, date!(2024 - 12 - 29));
        assert_eq!(to, date!(2025 - 01 - 05));
    }
}
