//! Atomic counters. Each is a single conditional `UPDATE`, so the
//! check and the increment can never be split by a concurrent writer.

use sqlx::SqliteConnection;

/// Bounded counters kept on their owning row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedCounter {
    /// `activity_cases.current_participants`, bounded by `max_participants`
    Participants,
    /// `qr_codes.current_uses` keyed by the code itself, bounded by `max_uses` when set
    QrUses,
}

impl BoundedCounter {
    fn statement(&self) -> &'static str {
        match self {
            BoundedCounter::Participants => {
                "UPDATE activity_cases SET current_participants = current_participants + 1 \
                 WHERE id = ? AND current_participants < max_participants"
            }
            BoundedCounter::QrUses => {
                "UPDATE qr_codes SET current_uses = current_uses + 1 \
                 WHERE code = ? AND (max_uses IS NULL OR current_uses < max_uses)"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    Applied,
    /// Row missing or already at its ceiling
    AtCeiling,
}

/// Run as the first statement of a transaction it also takes the database
/// write lock, so reads that follow see no concurrent commits.
pub async fn increment_if_below(
    conn: &mut SqliteConnection,
    counter: BoundedCounter,
    key: &str,
) -> Result<Increment, sqlx::Error> {
    let result = sqlx::query(counter.statement())
        .bind(key)
        .execute(&mut *conn)
        .await?;

    Ok(if result.rows_affected() == 1 {
        Increment::Applied
    } else {
        Increment::AtCeiling
    })
}

pub fn format_case_number(ordinal: i64) -> String {
    format!("C-{:04}", ordinal)
}

/// Next case number from the `activity_case` sequence row.
pub async fn next_case_number(conn: &mut SqliteConnection) -> Result<String, sqlx::Error> {
    let value: i64 = sqlx::query_scalar(
        "UPDATE case_sequence SET value = value + 1 WHERE name = 'activity_case' RETURNING value",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(format_case_number(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_numbers_are_zero_padded() {
        assert_eq!(format_case_number(1), "C-0001");
        assert_eq!(format_case_number(42), "C-0042");
        assert_eq!(format_case_number(12345), "C-12345");
    }
}
