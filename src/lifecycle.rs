use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::db::Database;
use crate::models::PostingId;

/// Parses a `dd.mm.yyyy` deadline. Free text such as "Se annonse" or
/// "Snarest" yields `None`.
pub fn parse_deadline(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(text, "%d.%m.%Y").ok()
}

/// Not-yet-handled postings whose deadline is strictly before `today`.
pub fn expired(db: &Database, today: NaiveDate) -> Result<Vec<PostingId>> {
    let mut ids = Vec::new();
    for (id, deadline) in db.not_searched_deadlines()? {
        match parse_deadline(&deadline) {
            Some(date) if date < today => ids.push(id),
            Some(_) => {}
            None => debug!(%id, %deadline, "deadline not a date, keeping"),
        }
    }
    Ok(ids)
}

/// Deletes expired postings nobody acted on. Anything a person has touched
/// (any status other than not searched) is kept regardless of deadline.
pub fn cleanup_expired(db: &Database, today: NaiveDate, dry_run: bool) -> Result<usize> {
    let ids = expired(db, today)?;
    if ids.is_empty() || dry_run {
        return Ok(ids.len());
    }
    let removed = db.delete(&ids)?;
    info!(removed, "expired postings removed");
    Ok(removed)
}
