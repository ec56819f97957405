use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::models::{Posting, PostingId, Status};
use crate::tracker::{self, TrackerRow};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// False when the tracker could not be read and nothing was imported.
    pub read: bool,
    pub rows: usize,
    pub inserted: usize,
    pub status_updates: usize,
}

/// Keeps the store and the hand-edited tracker spreadsheet in step.
///
/// The store is authoritative for everything except `status`, which people
/// change in the tracker. Rows added by hand are adopted into the store.
pub struct Reconciler<'a> {
    db: &'a Database,
    today: NaiveDate,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database, today: NaiveDate) -> Self {
        Self { db, today }
    }

    /// Adopts tracker rows the store has never seen. Existing rows are left
    /// untouched. Returns how many rows were inserted.
    pub fn import_external(&self, rows: &[TrackerRow]) -> Result<usize> {
        let mut inserted = 0;
        for row in rows {
            let Some(id) = row.id else {
                debug!(title = %row.title, "skipping tracker row without a usable id");
                continue;
            };
            if self.db.exists(id)? {
                continue;
            }
            let posting = self.posting_from_row(id, row);
            match self.db.insert_if_absent(&posting) {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => warn!(%id, error = %format!("{e:#}"), "failed to import tracker row"),
            }
        }
        Ok(inserted)
    }

    /// Copies status edits made in the tracker back into the store. Only rows
    /// the store already knows are considered, and only `status` is written.
    pub fn import_status_edits(&self, rows: &[TrackerRow]) -> Result<usize> {
        let current: HashMap<PostingId, Status> = self
            .db
            .all()?
            .into_iter()
            .map(|p| (p.id, p.status))
            .collect();

        let mut updated = 0;
        for row in rows {
            let Some(id) = row.id else { continue };
            let Some(&stored) = current.get(&id) else {
                continue;
            };
            if row.status.trim().is_empty() {
                continue;
            }
            let edited = match row.status.parse::<Status>() {
                Ok(status) => status,
                Err(e) => {
                    warn!(%id, status = %row.status, "ignoring tracker status: {e}");
                    continue;
                }
            };
            if edited == stored {
                continue;
            }
            if self.db.update_status(id, edited)? {
                info!(%id, from = %stored, to = %edited, "status updated from tracker");
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Rewrites the tracker from the store. Returns the number of rows written.
    pub fn export(&self, target: &Path) -> Result<usize> {
        let postings = self.db.all()?;
        tracker::write_tracker(target, &postings)?;
        info!(path = %target.display(), rows = postings.len(), "tracker exported");
        Ok(postings.len())
    }

    /// Pulls the tracker into the store. An unreadable tracker is skipped
    /// with a warning; the store stays as it was.
    pub fn sync(&self, path: &Path) -> Result<SyncReport> {
        if !path.exists() {
            info!(path = %path.display(), "no tracker yet, nothing to sync");
            return Ok(SyncReport::default());
        }
        let rows = match tracker::read_tracker(path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "could not read tracker, skipping sync");
                return Ok(SyncReport::default());
            }
        };

        let inserted = self.import_external(&rows)?;
        let status_updates = self.import_status_edits(&rows)?;
        info!(rows = rows.len(), inserted, status_updates, "tracker synced");
        Ok(SyncReport {
            read: true,
            rows: rows.len(),
            inserted,
            status_updates,
        })
    }

    fn posting_from_row(&self, id: PostingId, row: &TrackerRow) -> Posting {
        let status = match row.status.trim() {
            "" => Status::NotSearched,
            label => label.parse().unwrap_or_else(|_| {
                warn!(%id, status = %label, "unknown tracker status, importing as not searched");
                Status::NotSearched
            }),
        };
        let date_added = parse_tracker_date(&row.date_added).unwrap_or(self.today);

        Posting {
            id,
            title: row.title.clone(),
            employer: row.employer.clone(),
            location: row.location.clone(),
            contact: row.contact.clone(),
            phone: row.phone.clone(),
            description: row.description.clone(),
            link: row.link.clone(),
            deadline: row.deadline.clone(),
            date_added: date_added.format("%Y-%m-%d").to_string(),
            status,
        }
    }
}

/// Tracker dates are ISO when we wrote them, `dd.mm.yyyy` in older files.
fn parse_tracker_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d.%m.%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.setup().unwrap();
        db
    }

    fn stored(id: i64, status: Status) -> Posting {
        Posting {
            id: PostingId::new(id),
            title: format!("Stored {id}"),
            employer: "Acme AS".to_string(),
            location: "Oslo".to_string(),
            contact: String::new(),
            phone: String::new(),
            description: "Python".to_string(),
            link: format!("https://www.finn.no/job/ad/{id}"),
            deadline: "Se annonse".to_string(),
            date_added: "2026-02-01".to_string(),
            status,
        }
    }

    fn row(id: Option<i64>, title: &str, status: &str) -> TrackerRow {
        TrackerRow {
            id: id.map(PostingId::new),
            title: title.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_import_external_never_alters_existing_rows() {
        let db = setup();
        db.insert_if_absent(&stored(1, Status::NotSearched)).unwrap();
        let reconciler = Reconciler::new(&db, today());

        let rows = vec![
            row(Some(1), "Edited title", "Offer"),
            row(Some(2), "Hand added", "Sent Application"),
            row(None, "No id", "Offer"),
        ];
        let inserted = reconciler.import_external(&rows).unwrap();

        assert_eq!(inserted, 1);
        let existing = db.get(PostingId::new(1)).unwrap().unwrap();
        assert_eq!(existing.title, "Stored 1");
        assert_eq!(existing.status, Status::NotSearched);

        let adopted = db.get(PostingId::new(2)).unwrap().unwrap();
        assert_eq!(adopted.title, "Hand added");
        assert_eq!(adopted.status, Status::SentApplication);
        assert_eq!(adopted.date_added, "2026-03-01");
        assert_eq!(db.count().unwrap(), 2);
    }

    #[test]
    fn test_import_external_keeps_tracker_date_and_defaults_bad_status() {
        let db = setup();
        let reconciler = Reconciler::new(&db, today());
        let mut legacy = row(Some(9), "Old", "Maybe later");
        legacy.date_added = "15.01.2025".to_string();

        assert_eq!(reconciler.import_external(&[legacy]).unwrap(), 1);
        let posting = db.get(PostingId::new(9)).unwrap().unwrap();
        assert_eq!(posting.date_added, "2025-01-15");
        assert_eq!(posting.status, Status::NotSearched);
    }

    #[test]
    fn test_import_status_edits_writes_status_only() {
        let db = setup();
        db.insert_if_absent(&stored(1, Status::NotSearched)).unwrap();
        db.insert_if_absent(&stored(2, Status::SentApplication)).unwrap();
        db.insert_if_absent(&stored(3, Status::NotSearched)).unwrap();
        let reconciler = Reconciler::new(&db, today());

        let rows = vec![
            row(Some(1), "Renamed", " 1. interview "),
            row(Some(2), "Stored 2", "Sent Application"),
            row(Some(3), "Stored 3", "not a status"),
            row(Some(4), "Unknown id", "Offer"),
        ];
        let updated = reconciler.import_status_edits(&rows).unwrap();

        assert_eq!(updated, 1);
        let first = db.get(PostingId::new(1)).unwrap().unwrap();
        assert_eq!(first.status, Status::FirstInterview);
        assert_eq!(first.title, "Stored 1");
        assert_eq!(
            db.get(PostingId::new(3)).unwrap().unwrap().status,
            Status::NotSearched
        );
        assert!(!db.exists(PostingId::new(4)).unwrap());
    }

    #[test]
    fn test_sync_round_trip_through_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.xlsx");
        let db = setup();
        db.insert_if_absent(&stored(10, Status::NotSearched)).unwrap();
        db.insert_if_absent(&stored(11, Status::NotSearched)).unwrap();
        let reconciler = Reconciler::new(&db, today());
        assert_eq!(reconciler.export(&path).unwrap(), 2);

        // Someone marks posting 11 as applied and adds a row by hand.
        let mut edited = db.all().unwrap();
        for p in edited.iter_mut() {
            if p.id == PostingId::new(11) {
                p.status = Status::SentApplication;
            }
        }
        let mut manual = stored(12, Status::Offer);
        manual.title = "Found elsewhere".to_string();
        edited.push(manual);
        tracker::write_tracker(&path, &edited).unwrap();

        let report = reconciler.sync(&path).unwrap();
        assert!(report.read);
        assert_eq!(report.rows, 3);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.status_updates, 1);
        assert_eq!(
            db.get(PostingId::new(11)).unwrap().unwrap().status,
            Status::SentApplication
        );
        assert_eq!(
            db.get(PostingId::new(12)).unwrap().unwrap().title,
            "Found elsewhere"
        );
    }

    #[test]
    fn test_sync_skips_unreadable_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        let db = setup();
        db.insert_if_absent(&stored(1, Status::Offer)).unwrap();

        let report = Reconciler::new(&db, today()).sync(&path).unwrap();
        assert!(!report.read);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_sync_without_tracker_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = setup();
        let report = Reconciler::new(&db, today())
            .sync(&dir.path().join("missing.xlsx"))
            .unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[test]
    fn test_parse_tracker_date() {
        assert_eq!(
            parse_tracker_date("2026-02-03"),
            NaiveDate::from_ymd_opt(2026, 2, 3)
        );
        assert_eq!(
            parse_tracker_date(" 03.02.2026 "),
            NaiveDate::from_ymd_opt(2026, 2, 3)
        );
        assert_eq!(parse_tracker_date("yesterday"), None);
    }
}
