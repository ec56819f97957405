use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Posting identifier. Stored as an INTEGER primary key, compared as a string
/// against tracker cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostingId(i64);

impl PostingId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PostingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PostingId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("'{}' is not a numeric posting id", s));
        }
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|e| anyhow!("posting id '{}' out of range: {}", s, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardStage {
    Basic,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Status {
    NotSearched,
    Discarded(DiscardStage),
    SentApplication,
    FirstInterview,
    SecondInterview,
    Offer,
    Accepted,
    Rejected,
    NotInterested,
}

/// Colour bucket a status is shown with in the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Pending,
    Applied,
    Interviewing,
    Success,
}

impl Status {
    pub const ALL: [Status; 10] = [
        Status::NotSearched,
        Status::Discarded(DiscardStage::Basic),
        Status::Discarded(DiscardStage::Ai),
        Status::SentApplication,
        Status::FirstInterview,
        Status::SecondInterview,
        Status::Offer,
        Status::Accepted,
        Status::Rejected,
        Status::NotInterested,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Status::NotSearched => "Not searched",
            Status::Discarded(DiscardStage::Basic) => "Discarded (Basic)",
            Status::Discarded(DiscardStage::Ai) => "Discarded (AI)",
            Status::SentApplication => "Sent Application",
            Status::FirstInterview => "1. Interview",
            Status::SecondInterview => "2. Interview",
            Status::Offer => "Offer",
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
            Status::NotInterested => "Not Interested",
        }
    }

    /// Statuses offered in the tracker dropdown.
    pub fn workflow() -> impl Iterator<Item = Status> {
        Self::ALL.into_iter().filter(|s| !s.is_discarded())
    }

    pub fn is_discarded(self) -> bool {
        matches!(self, Status::Discarded(_))
    }

    pub fn category(self) -> Option<StatusCategory> {
        match self {
            Status::NotSearched => Some(StatusCategory::Pending),
            Status::SentApplication => Some(StatusCategory::Applied),
            Status::FirstInterview | Status::SecondInterview => Some(StatusCategory::Interviewing),
            Status::Offer | Status::Accepted => Some(StatusCategory::Success),
            Status::Discarded(_) | Status::Rejected | Status::NotInterested => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow!("Unknown status '{}'", s))
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.label().to_string()
    }
}

impl TryFrom<String> for Status {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Field bundle returned by a posting source for one locator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPosting {
    pub locator: String,
    pub title: String,
    pub employer: String,
    pub deadline: String,
    pub location: String,
    pub contact: String,
    pub phone: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub title: String,
    pub employer: String,
    pub location: String,
    pub contact: String,
    pub phone: String,
    pub description: String,
    pub link: String,
    pub deadline: String,
    pub date_added: String, // YYYY-MM-DD
    pub status: Status,
}

impl Posting {
    pub fn from_raw(id: PostingId, raw: RawPosting, date_added: String, status: Status) -> Self {
        Self {
            id,
            title: raw.title,
            employer: raw.employer,
            location: raw.location,
            contact: raw.contact,
            phone: raw.phone,
            description: raw.description,
            link: raw.locator,
            deadline: raw.deadline,
            date_added,
            status,
        }
    }
}
