use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::{
    Color, ConditionalFormatCell, ConditionalFormatCellRule, DataValidation, Format, Workbook,
};
use std::collections::HashMap;
use std::path::Path;

use crate::classifier::truncate_chars;
use crate::models::{Posting, PostingId, Status, StatusCategory};

pub const SHEET_NAME: &str = "Tracker";

pub const HEADERS: [&str; 11] = [
    "Stillingstittel",
    "Fra dato",
    "Søknadsfrist",
    "Arbeidsgiver",
    "Kontaktperson",
    "Mobil",
    "Arbeidssted",
    "Full beskrivelse",
    "Lenke",
    "Status",
    "ID",
];

const STATUS_COL: u16 = 9;
const ID_COL: u16 = 10;
const COLUMN_WIDTHS: [f64; 11] = [40.0, 12.0, 14.0, 25.0, 20.0, 14.0, 18.0, 60.0, 45.0, 18.0, 12.0];

// Extra rows below the data that still get the dropdown, for hand-added rows.
const SPARE_ROWS: u32 = 100;

// Excel refuses longer cell strings.
const MAX_CELL_CHARS: usize = 32_767;

/// One tracker line, as text. `id` is `None` when the cell is empty or not a
/// number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerRow {
    pub id: Option<PostingId>,
    pub title: String,
    pub date_added: String,
    pub deadline: String,
    pub employer: String,
    pub contact: String,
    pub phone: String,
    pub location: String,
    pub description: String,
    pub link: String,
    pub status: String,
}

impl TrackerRow {
    pub fn from_posting(posting: &Posting) -> Self {
        Self {
            id: Some(posting.id),
            title: posting.title.clone(),
            date_added: posting.date_added.clone(),
            deadline: posting.deadline.clone(),
            employer: posting.employer.clone(),
            contact: posting.contact.clone(),
            phone: posting.phone.clone(),
            location: posting.location.clone(),
            description: posting.description.clone(),
            link: posting.link.clone(),
            status: posting.status.label().to_string(),
        }
    }

    /// Text cells in column order, ID excluded.
    fn text_cells(&self) -> [&str; 10] {
        [
            self.title.as_str(),
            self.date_added.as_str(),
            self.deadline.as_str(),
            self.employer.as_str(),
            self.contact.as_str(),
            self.phone.as_str(),
            self.location.as_str(),
            self.description.as_str(),
            self.link.as_str(),
            self.status.as_str(),
        ]
    }

    fn is_blank(&self) -> bool {
        self.id.is_none() && self.text_cells().iter().all(|c| c.trim().is_empty())
    }
}

/// Background and font colour for a status category.
pub fn category_colors(category: StatusCategory) -> (u32, u32) {
    match category {
        StatusCategory::Pending => (0xFFC7CE, 0x9C0006),
        StatusCategory::Applied => (0xBDD7EE, 0x000000),
        StatusCategory::Interviewing => (0xFFEB9C, 0x9C5700),
        StatusCategory::Success => (0xC6EFCE, 0x006100),
    }
}

/// Writes the whole tracker, replacing whatever is at `path`.
pub fn write_tracker(path: &Path, postings: &[Posting]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let header = Format::new().set_bold();
    for (col, name) in HEADERS.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *name, &header)?;
        worksheet.set_column_width(col, COLUMN_WIDTHS[col as usize])?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    worksheet.set_column_hidden(ID_COL)?;

    for (idx, posting) in postings.iter().enumerate() {
        let row = idx as u32 + 1;
        let line = TrackerRow::from_posting(posting);
        for (col, text) in line.text_cells().iter().enumerate() {
            worksheet.write_string(row, col as u16, truncate_chars(text, MAX_CELL_CHARS))?;
        }
        worksheet.write_number(row, ID_COL, posting.id.get() as f64)?;
    }

    let last_row = postings.len() as u32 + SPARE_ROWS;
    let labels: Vec<&str> = Status::workflow().map(Status::label).collect();
    let dropdown = DataValidation::new().allow_list_strings(&labels)?;
    worksheet.add_data_validation(1, STATUS_COL, last_row, STATUS_COL, &dropdown)?;

    for status in Status::workflow() {
        let Some(category) = status.category() else {
            continue;
        };
        let (background, font) = category_colors(category);
        let format = Format::new()
            .set_background_color(Color::RGB(background))
            .set_font_color(Color::RGB(font));
        let quoted = format!("\"{}\"", status.label());
        let rule = ConditionalFormatCell::new()
            .set_rule(ConditionalFormatCellRule::EqualTo(quoted.as_str()))
            .set_format(&format);
        worksheet.add_conditional_format(1, STATUS_COL, last_row, STATUS_COL, &rule)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("writing tracker {}", path.display()))?;
    Ok(())
}

/// Reads tracker rows, locating columns by header name. Fails if the file is
/// unreadable or has no `ID` column.
pub fn read_tracker(path: &Path) -> Result<Vec<TrackerRow>> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).with_context(|| format!("opening tracker {}", path.display()))?;

    let range = if workbook.sheet_names().iter().any(|name| name == SHEET_NAME) {
        workbook.worksheet_range(SHEET_NAME)?
    } else {
        workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("tracker {} has no sheets", path.display()))??
    };

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| anyhow!("tracker {} is empty", path.display()))?;
    let columns: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| (cell_text(cell).trim().to_string(), idx))
        .collect();
    let id_col = *columns
        .get("ID")
        .ok_or_else(|| anyhow!("tracker {} has no ID column", path.display()))?;

    let text = |row: &[Data], name: &str| -> String {
        columns
            .get(name)
            .and_then(|&idx| row.get(idx))
            .map(cell_text)
            .unwrap_or_default()
    };

    let mut out = Vec::new();
    for row in rows {
        let line = TrackerRow {
            id: row.get(id_col).and_then(cell_id),
            title: text(row, HEADERS[0]),
            date_added: text(row, HEADERS[1]),
            deadline: text(row, HEADERS[2]),
            employer: text(row, HEADERS[3]),
            contact: text(row, HEADERS[4]),
            phone: text(row, HEADERS[5]),
            location: text(row, HEADERS[6]),
            description: text(row, HEADERS[7]),
            link: text(row, HEADERS[8]),
            status: text(row, HEADERS[9]),
        };
        if !line.is_blank() {
            out.push(line);
        }
    }
    Ok(out)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn cell_id(cell: &Data) -> Option<PostingId> {
    match cell {
        Data::Int(i) if *i >= 0 => Some(PostingId::new(*i)),
        Data::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f < 9.0e15 => {
            Some(PostingId::new(*f as i64))
        }
        Data::String(s) => s.parse().ok(),
        _ => None,
    }
}
