use chrono::{DateTime, Local};
use std::borrow::Cow;
use log::warn;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::error::Result;
use crate::model::{Measurement, MeasurementEntry, Unit};

pub const HEADER: [&str; 16] = [
    "Localidade",
    "Unidade",
    "Data",
    "Responsável",
    "Funcionários",
    "Estacionamento",
    "Estacionamento Coberto",
    "Gramado",
    "Sala de Curativo",
    "Sala de Vacinação",
    "Vidros Altos",
    "Vidros com Risco",
    "Tipos de Piso",
    "Tipos de Parede",
    "Observações",
    "Medidas",
];

pub const YES: &str = "Sim";
pub const NO: &str = "Não";
pub const TAG_DELIMITER: &str = ", ";
pub const SUMMARY_DELIMITER: &str = "; ";
/// Shown in the summary column in place of a measurement that could not be read.
pub const MALFORMED_PLACEHOLDER: &str = "[medida inválida]";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

const SHEET_NAME: &str = "Unidades";
const MIN_COLUMN_WIDTH: usize = 8;
const MAX_COLUMN_WIDTH: usize = 100;
/// Longest text Excel accepts in one cell, in UTF-16 code units.
pub const XLSX_CELL_LIMIT: usize = 32_767;
/// Appended to a cell that had to be cut to fit [`XLSX_CELL_LIMIT`].
pub const TRUNCATION_MARKER: &str = " [...texto truncado]";

/// Header plus one row of rendered cells per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    /// Width of each column: the longest rendered value, in characters.
    pub fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }
}

/// What an export covers, used to name the attachment and word the email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope<'a> {
    Unit { locality: &'a str, unit: &'a str },
    Locality(&'a str),
    All,
}

impl<'a> ExportScope<'a> {
    pub fn from_filters(locality: Option<&'a str>, unit: Option<&'a str>) -> Self {
        match (locality, unit) {
            (Some(locality), Some(unit)) => ExportScope::Unit { locality, unit },
            (Some(locality), None) => ExportScope::Locality(locality),
            _ => ExportScope::All,
        }
    }

    /// Attachment name, e.g. `unidade_Recepção_20250301_101500.xlsx`.
    pub fn filename(&self, generated_at: DateTime<Local>, extension: &str) -> String {
        let stamp = generated_at.format("%Y%m%d_%H%M%S");
        match self {
            ExportScope::Unit { unit, .. } => {
                format!("unidade_{}_{}.{}", slug(unit), stamp, extension)
            }
            ExportScope::Locality(locality) => {
                format!("unidades_{}_{}.{}", slug(locality), stamp, extension)
            }
            ExportScope::All => format!("unidades_{}.{}", stamp, extension),
        }
    }

    pub fn subject(&self) -> String {
        match self {
            ExportScope::Unit { locality, unit } => {
                format!("Nova unidade cadastrada: {} / {}", locality, unit)
            }
            ExportScope::Locality(locality) => format!("Unidades cadastradas em {}", locality),
            ExportScope::All => "Relatório de unidades cadastradas".to_string(),
        }
    }
}

/// Builds the export table. Every unit yields exactly one row.
pub fn build_table<'a>(units: impl IntoIterator<Item = (&'a str, &'a Unit)>) -> ExportTable {
    ExportTable {
        header: HEADER.iter().map(|h| h.to_string()).collect(),
        rows: units
            .into_iter()
            .map(|(locality, unit)| unit_row(locality, unit))
            .collect(),
    }
}

pub fn unit_row(locality: &str, unit: &Unit) -> Vec<String> {
    let f = &unit.facilities;
    vec![
        locality.to_string(),
        unit.name.clone(),
        unit.registration_date.format("%Y-%m-%d").to_string(),
        unit.responsible.clone(),
        unit.employee_count.to_string(),
        yes_no(f.has_parking),
        yes_no(f.covered_parking),
        yes_no(f.has_lawn),
        yes_no(f.has_first_aid_room),
        yes_no(f.has_vaccination_room),
        yes_no(f.has_high_glass),
        yes_no(f.high_glass_danger),
        join_tags(unit.flooring.iter()),
        join_tags(unit.walls.iter()),
        unit.notes.clone(),
        measurement_summary(unit),
    ]
}

/// `"{category}: {width}x{height}={area} m²"` entries joined by `"; "`.
pub fn measurement_summary(unit: &Unit) -> String {
    unit.measurements
        .iter()
        .map(|entry| match entry {
            MeasurementEntry::Valid(m) => format_measurement(m),
            MeasurementEntry::Malformed(bad) => {
                warn!(
                    "Unit '{}' has a malformed measurement ({}): {}",
                    unit.name, bad.reason, bad.raw
                );
                MALFORMED_PLACEHOLDER.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(SUMMARY_DELIMITER)
}

pub fn format_measurement(m: &Measurement) -> String {
    format!("{}: {}x{}={:.2} m²", m.category, m.width, m.height, m.area)
}

fn yes_no(flag: bool) -> String {
    (if flag { YES } else { NO }).to_string()
}

fn join_tags<T: ToString>(tags: impl Iterator<Item = T>) -> String {
    tags.map(|t| t.to_string()).collect::<Vec<_>>().join(TAG_DELIMITER)
}

/// Convert the table to XLSX format
///
/// Writes every cell as a string on a single `Unidades` sheet with a bold, frozen header
/// row and columns sized to their longest value.
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes or a workbook error
pub fn to_xlsx(table: &ExportTable) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(SHEET_NAME)?;

    let bold = Format::new().set_bold();
    for (c, title) in table.header.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, title, &bold)?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let cell = fit_cell(value);
            if let Cow::Owned(_) = cell {
                warn!(
                    "Column '{}' of row {} exceeds the spreadsheet cell limit, truncated",
                    table.header.get(c).map(String::as_str).unwrap_or("?"),
                    r + 1
                );
            }
            worksheet.write_string((r + 1) as u32, c as u16, cell.as_ref())?;
        }
    }

    for (c, width) in table.column_widths().into_iter().enumerate() {
        let width = width.clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH) + 2;
        worksheet.set_column_width(c as u16, width as f64)?;
    }
    worksheet.set_freeze_panes(1, 0)?;

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Cuts `value` to [`XLSX_CELL_LIMIT`], marking the cut with [`TRUNCATION_MARKER`].
pub fn fit_cell(value: &str) -> Cow<'_, str> {
    if value.encode_utf16().count() <= XLSX_CELL_LIMIT {
        return Cow::Borrowed(value);
    }

    let budget = XLSX_CELL_LIMIT - TRUNCATION_MARKER.encode_utf16().count();
    let mut used = 0;
    let mut cut = String::with_capacity(budget + TRUNCATION_MARKER.len());
    for c in value.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        cut.push(c);
    }
    cut.push_str(TRUNCATION_MARKER);
    Cow::Owned(cut)
}

/// Convert the table to CSV, quoting values that contain commas, quotes or line breaks.
pub fn to_csv(table: &ExportTable) -> String {
    let mut csv_content = String::new();
    for line in std::iter::once(&table.header).chain(&table.rows) {
        let cells: Vec<String> = line.iter().map(|value| csv_escape(value)).collect();
        csv_content.push_str(&cells.join(","));
        csv_content.push('\n');
    }
    csv_content
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Plain-text email body listing the exported units.
pub fn email_body<'a>(
    scope: &ExportScope<'_>,
    units: impl IntoIterator<Item = (&'a str, &'a Unit)>,
) -> String {
    let intro = match scope {
        ExportScope::Unit { .. } => "Segue em anexo a planilha da nova unidade.".to_string(),
        ExportScope::Locality(locality) => {
            format!("Segue em anexo a planilha das unidades de {}.", locality)
        }
        ExportScope::All => "Segue em anexo a planilha de todas as unidades cadastradas.".to_string(),
    };

    let mut body = intro;
    body.push_str("\n\n");
    let mut count = 0;
    for (locality, unit) in units {
        count += 1;
        body.push_str(&format!(
            "- {} / {} ({}), responsável: {}, {} medida(s)\n",
            locality,
            unit.name,
            unit.registration_date.format("%d/%m/%Y"),
            if unit.responsible.is_empty() { "-" } else { unit.responsible.as_str() },
            unit.measurements.len()
        ));
    }
    if count == 0 {
        body.push_str("Nenhuma unidade cadastrada.\n");
    }
    body
}

fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if slug.is_empty() { "sem_nome".to_string() } else { slug }
}
