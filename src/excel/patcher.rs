//! In-place cell patching for .xlsx working copies
//!
//! Only the `<c>` elements of staged cells are rewritten. Every other archive entry is
//! raw-copied, so styles, charts, defined names and untouched cells stay byte-identical.

use super::{cell_ref, parse_cell_ref, CellView, Workbook, Worksheet, MAX_COLS, MAX_ROWS};
use crate::error::{OutlookError, OutlookResult};
use crate::types::CellValue;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Longest text a cell can hold
const MAX_TEXT_LEN: usize = 32_767;

const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// Value to store in a cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellWrite {
    Number(f64),
    Text(String),
}

impl From<&CellWrite> for CellValue {
    fn from(w: &CellWrite) -> Self {
        match w {
            CellWrite::Number(n) => CellValue::Number(*n),
            CellWrite::Text(s) => CellValue::Text(s.clone()),
        }
    }
}

/// Why a single cell could not be staged
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellWriteError {
    #[error("sheet '{0}' is not a writable worksheet")]
    UnknownSheet(String),

    #[error("cell (row {row}, column {col}) is outside the sheet")]
    OutOfRange { row: u32, col: u32 },

    #[error("{0} is not a storable number")]
    NonFinite(f64),

    #[error("text of {0} characters exceeds the cell limit")]
    TextTooLong(usize),

    #[error("{0} anchors a shared formula and cannot be replaced")]
    SharedFormulaMaster(String),
}

/// Write-enabled view of a workbook file.
///
/// Reads go through a calamine grid (formulas visible) that also reflects staged writes;
/// [`WorkbookPatcher::save`] applies all staged cells to the file at once.
pub struct WorkbookPatcher {
    path: PathBuf,
    grid: Workbook,
    /// sheet name → worksheet part inside the archive
    parts: HashMap<String, String>,
    /// sheet name → cells anchoring a shared formula
    shared_masters: HashMap<String, HashSet<(u32, u32)>>,
    /// sheet name → (row, col) → value
    staged: BTreeMap<String, BTreeMap<(u32, u32), CellWrite>>,
}

impl WorkbookPatcher {
    pub fn open(path: &Path) -> OutlookResult<Self> {
        let grid = Workbook::open(path, CellView::Formulas)?;

        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let workbook_xml = read_entry(&mut archive, "xl/workbook.xml")?;
        let rels_xml = read_entry(&mut archive, "xl/_rels/workbook.xml.rels")?;
        let parts = sheet_parts(&workbook_xml, &rels_xml)?;

        let mut shared_masters = HashMap::new();
        for (sheet, part) in &parts {
            let xml = read_entry(&mut archive, part)?;
            shared_masters.insert(sheet.clone(), scan_shared_masters(&xml)?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            grid,
            parts,
            shared_masters,
            staged: BTreeMap::new(),
        })
    }

    /// Current content of a sheet, staged writes included
    pub fn sheet(&self, name: &str) -> OutlookResult<&Worksheet> {
        self.grid.sheet(name)
    }

    /// Stage a cell write. Nothing touches the file until [`save`](Self::save).
    pub fn stage(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
        write: CellWrite,
    ) -> Result<(), CellWriteError> {
        self.check(sheet, row, col, &write)?;
        let grid_sheet = self
            .grid
            .sheet_mut(sheet)
            .map_err(|_| CellWriteError::UnknownSheet(sheet.to_string()))?;
        grid_sheet.set(row, col, CellValue::from(&write));
        self.staged
            .entry(sheet.to_string())
            .or_default()
            .insert((row, col), write);
        Ok(())
    }

    /// Would [`stage`](Self::stage) accept this write?
    pub fn check(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        write: &CellWrite,
    ) -> Result<(), CellWriteError> {
        if !self.parts.contains_key(sheet) {
            return Err(CellWriteError::UnknownSheet(sheet.to_string()));
        }
        if !(1..=MAX_ROWS).contains(&row) || !(1..=MAX_COLS).contains(&col) {
            return Err(CellWriteError::OutOfRange { row, col });
        }
        match write {
            CellWrite::Number(n) if !n.is_finite() => return Err(CellWriteError::NonFinite(*n)),
            CellWrite::Text(s) if s.chars().count() > MAX_TEXT_LEN => {
                return Err(CellWriteError::TextTooLong(s.chars().count()))
            }
            _ => {}
        }
        if self
            .shared_masters
            .get(sheet)
            .is_some_and(|m| m.contains(&(row, col)))
        {
            return Err(CellWriteError::SharedFormulaMaster(cell_ref(row, col)));
        }
        Ok(())
    }

    pub fn staged_count(&self) -> usize {
        self.staged.values().map(BTreeMap::len).sum()
    }

    /// Apply all staged cells to the file; returns the number of cells patched.
    pub fn save(self) -> OutlookResult<usize> {
        let count = self.staged_count();
        if count == 0 {
            return Ok(0);
        }

        let mut archive = ZipArchive::new(BufReader::new(File::open(&self.path)?))?;

        let mut patched: HashMap<String, Vec<u8>> = HashMap::new();
        let mut formulas_replaced = false;
        for (sheet, cells) in &self.staged {
            let part = self
                .parts
                .get(sheet)
                .ok_or_else(|| OutlookError::SheetNotFound(sheet.clone()))?;
            let xml = read_entry(&mut archive, part)?;
            let result = patch_sheet_xml(&xml, cells)?;
            formulas_replaced |= result.formulas_replaced;
            debug!(sheet = %sheet, part = %part, cells = cells.len(), "worksheet patched");
            patched.insert(part.clone(), result.xml);
        }
        let drop_calc_chain = formulas_replaced && archive.by_name(CALC_CHAIN_PART).is_ok();

        let tmp_path = self.path.with_extension("xlsx.tmp");
        let mut zip_writer = ZipWriter::new(File::create(&tmp_path)?);
        for i in 0..archive.len() {
            let name = archive.by_index_raw(i)?.name().to_string();

            if drop_calc_chain && name == CALC_CHAIN_PART {
                continue;
            }

            let replacement = if let Some(bytes) = patched.remove(&name) {
                Some(bytes)
            } else if drop_calc_chain && name == "[Content_Types].xml" {
                let xml = read_entry(&mut archive, &name)?;
                Some(remove_elements(&xml, b"Override", |attrs| {
                    attrs.get("PartName").is_some_and(|p| p == "/xl/calcChain.xml")
                })?)
            } else if drop_calc_chain && name == "xl/_rels/workbook.xml.rels" {
                let xml = read_entry(&mut archive, &name)?;
                Some(remove_elements(&xml, b"Relationship", |attrs| {
                    attrs.get("Type").is_some_and(|t| t.ends_with("/calcChain"))
                })?)
            } else {
                None
            };

            match replacement {
                Some(bytes) => {
                    zip_writer.start_file(name.as_str(), FileOptions::<()>::default())?;
                    zip_writer.write_all(&bytes)?;
                }
                None => {
                    let file = archive.by_index_raw(i)?;
                    zip_writer.raw_copy_file(file)?;
                }
            }
        }
        zip_writer.finish()?;
        drop(archive);

        fs::rename(&tmp_path, &self.path)?;
        info!(
            path = %self.path.display(),
            cells = count,
            calc_chain_dropped = drop_calc_chain,
            "workbook saved"
        );
        Ok(count)
    }
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> OutlookResult<String> {
    let mut file = archive.by_name(name)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

fn utf8(bytes: &[u8]) -> OutlookResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| OutlookError::Xml(e.to_string()))
}

/// Attributes of an element as unescaped strings keyed by local name
fn attributes(e: &BytesStart) -> OutlookResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.local_name().as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

/// Map sheet names to worksheet parts via workbook.xml and its relationships.
fn sheet_parts(workbook_xml: &str, rels_xml: &str) -> OutlookResult<HashMap<String, String>> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let attrs = attributes(&e)?;
                if let (Some(id), Some(target)) = (attrs.get("Id"), attrs.get("Target")) {
                    let part = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id.clone(), part);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut parts = HashMap::new();
    let mut reader = Reader::from_str(workbook_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let attrs = attributes(&e)?;
                let part = attrs.get("id").and_then(|id| targets.get(id));
                if let (Some(name), Some(part)) = (attrs.get("name"), part) {
                    if part.contains("worksheets/") {
                        parts.insert(name.clone(), part.clone());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

/// Cells holding `<f t="shared" ref="…">`, whose dependents would break if replaced
fn scan_shared_masters(xml: &str) -> OutlookResult<HashSet<(u32, u32)>> {
    let mut masters = HashSet::new();
    let mut current: Option<(u32, u32)> = None;
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                current = attributes(&e)?.get("r").and_then(|r| parse_cell_ref(r));
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                let attrs = attributes(&e)?;
                let shared = attrs.get("t").is_some_and(|t| t == "shared");
                if shared && attrs.contains_key("ref") {
                    if let Some(cell) = current {
                        masters.insert(cell);
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => current = None,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(masters)
}

struct PatchResult {
    xml: Vec<u8>,
    formulas_replaced: bool,
}

/// Streaming rewrite of one worksheet part
struct SheetPatch<'a> {
    /// row → col → value, drained as rows and cells are emitted
    pending: BTreeMap<u32, BTreeMap<u32, &'a CellWrite>>,
    /// Namespace prefix of SpreadsheetML elements (`""` or `"x:"`)
    prefix: String,
    writer: Writer<Cursor<Vec<u8>>>,
    formulas_replaced: bool,
}

impl<'a> SheetPatch<'a> {
    fn new(cells: &'a BTreeMap<(u32, u32), CellWrite>) -> Self {
        let mut pending: BTreeMap<u32, BTreeMap<u32, &'a CellWrite>> = BTreeMap::new();
        for ((row, col), write) in cells {
            pending.entry(*row).or_default().insert(*col, write);
        }
        Self {
            pending,
            prefix: String::new(),
            writer: Writer::new(Cursor::new(Vec::new())),
            formulas_replaced: false,
        }
    }

    fn tag(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    fn write_cell(
        &mut self,
        row: u32,
        col: u32,
        style: Option<&str>,
        write: &CellWrite,
    ) -> OutlookResult<()> {
        let reference = cell_ref(row, col);
        let mut start = BytesStart::new(self.tag("c"));
        start.push_attribute(("r", reference.as_str()));
        if let Some(s) = style {
            start.push_attribute(("s", s));
        }
        match write {
            CellWrite::Number(n) => {
                self.writer.write_event(Event::Start(start))?;
                self.writer.write_event(Event::Start(BytesStart::new(self.tag("v"))))?;
                self.writer
                    .write_event(Event::Text(BytesText::new(&n.to_string())))?;
                self.writer.write_event(Event::End(BytesEnd::new(self.tag("v"))))?;
            }
            CellWrite::Text(text) => {
                start.push_attribute(("t", "inlineStr"));
                self.writer.write_event(Event::Start(start))?;
                self.writer.write_event(Event::Start(BytesStart::new(self.tag("is"))))?;
                let mut t = BytesStart::new(self.tag("t"));
                t.push_attribute(("xml:space", "preserve"));
                self.writer.write_event(Event::Start(t))?;
                self.writer.write_event(Event::Text(BytesText::new(text)))?;
                self.writer.write_event(Event::End(BytesEnd::new(self.tag("t"))))?;
                self.writer.write_event(Event::End(BytesEnd::new(self.tag("is"))))?;
            }
        }
        self.writer.write_event(Event::End(BytesEnd::new(self.tag("c"))))?;
        Ok(())
    }

    /// Emit pending cells of `row` left of `before` (all of them when `None`)
    fn flush_cells(&mut self, row: u32, before: Option<u32>) -> OutlookResult<()> {
        let Some(cells) = self.pending.get_mut(&row) else {
            return Ok(());
        };
        let cols: Vec<u32> = cells
            .keys()
            .copied()
            .filter(|c| before.map_or(true, |b| *c < b))
            .collect();
        let writes: Vec<(u32, &CellWrite)> = cols
            .iter()
            .filter_map(|c| cells.remove(c).map(|w| (*c, w)))
            .collect();
        if cells.is_empty() {
            self.pending.remove(&row);
        }
        for (col, write) in writes {
            self.write_cell(row, col, None, write)?;
        }
        Ok(())
    }

    /// Emit whole new rows for pending rows above `before` (all when `None`)
    fn flush_rows(&mut self, before: Option<u32>) -> OutlookResult<()> {
        let rows: Vec<u32> = self
            .pending
            .keys()
            .copied()
            .filter(|r| before.map_or(true, |b| *r < b))
            .collect();
        for row in rows {
            let mut start = BytesStart::new(self.tag("row"));
            start.push_attribute(("r", row.to_string().as_str()));
            self.writer.write_event(Event::Start(start))?;
            self.flush_cells(row, None)?;
            self.writer.write_event(Event::End(BytesEnd::new(self.tag("row"))))?;
        }
        Ok(())
    }

    /// Copy of a `<row>` start tag without the `spans` hint, which may no longer be accurate
    fn row_start_without_spans(e: &BytesStart) -> OutlookResult<BytesStart<'static>> {
        let mut start = BytesStart::new(utf8(e.name().as_ref())?);
        for attr in e.attributes() {
            let attr = attr?;
            if attr.key.as_ref() != b"spans" {
                start.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
            }
        }
        Ok(start)
    }

    /// Copy or replace one existing `<c>`; returns true when its children must be skipped
    fn cell(
        &mut self,
        e: BytesStart,
        self_closing: bool,
        row: u32,
        last_col: &mut u32,
    ) -> OutlookResult<bool> {
        let attrs = attributes(&e)?;
        let col = attrs
            .get("r")
            .and_then(|r| parse_cell_ref(r))
            .map(|(_, c)| c)
            .unwrap_or(*last_col + 1);
        *last_col = col;
        self.flush_cells(row, Some(col))?;

        let replacement = self.pending.get_mut(&row).and_then(|cells| cells.remove(&col));
        if self.pending.get(&row).is_some_and(BTreeMap::is_empty) {
            self.pending.remove(&row);
        }

        match replacement {
            Some(write) => {
                self.write_cell(row, col, attrs.get("s").map(String::as_str), write)?;
                Ok(!self_closing)
            }
            None if self_closing => {
                self.writer.write_event(Event::Empty(e))?;
                Ok(false)
            }
            None => {
                self.writer.write_event(Event::Start(e))?;
                Ok(false)
            }
        }
    }

    fn run(mut self, xml: &str) -> OutlookResult<PatchResult> {
        let mut reader = Reader::from_str(xml);
        let mut in_sheet_data = false;
        let mut current_row: Option<u32> = None;
        let mut last_row: u32 = 0;
        let mut last_col: u32 = 0;
        let mut skipping_cell = false;

        loop {
            let event = reader.read_event()?;

            if skipping_cell {
                match &event {
                    Event::End(e) if e.local_name().as_ref() == b"c" => skipping_cell = false,
                    Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                        self.formulas_replaced = true;
                    }
                    Event::Eof => {
                        return Err(OutlookError::Xml("unterminated <c> element".to_string()))
                    }
                    _ => {}
                }
                continue;
            }

            match event {
                Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                    self.prefix = element_prefix(&e)?;
                    in_sheet_data = true;
                    self.writer.write_event(Event::Start(e))?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                    self.prefix = element_prefix(&e)?;
                    let name = utf8(e.name().as_ref())?;
                    self.writer.write_event(Event::Start(e))?;
                    self.flush_rows(None)?;
                    self.writer.write_event(Event::End(BytesEnd::new(name)))?;
                }
                Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                    self.flush_rows(None)?;
                    in_sheet_data = false;
                    self.writer.write_event(Event::End(e))?;
                }
                Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    let row = attributes(&e)?
                        .get("r")
                        .and_then(|r| r.parse::<u32>().ok())
                        .unwrap_or(last_row + 1);
                    self.flush_rows(Some(row))?;
                    current_row = Some(row);
                    last_col = 0;
                    if self.pending.contains_key(&row) {
                        let start = Self::row_start_without_spans(&e)?;
                        self.writer.write_event(Event::Start(start))?;
                    } else {
                        self.writer.write_event(Event::Start(e))?;
                    }
                }
                Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    let row = attributes(&e)?
                        .get("r")
                        .and_then(|r| r.parse::<u32>().ok())
                        .unwrap_or(last_row + 1);
                    self.flush_rows(Some(row))?;
                    last_row = row;
                    if self.pending.contains_key(&row) {
                        let start = Self::row_start_without_spans(&e)?;
                        let name = utf8(e.name().as_ref())?;
                        self.writer.write_event(Event::Start(start))?;
                        self.flush_cells(row, None)?;
                        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
                    } else {
                        self.writer.write_event(Event::Empty(e))?;
                    }
                }
                Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    if let Some(row) = current_row.take() {
                        self.flush_cells(row, None)?;
                        last_row = row;
                    }
                    self.writer.write_event(Event::End(e))?;
                }
                Event::Start(e) if e.local_name().as_ref() == b"c" => match current_row {
                    Some(row) => {
                        skipping_cell = self.cell(e, false, row, &mut last_col)?;
                    }
                    None => self.writer.write_event(Event::Start(e))?,
                },
                Event::Empty(e) if e.local_name().as_ref() == b"c" => match current_row {
                    Some(row) => {
                        self.cell(e, true, row, &mut last_col)?;
                    }
                    None => self.writer.write_event(Event::Empty(e))?,
                },
                Event::Eof => break,
                other => self.writer.write_event(other)?,
            }
        }

        if !self.pending.is_empty() {
            return Err(OutlookError::Xml(
                "worksheet has no <sheetData> element".to_string(),
            ));
        }

        Ok(PatchResult {
            xml: self.writer.into_inner().into_inner(),
            formulas_replaced: self.formulas_replaced,
        })
    }
}

fn element_prefix(e: &BytesStart) -> OutlookResult<String> {
    Ok(match e.name().prefix() {
        Some(p) => format!("{}:", utf8(p.as_ref())?),
        None => String::new(),
    })
}

fn patch_sheet_xml(
    xml: &str,
    cells: &BTreeMap<(u32, u32), CellWrite>,
) -> OutlookResult<PatchResult> {
    SheetPatch::new(cells).run(xml)
}

/// Drop every `<element …/>` whose attributes satisfy `predicate`
fn remove_elements<F>(xml: &str, element: &[u8], predicate: F) -> OutlookResult<Vec<u8>>
where
    F: Fn(&HashMap<String, String>) -> bool,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    loop {
        match reader.read_event()? {
            Event::Empty(e) if e.local_name().as_ref() == element => {
                if !predicate(&attributes(&e)?) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }
    Ok(writer.into_inner().into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(xml: &str, writes: &[((u32, u32), CellWrite)]) -> (String, bool) {
        let cells: BTreeMap<(u32, u32), CellWrite> = writes.iter().cloned().collect();
        let result = patch_sheet_xml(xml, &cells).unwrap();
        (String::from_utf8(result.xml).unwrap(), result.formulas_replaced)
    }

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="2" spans="1:3"><c r="A2" t="s"><v>0</v></c><c r="C2" s="4"><v>121</v></c></row><row r="5"><c r="B5" s="2"><f>SUM(B1:B4)</f><v>10</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn test_replace_keeps_style_and_neighbours() {
        let (xml, formulas) = patch(SHEET, &[((2, 3), CellWrite::Number(133.1))]);
        assert!(xml.contains(r#"<c r="C2" s="4"><v>133.1</v></c>"#));
        assert!(xml.contains(r#"<c r="A2" t="s"><v>0</v></c>"#));
        assert!(!xml.contains("spans"));
        assert!(xml.contains("<f>SUM(B1:B4)</f>"));
        assert!(!formulas);
    }

    #[test]
    fn test_insert_cells_in_column_order() {
        let (xml, _) = patch(
            SHEET,
            &[
                ((2, 2), CellWrite::Number(1.5)),
                ((2, 4), CellWrite::Text("Trend & Basis".to_string())),
            ],
        );
        let a = xml.find(r#"r="A2""#).unwrap();
        let b = xml.find(r#"<c r="B2"><v>1.5</v></c>"#).unwrap();
        let c = xml.find(r#"r="C2""#).unwrap();
        let d = xml
            .find(r#"<c r="D2" t="inlineStr"><is><t xml:space="preserve">Trend &amp; Basis</t></is></c>"#)
            .unwrap();
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn test_insert_new_rows_between_and_after() {
        let (xml, _) = patch(
            SHEET,
            &[
                ((1, 1), CellWrite::Number(1.0)),
                ((3, 1), CellWrite::Number(3.0)),
                ((9, 1), CellWrite::Number(9.0)),
            ],
        );
        let r1 = xml.find(r#"<row r="1"><c r="A1"><v>1</v></c></row>"#).unwrap();
        let r2 = xml.find(r#"<row r="2""#).unwrap();
        let r3 = xml.find(r#"<row r="3"><c r="A3"><v>3</v></c></row>"#).unwrap();
        let r5 = xml.find(r#"<row r="5""#).unwrap();
        let r9 = xml.find(r#"<row r="9"><c r="A9"><v>9</v></c></row>"#).unwrap();
        assert!(r1 < r2 && r2 < r3 && r3 < r5 && r5 < r9);
        assert!(r9 < xml.find("</sheetData>").unwrap());
    }

    #[test]
    fn test_replacing_formula_is_reported() {
        let (xml, formulas) = patch(SHEET, &[((5, 2), CellWrite::Number(42.0))]);
        assert!(formulas);
        assert!(xml.contains(r#"<c r="B5" s="2"><v>42</v></c>"#));
        assert!(!xml.contains("SUM(B1:B4)"));
    }

    #[test]
    fn test_empty_sheet_data_and_self_closing_cells() {
        let empty = r#"<worksheet><sheetData/></worksheet>"#;
        let (xml, _) = patch(empty, &[((4, 2), CellWrite::Number(7.0))]);
        assert_eq!(
            xml,
            r#"<worksheet><sheetData><row r="4"><c r="B4"><v>7</v></c></row></sheetData></worksheet>"#
        );

        let styled = r#"<worksheet><sheetData><row r="4"><c r="B4" s="9"/></row></sheetData></worksheet>"#;
        let (xml, _) = patch(styled, &[((4, 2), CellWrite::Number(7.0))]);
        assert!(xml.contains(r#"<row r="4"><c r="B4" s="9"><v>7</v></c></row>"#));
    }

    #[test]
    fn test_namespace_prefix_reused() {
        let prefixed = r#"<x:worksheet xmlns:x="urn:x"><x:sheetData><x:row r="1"><x:c r="A1"><x:v>1</x:v></x:c></x:row></x:sheetData></x:worksheet>"#;
        let (xml, _) = patch(prefixed, &[((1, 2), CellWrite::Number(2.0))]);
        assert!(xml.contains(r#"<x:c r="B1"><x:v>2</x:v></x:c></x:row>"#));
    }

    #[test]
    fn test_implicit_cell_references() {
        let implicit = r#"<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row></sheetData></worksheet>"#;
        let (xml, _) = patch(implicit, &[((1, 2), CellWrite::Number(5.0))]);
        assert!(xml.contains(r#"<c><v>1</v></c><c r="B1"><v>5</v></c></row>"#));
    }

    #[test]
    fn test_sheet_parts_resolution() {
        let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="BS (2)" sheetId="1" r:id="rId1"/><sheet name="G&amp;V" sheetId="2" r:id="rId2"/><sheet name="Chart" sheetId="3" r:id="rId3"/></sheets></workbook>"#;
        let rels = r#"<Relationships><Relationship Id="rId1" Type="http://x/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://x/worksheet" Target="/xl/worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://x/chartsheet" Target="chartsheets/sheet1.xml"/></Relationships>"#;
        let parts = sheet_parts(workbook, rels).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts["BS (2)"], "xl/worksheets/sheet1.xml");
        assert_eq!(parts["G&V"], "xl/worksheets/sheet2.xml");
    }

    #[test]
    fn test_shared_masters() {
        let xml = r#"<worksheet><sheetData><row r="3"><c r="D3"><f t="shared" ref="D3:D9" si="0">B3*2</f><v>2</v></c><c r="E3"><f t="shared" si="0"/><v>4</v></c></row></sheetData></worksheet>"#;
        let masters = scan_shared_masters(xml).unwrap();
        assert_eq!(masters.len(), 1);
        assert!(masters.contains(&(3, 4)));
    }

    #[test]
    fn test_remove_calc_chain_override() {
        let types = r#"<Types><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/calcChain.xml" ContentType="calc"/><Override PartName="/xl/workbook.xml" ContentType="wb"/></Types>"#;
        let out = remove_elements(types, b"Override", |a| {
            a.get("PartName").is_some_and(|p| p == "/xl/calcChain.xml")
        })
        .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(!out.contains("calcChain"));
        assert!(out.contains("/xl/workbook.xml"));
    }
}
