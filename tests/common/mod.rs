//! Shared fixtures: planning workbooks built with rust_xlsxwriter, read back with calamine
#![allow(dead_code)]

use calamine::{open_workbook, Data, Reader, Xlsx};
use royalbit_outlook::config::PipelineConfig;
use rust_xlsxwriter::{Formula, Workbook};
use std::fs;
use std::path::{Path, PathBuf};

/// GuV sheet, header in row 3 (1-based), labels in column B:
///
/// | row | B               | C t-2 | D t-1 | E t0 | F t1      | I reason |
/// |-----|-----------------|-------|-------|------|-----------|----------|
/// | 4   | Umsatzerlöse    | 100   | 110   | 121  |           |          |
/// | 5   | Materialaufwand | 50    | 55    | 60   | =E5*1.05  |          |
/// | 6   | Rohertrag       | 50    | 55    | 61   | =F4-F5    |          |
/// | 7   | Personalaufwand | -     |       | -    |           |          |
/// | 8   | Sonstiges       | 1     | 1     | 1    |           |          |
pub fn write_planning_workbook(path: &Path) {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("GuV").unwrap();
    sheet.write_string(0, 0, "Gewinn- und Verlustrechnung").unwrap();
    for (i, label) in ["t-2", "t-1", "t0", "t1", "t2", "t3", "Begründung"]
        .iter()
        .enumerate()
    {
        sheet.write_string(2, 2 + i as u16, *label).unwrap();
    }

    sheet.write_string(3, 1, "Umsatzerlöse").unwrap();
    sheet.write_number(3, 2, 100.0).unwrap();
    sheet.write_number(3, 3, 110.0).unwrap();
    sheet.write_number(3, 4, 121.0).unwrap();

    sheet.write_string(4, 1, "Materialaufwand").unwrap();
    sheet.write_number(4, 2, 50.0).unwrap();
    sheet.write_number(4, 3, 55.0).unwrap();
    sheet.write_number(4, 4, 60.0).unwrap();
    sheet
        .write_formula(4, 5, Formula::new("=E5*1.05").set_result("63"))
        .unwrap();

    sheet.write_string(5, 1, "Rohertrag").unwrap();
    sheet.write_number(5, 2, 50.0).unwrap();
    sheet.write_number(5, 3, 55.0).unwrap();
    sheet.write_number(5, 4, 61.0).unwrap();
    sheet
        .write_formula(5, 5, Formula::new("=F4-F5").set_result("-63"))
        .unwrap();

    sheet.write_string(6, 1, "Personalaufwand").unwrap();
    sheet.write_string(6, 2, "-").unwrap();
    sheet.write_string(6, 4, "-").unwrap();

    sheet.write_string(7, 1, "Sonstiges").unwrap();
    sheet.write_number(7, 2, 1.0).unwrap();
    sheet.write_number(7, 3, 1.0).unwrap();
    sheet.write_number(7, 4, 1.0).unwrap();

    let notes = workbook.add_worksheet();
    notes.set_name("Notizen").unwrap();
    notes.write_string(0, 0, "Keine Planung hier").unwrap();

    workbook.save(path).unwrap();
}

/// STAFF sheet whose history columns C, D carry no period header:
///
/// | row | A         | C   | D   | E Gesamt 12/t0 | F t1 | G t2 | H t3 |
/// |-----|-----------|-----|-----|----------------|------|------|------|
/// | 2   | Gehälter  | 100 | 110 | 121            |      |      |      |
pub fn write_staff_workbook(path: &Path) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("STAFF (2)").unwrap();
    sheet.write_string(0, 0, "Position").unwrap();
    for (i, label) in ["2022", "2023", "Gesamt 12/t0", "t1", "t2", "t3"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, 2 + i as u16, *label).unwrap();
    }
    sheet.write_string(1, 0, "Gehälter").unwrap();
    sheet.write_number(1, 2, 100.0).unwrap();
    sheet.write_number(1, 3, 110.0).unwrap();
    sheet.write_number(1, 4, 121.0).unwrap();
    workbook.save(path).unwrap();
}

pub const CONFIG_YAML: &str = r#"
source: plan.xlsx
output: out/plan_forecast.xlsx
mapping_dir: config
log_dir: logs
sheets:
  - name: GuV
    forecast_accounts: ["Umsatzerlöse", "Materialaufwand", "Personalaufwand"]
    readonly_accounts: ["Rohertrag"]
"#;

/// Temp project with `plan.xlsx` and `sheets.yaml` (contents: `yaml`)
pub struct Project {
    pub dir: tempfile::TempDir,
}

impl Project {
    pub fn new(yaml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_planning_workbook(&dir.path().join("plan.xlsx"));
        fs::write(dir.path().join("sheets.yaml"), yaml).unwrap();
        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path("sheets.yaml")
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::from_file(&self.config_path()).unwrap()
    }

    pub fn output(&self) -> PathBuf {
        self.path("out/plan_forecast.xlsx")
    }
}

/// Cached value at 1-based (row, col)
pub fn read_value(path: &Path, sheet: &str, row: u32, col: u32) -> Data {
    let mut xlsx: Xlsx<_> = open_workbook(path).unwrap();
    let range = xlsx.worksheet_range(sheet).unwrap();
    range
        .get_value((row - 1, col - 1))
        .cloned()
        .unwrap_or(Data::Empty)
}

pub fn read_number(path: &Path, sheet: &str, row: u32, col: u32) -> Option<f64> {
    match read_value(path, sheet, row, col) {
        Data::Float(f) => Some(f),
        Data::Int(i) => Some(i as f64),
        _ => None,
    }
}

pub fn read_string(path: &Path, sheet: &str, row: u32, col: u32) -> Option<String> {
    match read_value(path, sheet, row, col) {
        Data::String(s) => Some(s),
        _ => None,
    }
}

/// Formula text (without `=`) at 1-based (row, col), empty if none
pub fn read_formula(path: &Path, sheet: &str, row: u32, col: u32) -> String {
    let mut xlsx: Xlsx<_> = open_workbook(path).unwrap();
    let range = xlsx.worksheet_formula(sheet).unwrap();
    range
        .get_value((row - 1, col - 1))
        .cloned()
        .unwrap_or_default()
}

/// Raw bytes of one archive entry
pub fn zip_entry(path: &Path, name: &str) -> Vec<u8> {
    use std::io::Read;
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    bytes
}
