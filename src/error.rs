use thiserror::Error;

pub type OutlookResult<T> = Result<T, OutlookError>;

#[derive(Error, Debug)]
pub enum OutlookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Workbook read error: {0}")]
    Workbook(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    #[error("Sheet '{sheet}': header row with alias {aliases:?} not found")]
    HeaderNotFound { sheet: String, aliases: Vec<String> },

    #[error("Sheet '{sheet}': missing period columns in header: {missing:?}")]
    MissingPeriods { sheet: String, missing: Vec<String> },

    #[error("Sheet '{0}': no account column detected")]
    AccountColumnNotFound(String),

    #[error("Sheet '{sheet}': account mapping {path} is missing, run `outlook discover` first")]
    MappingMissing { sheet: String, path: String },

    #[error("Sheet '{sheet}' failed and fail_fast is set: {reason}")]
    RunAborted { sheet: String, reason: String },
}

impl From<calamine::XlsxError> for OutlookError {
    fn from(e: calamine::XlsxError) -> Self {
        OutlookError::Workbook(e.to_string())
    }
}

impl From<quick_xml::Error> for OutlookError {
    fn from(e: quick_xml::Error) -> Self {
        OutlookError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for OutlookError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        OutlookError::Xml(e.to_string())
    }
}

impl OutlookError {
    /// Sheet-level configuration errors skip the sheet; everything else is an I/O-class failure.
    pub fn is_sheet_config_error(&self) -> bool {
        matches!(
            self,
            OutlookError::SheetNotFound(_)
                | OutlookError::HeaderNotFound { .. }
                | OutlookError::MissingPeriods { .. }
                | OutlookError::AccountColumnNotFound(_)
                | OutlookError::MappingMissing { .. }
        )
    }
}
