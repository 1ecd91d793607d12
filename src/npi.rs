use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExtractError;

const NPI_HEADER: &str = "npi";
const NPI_LEN: usize = 10;

// ASCII word boundaries: "a1234567890" is not an identifier, "#1234567890" is.
static NPI_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u:\b)[0-9]{10}(?-u:\b)").expect("NPI token pattern is valid")
});

pub fn is_valid_npi(s: &str) -> bool {
    s.len() == NPI_LEN && s.bytes().all(|b| b.is_ascii_digit())
}

/// Extract identifiers from uploaded text.
///
/// A file whose first line names an `npi` column is read column-wise; when
/// that yields nothing the whole text is scanned for 10-digit tokens. The
/// result is deduplicated by first occurrence.
pub fn extract_npis(content: &str) -> Vec<String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut found = extract_from_npi_column(content);
    if found.is_empty() {
        found = scan_npi_tokens(content);
    }
    dedup_first_seen(found)
}

pub fn extract_npis_from_bytes(bytes: &[u8]) -> Vec<String> {
    extract_npis(&String::from_utf8_lossy(bytes))
}

pub fn read_npis(path: &Path) -> Result<Vec<String>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(extract_npis_from_bytes(&bytes))
}

fn extract_from_npi_column(content: &str) -> Vec<String> {
    let Some(first_line) = content.lines().next() else {
        return Vec::new();
    };
    if !first_line.to_ascii_lowercase().contains(NPI_HEADER) {
        return Vec::new();
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut records = reader.records().filter_map(Result::ok);

    let Some(header) = records.next() else {
        return Vec::new();
    };
    let Some(col) = header
        .iter()
        .position(|h| clean_cell(h).eq_ignore_ascii_case(NPI_HEADER))
    else {
        return Vec::new();
    };

    records
        .filter_map(|row| row.get(col).map(clean_cell).map(str::to_string))
        .filter(|v| is_valid_npi(v))
        .collect()
}

fn scan_npi_tokens(content: &str) -> Vec<String> {
    content
        .lines()
        .flat_map(|line| NPI_TOKEN.find_iter(line).map(|m| m.as_str().to_string()))
        .collect()
}

fn clean_cell(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

fn dedup_first_seen(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
