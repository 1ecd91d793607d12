use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{QuoteStyle, Writer, WriterBuilder};

use crate::profile::DisplayProfile;

pub const CSV_HEADERS: [&str; 27] = [
    "Full Name",
    "Specialty",
    "Affiliation",
    "Location",
    "Degrees",
    "Gender",
    "Research Score",
    "Clinical Trials",
    "Publication Years",
    "Practice City",
    "Practice State",
    "Publications",
    "Top Journals",
    "Top Titles",
    "Influential Publications",
    "Conditions",
    "Interventions",
    "Leadership Roles",
    "Impact Summary",
    "Social Media",
    "Followers",
    "Top Interests",
    "Recent Activity",
    "Engagement Style",
    "Confidence",
    "NPI ID",
    "Professional Summary",
];

pub fn export_file_name(date: NaiveDate) -> String {
    format!("hcp_profiles_{}.csv", date.format("%Y-%m-%d"))
}

pub fn today_file_name() -> String {
    export_file_name(chrono::Utc::now().date_naive())
}

pub fn profiles_to_csv(profiles: &[&DisplayProfile]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());
    write_rows(&mut writer, profiles)?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed finishing CSV export: {}", e.error()))
}

/// Write the export next to `output_path` and move it into place.
pub fn write_csv_file(output_path: &Path, profiles: &[&DisplayProfile]) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating export directory {}", parent.display()))?;
    }

    let file_name = output_path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("hcp_profiles.csv");
    let tmp_path = output_path.with_file_name(format!("{file_name}.tmp"));

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(&tmp_path)
        .with_context(|| format!("Failed creating temp export {}", tmp_path.display()))?;
    write_rows(&mut writer, profiles)?;
    writer.flush().context("Failed flushing CSV export")?;
    drop(writer);

    fs::rename(&tmp_path, output_path).with_context(|| {
        format!(
            "Failed moving temp export {} to {}",
            tmp_path.display(),
            output_path.display()
        )
    })?;
    Ok(())
}

fn write_rows<W: std::io::Write>(
    writer: &mut Writer<W>,
    profiles: &[&DisplayProfile],
) -> Result<()> {
    writer
        .write_record(CSV_HEADERS)
        .context("Failed writing CSV export header")?;
    for p in profiles {
        writer
            .write_record(csv_row(p))
            .with_context(|| format!("Failed writing CSV export row for {}", p.key))?;
    }
    Ok(())
}

fn csv_row(p: &DisplayProfile) -> [String; 27] {
    let followers = if p.followers.linkedin.is_empty() {
        "0".to_string()
    } else {
        p.followers.linkedin.clone()
    };
    [
        p.full_name.clone(),
        p.specialty.clone(),
        p.affiliation.clone(),
        p.location.clone(),
        p.degrees.clone(),
        p.gender.clone(),
        p.research_prestige_score.to_string(),
        p.total_trials.to_string(),
        p.publication_years.clone(),
        p.practice_city.clone(),
        p.practice_state.clone(),
        p.publications.to_string(),
        p.top_publication_journals.clone(),
        p.top_publication_titles.clone(),
        p.top_influential_publications.clone(),
        p.conditions.clone(),
        p.interventions.clone(),
        p.leadership_roles.clone(),
        p.impact_summary.clone(),
        p.social_media_handles.linkedin.clone(),
        followers,
        p.top_interests.join("; "),
        p.recent_activity.clone(),
        p.engagement_style.clone(),
        format!("{}%", p.confidence),
        p.npi.clone(),
        p.summary.clone(),
    ]
}
