use anyhow::{Context, anyhow};

use crate::cli::{EnrichArgs, ExtractArgs};
use crate::client::EnrichmentClient;
use crate::export::{today_file_name, write_csv_file};
use crate::npi::read_npis;
use crate::profile::reconcile;
use crate::view::{Sort, SortDirection, SortKey, ViewState};

pub fn extract(cmd: ExtractArgs) -> anyhow::Result<()> {
    let npis = read_npis(&cmd.file)?;
    println!("{}", serde_json::to_string_pretty(&npis)?);
    Ok(())
}

pub async fn enrich(cmd: EnrichArgs) -> anyhow::Result<()> {
    let mut view = ViewState::default();
    if let Some(term) = &cmd.search {
        view.set_search(term.as_str());
    }
    if let Some(sort) = &cmd.sort {
        let key = SortKey::parse(sort).ok_or_else(|| anyhow!("unknown sort key: {sort}"))?;
        let direction = if cmd.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        view.sort = Some(Sort { key, direction });
    }

    let npis = read_npis(&cmd.file)?;
    println!(
        "Discovered {} unique NPIs in {}.",
        npis.len(),
        cmd.file.display()
    );

    let results = if npis.is_empty() {
        println!("Nothing to enrich; writing an empty export.");
        Vec::new()
    } else {
        let client = EnrichmentClient::new(cmd.backend.client_config())
            .context("Failed creating HTTP client")?;
        client
            .fetch_profiles(&npis)
            .await
            .with_context(|| format!("Enrichment via {} failed", cmd.backend.backend_url))?
    };
    if results.len() < npis.len() {
        println!(
            "Backend returned {} of {} requested profiles.",
            results.len(),
            npis.len()
        );
    }

    let profiles = reconcile(&npis, results);
    let rows = view.apply(&profiles);
    let output = cmd.output.unwrap_or_else(|| today_file_name().into());
    write_csv_file(&output, &rows)?;
    println!("Wrote {} profiles to {}", rows.len(), output.display());
    Ok(())
}
