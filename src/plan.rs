//! Catalog rendering, export and import.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::operation::Plan;

/// JSON document written by `volplan generate --out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogExport {
    pub max_len: usize,
    pub count: usize,
    pub plans: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub index: usize,
    pub fingerprint: String,
    pub operations: Plan,
}

impl CatalogExport {
    pub fn new(max_len: usize, plans: &[Plan]) -> Self {
        Self {
            max_len,
            count: plans.len(),
            plans: plans
                .iter()
                .enumerate()
                .map(|(index, plan)| CatalogEntry {
                    index,
                    fingerprint: plan.fingerprint(),
                    operations: plan.clone(),
                })
                .collect(),
        }
    }

    pub fn into_plans(self) -> Vec<Plan> {
        self.plans.into_iter().map(|e| e.operations).collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Catalog(CatalogExport),
    Plans(Vec<Plan>),
    Single(Plan),
}

/// Render the first `limit` plans, one per line, followed by the catalog size.
pub fn render_catalog(plans: &[Plan], limit: usize) -> String {
    let mut out = String::new();
    for (idx, plan) in plans.iter().take(limit).enumerate() {
        let _ = writeln!(out, "  {idx}. {plan}");
    }
    if plans.len() > limit {
        let _ = writeln!(out, "  ... {} more", plans.len() - limit);
    }
    let _ = writeln!(out, "Plans: {}", plans.len());
    out
}

pub fn print_catalog(plans: &[Plan], limit: usize) {
    print!("{}", render_catalog(plans, limit));
}

pub fn write_catalog(path: &Path, export: &CatalogExport) -> Result<()> {
    let json = serde_json::to_string_pretty(export).context("failed to serialize catalog")?;
    std::fs::write(path, json + "\n")
        .with_context(|| format!("failed to write catalog: {}", path.display()))
}

/// Read plans from a catalog export, a JSON list of plans, or a single plan.
pub fn read_plans(path: &Path) -> Result<Vec<Plan>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file: {}", path.display()))?;
    parse_plans(&text).with_context(|| format!("invalid plan file: {}", path.display()))
}

pub fn parse_plans(text: &str) -> Result<Vec<Plan>> {
    let file: PlanFile = serde_json::from_str(text).map_err(|e| {
        anyhow!("expected a catalog export, a list of plans or a single plan ({e})")
    })?;
    Ok(match file {
        PlanFile::Catalog(export) => export.into_plans(),
        PlanFile::Plans(plans) => plans,
        PlanFile::Single(plan) => vec![plan],
    })
}
