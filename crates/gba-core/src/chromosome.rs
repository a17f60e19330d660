use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chromosome naming convention used by a reference assembly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChromosomeFormat {
    /// `chr`-prefixed names (`chr1`, `chrX`, `chrM`).
    Ucsc,
    /// Bare names (`1`, `X`, `MT`).
    Ensembl,
}

impl ChromosomeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChromosomeFormat::Ucsc => "ucsc",
            ChromosomeFormat::Ensembl => "ensembl",
        }
    }
}

impl Default for ChromosomeFormat {
    fn default() -> Self {
        Self::Ucsc
    }
}

impl fmt::Display for ChromosomeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChromosomeFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "ucsc" => Ok(ChromosomeFormat::Ucsc),
            "ensembl" => Ok(ChromosomeFormat::Ensembl),
            other => Err(format!("Unknown chromosome format: {other}")),
        }
    }
}

static AUTOSOMES: [&str; 22] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Canonical {
    Nuclear(&'static str),
    Mitochondrial,
}

fn canonical(name: &str) -> Option<Canonical> {
    let cleaned = name.trim().to_uppercase();
    let bare = cleaned.strip_prefix("CHR").unwrap_or(&cleaned);
    match bare {
        "X" => Some(Canonical::Nuclear("X")),
        "Y" => Some(Canonical::Nuclear("Y")),
        "M" | "MT" => Some(Canonical::Mitochondrial),
        other => AUTOSOMES
            .iter()
            .find(|autosome| **autosome == other)
            .map(|autosome| Canonical::Nuclear(*autosome)),
    }
}

/// Rewrites a chromosome name into `target` naming. Names outside the alias
/// table (scaffolds, non-human references) come back unchanged.
pub fn normalize(name: &str, target: ChromosomeFormat) -> String {
    match (canonical(name), target) {
        (Some(Canonical::Nuclear(key)), ChromosomeFormat::Ucsc) => format!("chr{key}"),
        (Some(Canonical::Nuclear(key)), ChromosomeFormat::Ensembl) => key.to_string(),
        (Some(Canonical::Mitochondrial), ChromosomeFormat::Ucsc) => "chrM".to_string(),
        (Some(Canonical::Mitochondrial), ChromosomeFormat::Ensembl) => "MT".to_string(),
        (None, _) => name.to_string(),
    }
}

/// Infers naming from a displayed reference name. Without a sample the
/// result is UCSC.
pub fn detect_format(sample_ref_name: Option<&str>) -> ChromosomeFormat {
    match sample_ref_name {
        Some(name) if !name.to_lowercase().starts_with("chr") => ChromosomeFormat::Ensembl,
        _ => ChromosomeFormat::Ucsc,
    }
}

pub fn is_valid_chromosome(name: &str) -> bool {
    canonical(name).is_some()
}

pub fn chromosome_aliases(name: &str) -> Vec<String> {
    match canonical(name) {
        Some(Canonical::Nuclear(key)) => vec![format!("chr{key}"), key.to_string()],
        Some(Canonical::Mitochondrial) => ["chrM", "M", "MT", "chrMT"]
            .iter()
            .map(|alias| alias.to_string())
            .collect(),
        None => vec![name.to_string()],
    }
}
