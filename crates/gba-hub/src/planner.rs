//! Turns a chat query into a navigation target.

use gba_core::{is_valid_chromosome, normalize, ChromosomeFormat};
use regex::Regex;
use thiserror::Error;

pub const DEFAULT_SPAN: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneRecord {
    pub symbol: &'static str,
    pub chromosome: &'static str,
    pub start: u64,
    pub end: u64,
    pub description: &'static str,
}

pub const GENES: &[GeneRecord] = &[
    GeneRecord {
        symbol: "BRCA1",
        chromosome: "chr17",
        start: 43_044_295,
        end: 43_125_483,
        description: "Breast Cancer 1, Early Onset",
    },
    GeneRecord {
        symbol: "BRCA2",
        chromosome: "chr13",
        start: 32_315_086,
        end: 32_400_266,
        description: "Breast Cancer 2, Early Onset",
    },
    GeneRecord {
        symbol: "TP53",
        chromosome: "chr17",
        start: 7_661_779,
        end: 7_687_550,
        description: "Tumor Protein P53",
    },
    GeneRecord {
        symbol: "EGFR",
        chromosome: "chr7",
        start: 55_019_017,
        end: 55_211_628,
        description: "Epidermal Growth Factor Receptor",
    },
    GeneRecord {
        symbol: "MYC",
        chromosome: "chr8",
        start: 127_735_434,
        end: 127_742_951,
        description: "MYC Proto-Oncogene",
    },
];

pub fn lookup_gene(symbol: &str) -> Option<&'static GeneRecord> {
    let wanted = symbol.trim();
    GENES
        .iter()
        .find(|gene| gene.symbol.eq_ignore_ascii_case(wanted))
}

/// Something the user asked to look at, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub chromosome: String,
    pub start: u64,
    pub end: Option<u64>,
    pub gene: Option<&'static GeneRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNavigation {
    pub chromosome: String,
    pub chromosome_ucsc: String,
    pub chromosome_ensembl: String,
    pub start: u64,
    pub end: u64,
    pub gene_name: Option<String>,
}

impl PlannedNavigation {
    pub fn describe(&self) -> String {
        let span = format!("{}:{}-{}", self.chromosome, self.start, self.end);
        match &self.gene_name {
            Some(gene) => format!("{gene} ({span})"),
            None => span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Invalid chromosome name: {0}")]
    InvalidChromosome(String),
    #[error("Invalid start position: {0}. Must be greater than 0.")]
    InvalidStart(u64),
    #[error("Start position {0} is too large to add the default window")]
    StartOutOfRange(u64),
    #[error("End position ({end}) must be greater than start position ({start})")]
    InvalidRange { start: u64, end: u64 },
}

pub struct QueryPlanner {
    format: ChromosomeFormat,
    locus: Regex,
    word: Regex,
}

impl QueryPlanner {
    /// `format` selects which naming goes in the command's primary
    /// `chromosome` field; both namings are always sent.
    pub fn new(format: ChromosomeFormat) -> Self {
        Self {
            format,
            locus: Regex::new(
                r"(?i)\b(?:chr)?(\d{1,2}|X|Y|MT|M)\s*:\s*([\d,]+)(?:\s*(?:-|\.\.)\s*([\d,]+))?",
            )
            .expect("valid regex"),
            word: Regex::new(r"[A-Za-z0-9]+").expect("valid regex"),
        }
    }

    /// An explicit locus wins over a gene symbol mentioned in the same query.
    pub fn find_target(&self, query: &str) -> Option<Target> {
        if let Some(captures) = self.locus.captures(query) {
            let start = captures.get(2).and_then(|m| parse_position(m.as_str()));
            if let (Some(chromosome), Some(start)) = (captures.get(1), start) {
                return Some(Target {
                    chromosome: chromosome.as_str().to_string(),
                    start,
                    end: captures.get(3).and_then(|m| parse_position(m.as_str())),
                    gene: None,
                });
            }
        }
        self.word
            .find_iter(query)
            .find_map(|word| lookup_gene(word.as_str()))
            .map(|gene| Target {
                chromosome: gene.chromosome.to_string(),
                start: gene.start,
                end: Some(gene.end),
                gene: Some(gene),
            })
    }

    pub fn plan(&self, target: &Target) -> Result<PlannedNavigation, PlanError> {
        if !is_valid_chromosome(&target.chromosome) {
            return Err(PlanError::InvalidChromosome(target.chromosome.clone()));
        }
        if target.start == 0 {
            return Err(PlanError::InvalidStart(target.start));
        }
        let end = match target.end {
            Some(end) => end,
            None => target
                .start
                .checked_add(DEFAULT_SPAN)
                .ok_or(PlanError::StartOutOfRange(target.start))?,
        };
        if end <= target.start {
            return Err(PlanError::InvalidRange {
                start: target.start,
                end,
            });
        }
        let chromosome_ucsc = normalize(&target.chromosome, ChromosomeFormat::Ucsc);
        let chromosome_ensembl = normalize(&target.chromosome, ChromosomeFormat::Ensembl);
        let chromosome = match self.format {
            ChromosomeFormat::Ucsc => chromosome_ucsc.clone(),
            ChromosomeFormat::Ensembl => chromosome_ensembl.clone(),
        };
        Ok(PlannedNavigation {
            chromosome,
            chromosome_ucsc,
            chromosome_ensembl,
            start: target.start,
            end,
            gene_name: target.gene.map(|gene| gene.symbol.to_string()),
        })
    }
}

fn parse_position(raw: &str) -> Option<u64> {
    raw.replace(',', "").parse().ok()
}

pub fn capabilities_text() -> String {
    let symbols: Vec<_> = GENES.iter().map(|gene| gene.symbol).collect();
    format!(
        "I can move the genome browser for you. Ask for a gene ({}) or a locus such as chr17:7661779-7687550.",
        symbols.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gene_symbols_resolve_case_insensitively() {
        let planner = QueryPlanner::new(ChromosomeFormat::Ensembl);
        let target = planner.find_target("Show me tp53 please").expect("target");
        assert_eq!(target.gene.map(|gene| gene.symbol), Some("TP53"));

        let planned = planner.plan(&target).expect("plan");
        assert_eq!(planned.chromosome, "17");
        assert_eq!(planned.chromosome_ucsc, "chr17");
        assert_eq!(planned.chromosome_ensembl, "17");
        assert_eq!((planned.start, planned.end), (7_661_779, 7_687_550));
        assert_eq!(planned.describe(), "TP53 (17:7661779-7687550)");
    }

    #[test]
    fn explicit_locus_beats_gene_and_defaults_span() {
        let planner = QueryPlanner::new(ChromosomeFormat::Ucsc);
        let target = planner
            .find_target("near BRCA1, go to X:1,000,000")
            .expect("target");
        assert_eq!(target.gene, None);
        let planned = planner.plan(&target).expect("plan");
        assert_eq!(planned.chromosome, "chrX");
        assert_eq!((planned.start, planned.end), (1_000_000, 1_010_000));

        let ranged = planner.find_target("chr7:100..200").expect("target");
        assert_eq!(ranged.end, Some(200));
    }

    #[test]
    fn validation_rejects_bad_targets() {
        let planner = QueryPlanner::new(ChromosomeFormat::Ucsc);
        let zero = planner.find_target("chr1:0-50").expect("target");
        assert_eq!(planner.plan(&zero), Err(PlanError::InvalidStart(0)));

        let inverted = planner.find_target("chr2:500-100").expect("target");
        assert_eq!(
            planner.plan(&inverted),
            Err(PlanError::InvalidRange {
                start: 500,
                end: 100
            })
        );

        let bogus = Target {
            chromosome: "scaffold_12".to_string(),
            start: 1,
            end: None,
            gene: None,
        };
        assert!(matches!(
            planner.plan(&bogus),
            Err(PlanError::InvalidChromosome(_))
        ));
    }

    #[test]
    fn huge_start_without_end_is_rejected() {
        let planner = QueryPlanner::new(ChromosomeFormat::Ucsc);
        let target = planner
            .find_target("go to chr1:18446744073709551615")
            .expect("target");
        assert_eq!(target.start, u64::MAX);
        assert_eq!(planner.plan(&target), Err(PlanError::StartOutOfRange(u64::MAX)));

        let edge = planner
            .find_target(&format!("chr2:{}", u64::MAX - DEFAULT_SPAN))
            .expect("target");
        assert_eq!(planner.plan(&edge).map(|planned| planned.end), Ok(u64::MAX));
    }

    #[test]
    fn queries_without_targets() {
        let planner = QueryPlanner::new(ChromosomeFormat::Ucsc);
        assert_eq!(planner.find_target("what can you do?"), None);
        assert!(capabilities_text().contains("EGFR"));
        assert!(lookup_gene("myc").is_some());
    }
}
