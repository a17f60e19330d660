use crate::chromosome::ChromosomeFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenomePreset {
    pub id: &'static str,
    pub name: &'static str,
    pub assembly_name: &'static str,
    pub chromosome_format: ChromosomeFormat,
    pub default_location: &'static str,
}

pub const GENOME_PRESETS: &[GenomePreset] = &[
    GenomePreset {
        id: "hg38",
        name: "Human (GRCh38/hg38)",
        assembly_name: "hg38",
        chromosome_format: ChromosomeFormat::Ensembl,
        default_location: "10:29,838,565..29,838,850",
    },
    GenomePreset {
        id: "hg38-ucsc",
        name: "Human (GRCh38/hg38) - UCSC",
        assembly_name: "hg38",
        chromosome_format: ChromosomeFormat::Ucsc,
        default_location: "chr7:155,799,529..155,812,871",
    },
];

pub fn genome_preset(id: &str) -> Option<&'static GenomePreset> {
    let wanted = id.trim();
    GENOME_PRESETS
        .iter()
        .find(|preset| preset.id.eq_ignore_ascii_case(wanted))
}

pub fn default_genome() -> &'static GenomePreset {
    &GENOME_PRESETS[0]
}
