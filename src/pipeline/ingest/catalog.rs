//! Static biomarker catalog.
//!
//! Maps the spellings laboratories actually print (Portuguese, English,
//! abbreviations) onto one canonical name, category and default unit. Keys
//! are stored already folded (see [`text::fold`]).

use super::text;
use crate::models::NormalizationKind;

/// Leukocyte differential subtypes reported both as % and as absolute counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Differential {
    Neutrophils,
    Segmented,
    Band,
    Lymphocytes,
    Monocytes,
    Eosinophils,
    Basophils,
}

/// What the rest of the pipeline needs to know about a biomarker beyond its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Plain,
    RedCells,
    WhiteCells,
    Platelets,
    Differential(Differential),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogEntry {
    pub canonical: &'static str,
    pub category: &'static str,
    pub unit: &'static str,
    pub kind: MarkerKind,
}

/// Result of looking a raw name up in the catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogMatch {
    pub entry: &'static CatalogEntry,
    pub kind: NormalizationKind,
    pub confidence: f64,
}

const fn entry(canonical: &'static str, category: &'static str, unit: &'static str, kind: MarkerKind) -> CatalogEntry {
    CatalogEntry { canonical, category, unit, kind }
}

use MarkerKind::*;

const HEMOGLOBIN: CatalogEntry = entry("Hemoglobina", "hematologico", "g/dL", Plain);
const RED_CELLS: CatalogEntry = entry("Hemácias", "hematologico", "milhões/mm³", RedCells);
const HEMATOCRIT: CatalogEntry = entry("Hematócrito", "hematologico", "%", Plain);
const MCV: CatalogEntry = entry("VCM", "hematologico", "fL", Plain);
const MCH: CatalogEntry = entry("HCM", "hematologico", "pg", Plain);
const MCHC: CatalogEntry = entry("CHCM", "hematologico", "g/dL", Plain);
const RDW: CatalogEntry = entry("RDW", "hematologico", "%", Plain);
const LEUKOCYTES: CatalogEntry = entry("Leucócitos", "hematologico", "/mm³", WhiteCells);
const NEUTROPHILS: CatalogEntry = entry("Neutrófilos", "hematologico", "%", Differential(Differential::Neutrophils));
const SEGMENTED: CatalogEntry = entry("Segmentados", "hematologico", "%", Differential(Differential::Segmented));
const BAND: CatalogEntry = entry("Bastonetes", "hematologico", "%", Differential(Differential::Band));
const LYMPHOCYTES: CatalogEntry = entry("Linfócitos", "hematologico", "%", Differential(Differential::Lymphocytes));
const MONOCYTES: CatalogEntry = entry("Monócitos", "hematologico", "%", Differential(Differential::Monocytes));
const EOSINOPHILS: CatalogEntry = entry("Eosinófilos", "hematologico", "%", Differential(Differential::Eosinophils));
const BASOPHILS: CatalogEntry = entry("Basófilos", "hematologico", "%", Differential(Differential::Basophils));
const PLATELETS: CatalogEntry = entry("Plaquetas", "hematologico", "/mm³", Platelets);
const GLUCOSE: CatalogEntry = entry("Glicemia Jejum", "metabolico", "mg/dL", Plain);
const HBA1C: CatalogEntry = entry("HbA1c", "metabolico", "%", Plain);
const INSULIN: CatalogEntry = entry("Insulina", "metabolico", "μUI/mL", Plain);
const HOMA_IR: CatalogEntry = entry("HOMA-IR", "metabolico", "", Plain);
const TOTAL_CHOLESTEROL: CatalogEntry = entry("Colesterol Total", "metabolico", "mg/dL", Plain);
const LDL: CatalogEntry = entry("LDL", "metabolico", "mg/dL", Plain);
const HDL: CatalogEntry = entry("HDL", "metabolico", "mg/dL", Plain);
const VLDL: CatalogEntry = entry("VLDL", "metabolico", "mg/dL", Plain);
const TRIGLYCERIDES: CatalogEntry = entry("Triglicérides", "metabolico", "mg/dL", Plain);
const CPK: CatalogEntry = entry("CPK", "metabolico", "U/L", Plain);
const FERRITIN: CatalogEntry = entry("Ferritina", "marcadores_inflamatorios", "ng/mL", Plain);
const CRP: CatalogEntry = entry("PCR Ultra Sensível", "marcadores_inflamatorios", "mg/L", Plain);
const ESR: CatalogEntry = entry("VHS", "marcadores_inflamatorios", "mm/h", Plain);
const HOMOCYSTEINE: CatalogEntry = entry("Homocisteína", "marcadores_inflamatorios", "μmol/L", Plain);
const UREA: CatalogEntry = entry("Uréia", "renal", "mg/dL", Plain);
const CREATININE: CatalogEntry = entry("Creatinina", "renal", "mg/dL", Plain);
const EGFR: CatalogEntry = entry("TFG CKD-EPI", "renal", "mL/min/1.73m²", Plain);
const URIC_ACID: CatalogEntry = entry("Ácido Úrico", "hepatico", "mg/dL", Plain);
const AST: CatalogEntry = entry("TGO", "hepatico", "U/L", Plain);
const ALT: CatalogEntry = entry("TGP", "hepatico", "U/L", Plain);
const GGT: CatalogEntry = entry("Gama GT", "hepatico", "U/L", Plain);
const ALK_PHOS: CatalogEntry = entry("Fosfatase Alcalina", "hepatico", "U/L", Plain);
const BILIRUBIN_TOTAL: CatalogEntry = entry("Bilirrubina Total", "hepatico", "mg/dL", Plain);
const ALBUMIN: CatalogEntry = entry("Albumina", "hepatico", "g/dL", Plain);
const TSH: CatalogEntry = entry("TSH", "hormonal", "µUI/mL", Plain);
const FREE_T4: CatalogEntry = entry("T4 Livre", "hormonal", "ng/dL", Plain);
const VITAMIN_D: CatalogEntry = entry("Vitamina D", "vitaminas_minerais", "ng/mL", Plain);
const VITAMIN_B12: CatalogEntry = entry("Vitamina B12", "vitaminas_minerais", "pg/mL", Plain);
const SODIUM: CatalogEntry = entry("Sódio", "ions", "mEq/L", Plain);
const POTASSIUM: CatalogEntry = entry("Potássio", "ions", "mEq/L", Plain);

/// (folded key, entry). Order matters only for partial matches of equal length.
static SYNONYMS: &[(&str, &CatalogEntry)] = &[
    ("hemoglobina", &HEMOGLOBIN),
    ("hb", &HEMOGLOBIN),
    ("hgb", &HEMOGLOBIN),
    ("hemacias", &RED_CELLS),
    ("hemacia", &RED_CELLS),
    ("eritrocitos", &RED_CELLS),
    ("rbc", &RED_CELLS),
    ("hematocrito", &HEMATOCRIT),
    ("ht", &HEMATOCRIT),
    ("hct", &HEMATOCRIT),
    ("vcm", &MCV),
    ("volume corpuscular medio", &MCV),
    ("hcm", &MCH),
    ("hemoglobina corpuscular media", &MCH),
    ("chcm", &MCHC),
    ("concentracao hemoglobina corpuscular media", &MCHC),
    ("rdw", &RDW),
    ("rdw-cv", &RDW),
    ("leucocitos", &LEUKOCYTES),
    ("leucocitos totais", &LEUKOCYTES),
    ("wbc", &LEUKOCYTES),
    ("neutrofilos", &NEUTROPHILS),
    ("neutrofilos absoluto", &NEUTROPHILS),
    ("segmentados", &SEGMENTED),
    ("neutrofilos segmentados", &SEGMENTED),
    ("segmentados (absoluto)", &SEGMENTED),
    ("bastonetes", &BAND),
    ("bastonetes (absoluto)", &BAND),
    ("linfocitos", &LYMPHOCYTES),
    ("linfocitos absoluto", &LYMPHOCYTES),
    ("linfocitos tipicos", &LYMPHOCYTES),
    ("monocitos", &MONOCYTES),
    ("monocitos absoluto", &MONOCYTES),
    ("mono", &MONOCYTES),
    ("eosinofilos", &EOSINOPHILS),
    ("eosinofilos (absoluto)", &EOSINOPHILS),
    ("eos", &EOSINOPHILS),
    ("basofilos", &BASOPHILS),
    ("basofilos (absoluto)", &BASOPHILS),
    ("baso", &BASOPHILS),
    ("plaquetas", &PLATELETS),
    ("plt", &PLATELETS),
    ("platelet", &PLATELETS),
    ("glicemia jejum", &GLUCOSE),
    ("glicose", &GLUCOSE),
    ("glicose jejum", &GLUCOSE),
    ("glicemia", &GLUCOSE),
    ("glucose", &GLUCOSE),
    ("glicemia de jejum", &GLUCOSE),
    ("glicose em jejum", &GLUCOSE),
    ("hba1c", &HBA1C),
    ("hemoglobina glicada", &HBA1C),
    ("hemoglobina glicosilada", &HBA1C),
    ("a1c", &HBA1C),
    ("insulina", &INSULIN),
    ("insulina basal", &INSULIN),
    ("homa ir", &HOMA_IR),
    ("homa-ir", &HOMA_IR),
    ("colesterol total", &TOTAL_CHOLESTEROL),
    ("col total", &TOTAL_CHOLESTEROL),
    ("ct", &TOTAL_CHOLESTEROL),
    ("total cholesterol", &TOTAL_CHOLESTEROL),
    ("ldl", &LDL),
    ("colesterol ldl", &LDL),
    ("ldl colesterol", &LDL),
    ("ldl-c", &LDL),
    ("hdl", &HDL),
    ("colesterol hdl", &HDL),
    ("hdl colesterol", &HDL),
    ("hdl-c", &HDL),
    ("vldl", &VLDL),
    ("vldl colesterol", &VLDL),
    ("triglicerides", &TRIGLYCERIDES),
    ("triglicerideos", &TRIGLYCERIDES),
    ("triglycerides", &TRIGLYCERIDES),
    ("tg", &TRIGLYCERIDES),
    ("cpk", &CPK),
    ("ck", &CPK),
    ("creatina fosfoquinase", &CPK),
    ("ferritina", &FERRITIN),
    ("ferritin", &FERRITIN),
    ("ferritina serica", &FERRITIN),
    ("pcr", &CRP),
    ("pcr ultra sensivel", &CRP),
    ("pcr ultrassensivel", &CRP),
    ("proteina c reativa", &CRP),
    ("hs-crp", &CRP),
    ("vhs", &ESR),
    ("velocidade de hemossedimentacao", &ESR),
    ("esr", &ESR),
    ("homocisteina", &HOMOCYSTEINE),
    ("ureia", &UREA),
    ("creatinina", &CREATININE),
    ("creatinine", &CREATININE),
    ("tfg", &EGFR),
    ("tfg ckd-epi", &EGFR),
    ("egfr", &EGFR),
    ("acido urico", &URIC_ACID),
    ("tgo", &AST),
    ("ast", &AST),
    ("tgp", &ALT),
    ("alt", &ALT),
    ("gama gt", &GGT),
    ("ggt", &GGT),
    ("gama glutamil transferase", &GGT),
    ("fosfatase alcalina", &ALK_PHOS),
    ("bilirrubina total", &BILIRUBIN_TOTAL),
    ("albumina", &ALBUMIN),
    ("tsh", &TSH),
    ("hormonio tireoestimulante", &TSH),
    ("t4 livre", &FREE_T4),
    ("t4l", &FREE_T4),
    ("vitamina d", &VITAMIN_D),
    ("25-oh vitamina d", &VITAMIN_D),
    ("vitamina b12", &VITAMIN_B12),
    ("sodio", &SODIUM),
    ("na", &SODIUM),
    ("potassio", &POTASSIUM),
    ("k", &POTASSIUM),
];

/// Specimen words that put a name outside the blood panel this catalog covers.
const OTHER_SPECIMENS: &[&str] = &[
    "urina", "urine", "urinario", "urinaria", "eas", "sedimento", "fezes", "feces", "liquor", "lcr",
    "escarro",
];

/// Look a raw biomarker name up.
///
/// Exact key hit on the canonical spelling is `Exact`, any other key hit is
/// `Synonym`. Keys longer than two characters also match as a whole-word
/// run inside a longer name (`Fuzzy`); the longest such key wins. Names
/// qualified with another specimen ("Leucócitos (urina)") never match
/// fuzzily.
pub fn lookup(raw_name: &str) -> Option<CatalogMatch> {
    let folded = text::fold(raw_name);
    if folded.is_empty() {
        return None;
    }

    if let Some(&(_, entry)) = SYNONYMS.iter().find(|(key, _)| *key == folded) {
        let kind = if text::fold(entry.canonical) == folded {
            NormalizationKind::Exact
        } else {
            NormalizationKind::Synonym
        };
        return Some(CatalogMatch {
            entry,
            kind,
            confidence: if kind == NormalizationKind::Exact { 1.0 } else { 0.95 },
        });
    }

    let words: Vec<&str> = folded
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';' | ':' | '/'))
        .filter(|w| !w.is_empty())
        .collect();
    if words.iter().any(|w| OTHER_SPECIMENS.contains(w)) {
        return None;
    }
    SYNONYMS
        .iter()
        .filter(|(key, _)| key.len() > 2 && contains_word_run(&words, key))
        .max_by_key(|(key, _)| key.len())
        .map(|&(_, entry)| CatalogMatch {
            entry,
            kind: NormalizationKind::Fuzzy,
            confidence: 0.8,
        })
}

/// Canonical name for grouping; unknown names fall back to their folded form.
pub fn canonical_key(raw_name: &str) -> String {
    match lookup(raw_name) {
        Some(m) => text::fold(m.entry.canonical),
        None => text::fold(raw_name),
    }
}

fn contains_word_run(words: &[&str], key: &str) -> bool {
    let key_words: Vec<&str> = key.split(' ').collect();
    words
        .windows(key_words.len())
        .any(|window| window == key_words.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_spelling_is_exact() {
        let m = lookup("Hemoglobina").unwrap();
        assert_eq!(m.entry.canonical, "Hemoglobina");
        assert_eq!(m.kind, NormalizationKind::Exact);
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn accents_fold_onto_canonical() {
        let m = lookup("LEUCÓCITOS").unwrap();
        assert_eq!(m.entry.canonical, "Leucócitos");
        assert_eq!(m.kind, NormalizationKind::Exact);
    }

    #[test]
    fn abbreviation_is_synonym() {
        let m = lookup("WBC").unwrap();
        assert_eq!(m.entry.canonical, "Leucócitos");
        assert_eq!(m.kind, NormalizationKind::Synonym);
        assert_eq!(m.entry.kind, MarkerKind::WhiteCells);
    }

    #[test]
    fn segmented_neutrophils_fold_to_segmented() {
        assert_eq!(canonical_key("Neutrófilos Segmentados"), canonical_key("segmentados"));
        assert_eq!(
            lookup("Segmentados").unwrap().entry.kind,
            MarkerKind::Differential(Differential::Segmented)
        );
    }

    #[test]
    fn longer_name_matches_whole_words_only() {
        let m = lookup("Glicose plasmática").unwrap();
        assert_eq!(m.entry.canonical, "Glicemia Jejum");
        assert_eq!(m.kind, NormalizationKind::Fuzzy);

        // "hb" is too short to match inside a longer name
        assert!(lookup("SHBG").is_none());
    }

    #[test]
    fn other_specimens_are_not_blood_markers() {
        assert!(lookup("Leucócitos (urina)").is_none());
        assert!(lookup("Hemácias na urina").is_none());
        assert!(lookup("Leucócitos - EAS").is_none());
        assert_eq!(lookup("Leucócitos (sangue)").unwrap().entry.kind, MarkerKind::WhiteCells);
    }

    #[test]
    fn longest_partial_key_wins() {
        let m = lookup("Colesterol HDL direto").unwrap();
        assert_eq!(m.entry.canonical, "HDL");
    }

    #[test]
    fn unknown_name_keys_on_folded_text() {
        assert!(lookup("Marcador Exótico").is_none());
        assert_eq!(canonical_key("  Marcador   Exótico "), "marcador exotico");
    }
}
