//! Corpus-level evaluation of decoded transcripts: WER family, CER and BLEU.

mod bleu;
mod edit_distance;
mod normalizer;

use serde::Serialize;

use crate::error::ScoringError;

pub use bleu::corpus_bleu;
pub use edit_distance::{align_counts, EditCounts};
pub use normalizer::normalize_text;

/// Word-level alignment totals and the rates derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WordMeasures {
    pub hits: usize,
    pub substitutions: usize,
    pub deletions: usize,
    pub insertions: usize,
    pub wer: f64,
    pub mer: f64,
    pub wil: f64,
    pub wip: f64,
}

impl WordMeasures {
    fn from_counts(c: EditCounts) -> Self {
        let (h, s, d, i) = (
            c.hits as f64,
            c.substitutions as f64,
            c.deletions as f64,
            c.insertions as f64,
        );
        let errors = s + d + i;
        let wer = ratio(errors, h + s + d);
        let mer = ratio(errors, h + s + d + i);
        let wip = ratio(h, h + s + d) * ratio(h, h + s + i);
        Self {
            hits: c.hits,
            substitutions: c.substitutions,
            deletions: c.deletions,
            insertions: c.insertions,
            wer,
            mer,
            wil: 1.0 - wip,
            wip,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn check_pairs(references: &[String], hypotheses: &[String]) -> Result<(), ScoringError> {
    if references.len() != hypotheses.len() {
        return Err(ScoringError::shape(
            "metric computation",
            format!(
                "{} references for {} hypotheses",
                references.len(),
                hypotheses.len()
            ),
        ));
    }
    Ok(())
}

/// Word measures summed over all sentence pairs.
pub fn compute_measures(
    references: &[String],
    hypotheses: &[String],
) -> Result<WordMeasures, ScoringError> {
    check_pairs(references, hypotheses)?;
    let mut total = EditCounts::default();
    for (reference, hypothesis) in references.iter().zip(hypotheses) {
        let reference: Vec<&str> = reference.split_whitespace().collect();
        let hypothesis: Vec<&str> = hypothesis.split_whitespace().collect();
        total.accumulate(align_counts(&reference, &hypothesis));
    }
    Ok(WordMeasures::from_counts(total))
}

/// Character error rate over the corpus. Runs of whitespace count as one
/// space character; leading and trailing whitespace is ignored.
pub fn character_error_rate(
    references: &[String],
    hypotheses: &[String],
) -> Result<f64, ScoringError> {
    check_pairs(references, hypotheses)?;
    let mut total = EditCounts::default();
    for (reference, hypothesis) in references.iter().zip(hypotheses) {
        let reference: Vec<char> = collapse_spaces(reference).chars().collect();
        let hypothesis: Vec<char> = collapse_spaces(hypothesis).chars().collect();
        total.accumulate(align_counts(&reference, &hypothesis));
    }
    let reference_chars = (total.hits + total.substitutions + total.deletions) as f64;
    Ok(ratio(total.errors() as f64, reference_chars))
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalOptions {
    /// Lower-case and strip punctuation on both sides before scoring.
    pub normalize: bool,
    /// Add corpus BLEU (translation tasks).
    pub bleu: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalMetrics {
    pub cer: f64,
    #[serde(flatten)]
    pub words: WordMeasures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bleu: Option<f64>,
    pub num_sentences: usize,
}

impl EvalMetrics {
    /// Empty references are scored as `"-"` so every pair has a reference
    /// word to count against.
    pub fn compute(
        references: &[String],
        hypotheses: &[String],
        options: EvalOptions,
    ) -> Result<Self, ScoringError> {
        check_pairs(references, hypotheses)?;
        let prepare = |text: &String| {
            if options.normalize {
                normalize_text(text)
            } else {
                text.trim().to_string()
            }
        };
        let references: Vec<String> = references
            .iter()
            .map(prepare)
            .map(|r| if r.is_empty() { "-".to_string() } else { r })
            .collect();
        let hypotheses: Vec<String> = hypotheses.iter().map(prepare).collect();

        let words = compute_measures(&references, &hypotheses)?;
        let cer = character_error_rate(&references, &hypotheses)?;
        let bleu = options.bleu.then(|| corpus_bleu(&references, &hypotheses));
        tracing::debug!(
            sentences = references.len(),
            wer = words.wer,
            cer,
            "evaluation metrics computed"
        );
        Ok(Self {
            cer,
            words,
            bleu,
            num_sentences: references.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn measures_sum_over_corpus() {
        let refs = strings(&["the cat sat", "a dog"]);
        let hyps = strings(&["the cat sit", "a dog barks"]);
        let m = compute_measures(&refs, &hyps).unwrap();
        assert_eq!((m.hits, m.substitutions, m.deletions, m.insertions), (4, 1, 0, 1));
        assert!((m.wer - 2.0 / 5.0).abs() < 1e-12);
        assert!((m.mer - 2.0 / 6.0).abs() < 1e-12);
        let wip = (4.0 / 5.0) * (4.0 / 6.0);
        assert!((m.wip - wip).abs() < 1e-12);
        assert!((m.wil - (1.0 - wip)).abs() < 1e-12);
    }

    #[test]
    fn perfect_transcripts() {
        let refs = strings(&["hello world"]);
        let m = compute_measures(&refs, &refs).unwrap();
        assert_eq!(m.wer, 0.0);
        assert_eq!(m.wil, 0.0);
        assert_eq!(m.wip, 1.0);
    }

    #[test]
    fn cer_counts_characters() {
        let refs = strings(&["abc  de"]);
        let hyps = strings(&["abd de"]);
        // "abc de" vs "abd de": one substitution over six characters.
        let cer = character_error_rate(&refs, &hyps).unwrap();
        assert!((cer - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_pair_counts_are_rejected() {
        let err = compute_measures(&strings(&["a"]), &[]).unwrap_err();
        assert!(matches!(err, ScoringError::ShapeMismatch { .. }));
    }

    #[test]
    fn empty_reference_becomes_dash() {
        let report =
            EvalMetrics::compute(&strings(&[""]), &strings(&["-"]), EvalOptions::default())
                .unwrap();
        assert_eq!(report.words.wer, 0.0);
        assert_eq!(report.cer, 0.0);
        assert!(report.bleu.is_none());
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        let options = EvalOptions {
            normalize: true,
            bleu: false,
        };
        let report = EvalMetrics::compute(
            &strings(&["Hello, World!"]),
            &strings(&["hello world"]),
            options,
        )
        .unwrap();
        assert_eq!(report.words.wer, 0.0);

        let raw = EvalMetrics::compute(
            &strings(&["Hello, World!"]),
            &strings(&["hello world"]),
            EvalOptions::default(),
        )
        .unwrap();
        assert_eq!(raw.words.wer, 1.0);
    }

    #[test]
    fn report_serializes_flat() {
        let options = EvalOptions {
            normalize: false,
            bleu: true,
        };
        let refs = strings(&["one two three four five"]);
        let report = EvalMetrics::compute(&refs, &refs, options).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["wer"], 0.0);
        assert_eq!(json["hits"], 5);
        assert_eq!(json["bleu"], 1.0);
        assert_eq!(json["num_sentences"], 1);
    }
}
