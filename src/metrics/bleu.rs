use std::collections::HashMap;

const MAX_ORDER: usize = 4;

/// Corpus BLEU with one reference per hypothesis, n-grams up to 4, no
/// smoothing. Returns a value in `[0, 1]`.
pub fn corpus_bleu(references: &[String], hypotheses: &[String]) -> f64 {
    let mut matches = [0usize; MAX_ORDER];
    let mut possible = [0usize; MAX_ORDER];
    let mut reference_length = 0usize;
    let mut hypothesis_length = 0usize;

    for (reference, hypothesis) in references.iter().zip(hypotheses) {
        let reference = tokenize_13a(reference);
        let hypothesis = tokenize_13a(hypothesis);
        reference_length += reference.len();
        hypothesis_length += hypothesis.len();

        for order in 1..=MAX_ORDER {
            let reference_counts = ngram_counts(&reference, order);
            for (gram, count) in ngram_counts(&hypothesis, order) {
                let clip = reference_counts.get(&gram).copied().unwrap_or(0);
                matches[order - 1] += count.min(clip);
            }
            possible[order - 1] += hypothesis.len().saturating_sub(order - 1);
        }
    }

    let mut log_precision_sum = 0.0f64;
    for order in 0..MAX_ORDER {
        if possible[order] == 0 || matches[order] == 0 {
            return 0.0;
        }
        log_precision_sum += (matches[order] as f64 / possible[order] as f64).ln();
    }
    let geo_mean = (log_precision_sum / MAX_ORDER as f64).exp();
    geo_mean * brevity_penalty(reference_length, hypothesis_length)
}

fn brevity_penalty(reference_length: usize, hypothesis_length: usize) -> f64 {
    if hypothesis_length == 0 || reference_length == 0 {
        return 0.0;
    }
    let ratio = hypothesis_length as f64 / reference_length as f64;
    if ratio > 1.0 {
        1.0
    } else {
        (1.0 - 1.0 / ratio).exp()
    }
}

fn ngram_counts(tokens: &[String], order: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    for gram in tokens.windows(order) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// mteval-13a style tokenization: symbols become separate tokens, periods and
/// commas split unless inside a number, dashes split after a digit.
pub(crate) fn tokenize_13a(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut spaced = String::with_capacity(line.len() * 2);
    for (i, &c) in chars.iter().enumerate() {
        let prev = i.checked_sub(1).map(|j| chars[j]);
        let next = chars.get(i + 1).copied();
        let split = match c {
            '.' | ',' => {
                prev.is_some_and(|p| !p.is_ascii_digit())
                    || next.is_some_and(|n| !n.is_ascii_digit())
            }
            '-' => prev.is_some_and(|p| p.is_ascii_digit()),
            '\'' => false,
            c => c.is_ascii_punctuation(),
        };
        if split {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }
    spaced.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tokenizer_separates_punctuation() {
        assert_eq!(tokenize_13a("Hello, world!"), vec!["Hello", ",", "world", "!"]);
        assert_eq!(tokenize_13a("pi is 3.14"), vec!["pi", "is", "3.14"]);
        assert_eq!(tokenize_13a("it's 1-2"), vec!["it's", "1", "-", "2"]);
        assert_eq!(tokenize_13a("(a)"), vec!["(", "a", ")"]);
    }

    #[test]
    fn identical_corpus_scores_one() {
        let refs = strings(&["the quick brown fox jumps", "over the lazy dog today"]);
        let score = corpus_bleu(&refs, &refs);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_four_gram_scores_zero() {
        let refs = strings(&["a b c"]);
        let hyps = strings(&["a b c"]);
        assert_eq!(corpus_bleu(&refs, &hyps), 0.0);
    }

    #[test]
    fn short_hypothesis_is_penalized() {
        let refs = strings(&["one two three four five six seven eight"]);
        let hyps = strings(&["one two three four five six"]);
        let score = corpus_bleu(&refs, &hyps);
        let expected = (1.0f64 - 8.0 / 6.0).exp();
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn clipped_matches() {
        // Unigram precision 2/7 caps repeated "the".
        let refs = strings(&["the cat is on the mat"]);
        let hyps = strings(&["the the the the the the the"]);
        assert_eq!(corpus_bleu(&refs, &hyps), 0.0);
        assert_eq!(brevity_penalty(6, 7), 1.0);
    }
}
