/// Operation counts of one minimum-cost alignment between two sequences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditCounts {
    pub hits: usize,
    pub substitutions: usize,
    pub deletions: usize,
    pub insertions: usize,
}

impl EditCounts {
    pub fn errors(&self) -> usize {
        self.substitutions + self.deletions + self.insertions
    }

    pub(crate) fn accumulate(&mut self, other: EditCounts) {
        self.hits += other.hits;
        self.substitutions += other.substitutions;
        self.deletions += other.deletions;
        self.insertions += other.insertions;
    }
}

/// Levenshtein alignment of `hypothesis` against `reference`.
///
/// On ties the backtrace prefers match/substitution, then deletion, then
/// insertion, so counts are deterministic.
pub fn align_counts<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> EditCounts {
    let (n, m) = (reference.len(), hypothesis.len());
    let width = m + 1;
    let mut cost = vec![0usize; (n + 1) * width];
    for i in 0..=n {
        cost[i * width] = i;
    }
    for j in 0..=m {
        cost[j] = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            let diagonal =
                cost[(i - 1) * width + j - 1] + usize::from(reference[i - 1] != hypothesis[j - 1]);
            let deletion = cost[(i - 1) * width + j] + 1;
            let insertion = cost[i * width + j - 1] + 1;
            cost[i * width + j] = diagonal.min(deletion).min(insertion);
        }
    }

    let mut counts = EditCounts::default();
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        let here = cost[i * width + j];
        if i > 0 && j > 0 {
            let same = reference[i - 1] == hypothesis[j - 1];
            if here == cost[(i - 1) * width + j - 1] + usize::from(!same) {
                if same {
                    counts.hits += 1;
                } else {
                    counts.substitutions += 1;
                }
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if i > 0 && here == cost[(i - 1) * width + j] + 1 {
            counts.deletions += 1;
            i -= 1;
        } else {
            counts.insertions += 1;
            j -= 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn identical_sequences_are_all_hits() {
        let c = align_counts(&words("the cat sat"), &words("the cat sat"));
        assert_eq!(c.hits, 3);
        assert_eq!(c.errors(), 0);
    }

    #[test]
    fn counts_each_operation() {
        // "sat" -> "sit" substitution, "on" deleted, "down" inserted.
        let c = align_counts(&words("the cat sat on the mat"), &words("the cat sit the mat down"));
        assert_eq!(
            c,
            EditCounts {
                hits: 4,
                substitutions: 1,
                deletions: 1,
                insertions: 1,
            }
        );
    }

    #[test]
    fn empty_sides() {
        let c = align_counts(&words("a b"), &[]);
        assert_eq!((c.deletions, c.errors()), (2, 2));
        let c = align_counts(&[], &words("a b c"));
        assert_eq!((c.insertions, c.errors()), (3, 3));
    }

    #[test]
    fn works_on_characters() {
        let r: Vec<char> = "kitten".chars().collect();
        let h: Vec<char> = "sitting".chars().collect();
        assert_eq!(align_counts(&r, &h).errors(), 3);
    }
}
