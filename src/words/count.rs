use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Concurrency-safe word frequency map
///
/// Each crawl branch owns one `WordCount`; a comment and its direct replies
/// write into the same instance, so increments go through a lock. Sibling
/// branches get independent instances that are combined with [`merge`].
///
/// [`merge`]: WordCount::merge
#[derive(Debug, Default)]
pub struct WordCount {
    counts: Mutex<HashMap<String, u64>>,
}

impl WordCount {
    /// Creates an empty count
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a count from an existing map
    pub fn from_map(counts: HashMap<String, u64>) -> Self {
        Self {
            counts: Mutex::new(counts),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        // A poisoned map still holds valid counts; keep using it
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Increments the count of `word` by one
    pub fn increment(&self, word: &str) {
        self.add(word, 1);
    }

    /// Increments the count of `word` by `n`
    pub fn add(&self, word: &str, n: u64) {
        let mut counts = self.lock();
        match counts.get_mut(word) {
            Some(count) => *count += n,
            None => {
                counts.insert(word.to_string(), n);
            }
        }
    }

    /// Increments every token in `tokens` under a single lock acquisition
    pub fn extend<I, S>(&self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts = self.lock();
        for token in tokens {
            *counts.entry(token.as_ref().to_string()).or_insert(0) += 1;
        }
    }

    /// Returns the additive union of `self` and `other` as a new count
    ///
    /// Keys present in both maps are summed. Neither input is modified.
    pub fn merge(&self, other: &WordCount) -> WordCount {
        let mut merged = self.snapshot();
        for (word, n) in other.lock().iter() {
            *merged.entry(word.clone()).or_insert(0) += n;
        }
        WordCount::from_map(merged)
    }

    /// Merges any number of counts into one
    pub fn merge_all<'a, I>(counts: I) -> WordCount
    where
        I: IntoIterator<Item = &'a WordCount>,
    {
        let merged = WordCount::new();
        {
            let mut target = merged.lock();
            for count in counts {
                for (word, n) in count.lock().iter() {
                    *target.entry(word.clone()).or_insert(0) += n;
                }
            }
        }
        merged
    }

    /// Returns the count for `word` (0 if absent)
    pub fn get(&self, word: &str) -> u64 {
        self.lock().get(word).copied().unwrap_or(0)
    }

    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sum of all occurrences
    pub fn total(&self) -> u64 {
        self.lock().values().sum()
    }

    /// Copies the current counts out
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.lock().clone()
    }

    /// Consumes the count and returns the underlying map
    pub fn into_inner(self) -> HashMap<String, u64> {
        self.counts.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// The `n` most frequent words, ties broken alphabetically
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        top_words(&self.lock(), n)
    }
}

impl Clone for WordCount {
    fn clone(&self) -> Self {
        WordCount::from_map(self.snapshot())
    }
}

impl PartialEq for WordCount {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl From<HashMap<String, u64>> for WordCount {
    fn from(counts: HashMap<String, u64>) -> Self {
        WordCount::from_map(counts)
    }
}

/// Sorts a word map by descending count, then word, and keeps the first `n`
pub fn top_words(counts: &HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts
        .iter()
        .map(|(word, count)| (word.clone(), *count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}
