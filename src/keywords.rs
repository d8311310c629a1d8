//! TF-IDF keyword extraction for cluster summaries.
//!
//! Tokenization lowercases, splits on non-alphanumeric characters, and
//! drops tokens shorter than three characters or present in the stop-word
//! list. TF is normalized by document length and IDF is `ln(N / df)`.
//!
//! For cluster summaries the document frequency is computed over the
//! whole corpus while the per-term score is the mean TF·IDF contribution
//! over the cluster's documents only. A term shared by every document in
//! a cluster still scores when it is rare in the rest of the corpus,
//! which is exactly what makes it a good cluster label.
//!
//! Output is stably sorted by (score desc, word asc).

use std::collections::{HashMap, HashSet};

const MIN_TOKEN_LENGTH: usize = 3;

/// A keyword with its TF-IDF score.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub word: String,
    pub score: f64,
}

/// Extracts keywords from statement texts using TF-IDF.
pub struct KeywordExtractor {
    stop_words: HashSet<&'static str>,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self {
            stop_words: default_stop_words(),
        }
    }

    /// Extract the top-k keywords from a standalone set of texts. The
    /// set is its own corpus: df is computed over these texts.
    pub fn extract_keywords(&self, texts: &[String], top_k: usize) -> Vec<Keyword> {
        if texts.is_empty() {
            return Vec::new();
        }

        let docs: Vec<Vec<String>> = texts.iter().map(|t| self.tokenize(t)).collect();
        let df = document_frequency(&docs);
        let members: Vec<usize> = (0..docs.len()).collect();

        top_keywords(score_members(&docs, &members, &df, docs.len()), top_k)
    }

    /// Extract keywords per cluster. `labels[i]` is the cluster of
    /// `texts[i]`. Document frequency spans the whole corpus; scores
    /// average over each cluster's documents. Clusters with no members
    /// get an empty keyword list.
    pub fn extract_cluster_keywords(
        &self,
        texts: &[String],
        labels: &[usize],
        num_clusters: usize,
        top_k: usize,
    ) -> Vec<Vec<Keyword>> {
        if texts.len() != labels.len() || texts.is_empty() {
            return vec![Vec::new(); num_clusters];
        }

        let docs: Vec<Vec<String>> = texts.iter().map(|t| self.tokenize(t)).collect();
        let df = document_frequency(&docs);
        let n = docs.len();

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
        for (i, &label) in labels.iter().enumerate() {
            if label < num_clusters {
                members[label].push(i);
            }
        }

        members
            .iter()
            .map(|m| top_keywords(score_members(&docs, m, &df, n), top_k))
            .collect()
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= MIN_TOKEN_LENGTH && !self.stop_words.contains(w))
            .map(|w| w.to_string())
            .collect()
    }
}

/// Count, per term, how many documents contain it.
fn document_frequency(docs: &[Vec<String>]) -> HashMap<&str, usize> {
    let mut df: HashMap<&str, usize> = HashMap::new();
    for doc in docs {
        let mut seen = HashSet::new();
        for word in doc {
            if seen.insert(word.as_str()) {
                *df.entry(word.as_str()).or_insert(0) += 1;
            }
        }
    }
    df
}

/// Mean TF·IDF per term over the member documents, with IDF = ln(n/df)
/// taken against the full corpus of `n` documents.
fn score_members(
    docs: &[Vec<String>],
    members: &[usize],
    df: &HashMap<&str, usize>,
    n: usize,
) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    if members.is_empty() || n == 0 {
        return scores;
    }

    for &i in members {
        let doc = &docs[i];
        let doc_len = doc.len();
        if doc_len == 0 {
            continue;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in doc {
            *tf.entry(word.as_str()).or_insert(0) += 1;
        }

        for (word, count) in tf {
            let term_freq = count as f64 / doc_len as f64;
            let idf = (n as f64 / df[word] as f64).ln();
            *scores.entry(word.to_string()).or_insert(0.0) += term_freq * idf;
        }
    }

    for score in scores.values_mut() {
        *score /= members.len() as f64;
    }

    scores
}

/// Sort (score desc, word asc) and truncate to the top k.
fn top_keywords(scores: HashMap<String, f64>, top_k: usize) -> Vec<Keyword> {
    let mut keywords: Vec<Keyword> = scores
        .into_iter()
        .map(|(word, score)| Keyword { word, score })
        .collect();

    keywords.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.word.cmp(&b.word))
    });

    if top_k > 0 && top_k < keywords.len() {
        keywords.truncate(top_k);
    }

    keywords
}

fn default_stop_words() -> HashSet<&'static str> {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "he", "in",
        "is", "it", "its", "of", "on", "or", "she", "that", "the", "they", "this", "to", "was",
        "were", "will", "with", "you", "your", "we", "our", "their", "them", "there", "these",
        "those", "been", "being", "had", "having", "do", "does", "did", "doing", "would", "could",
        "should", "may", "might", "must", "can", "cannot", "about", "above", "after", "again",
        "against", "all", "am", "any", "because", "before", "below", "between", "both", "but",
        "during", "each", "few", "further", "here", "how", "if", "into", "just", "more", "most",
        "no", "nor", "not", "now", "only", "other", "out", "own", "same", "so", "some", "such",
        "than", "then", "through", "too", "under", "until", "up", "very", "what", "when", "where",
        "which", "while", "who", "whom", "why", "also", "however", "therefore", "thus", "hence",
        "yet",
    ]
    .into_iter()
    .collect()
}
