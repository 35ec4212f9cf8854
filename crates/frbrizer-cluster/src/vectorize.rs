use std::collections::{BTreeMap, HashMap};

use frbrizer_core::config::FeatureConfig;
use ndarray::{s, Array1, Array2};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::features::FeatureTable;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "else",
    "etc", "ever", "every", "few", "for", "from", "further", "had", "has", "have", "having", "he",
    "her", "here", "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not",
    "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this", "those", "through",
    "to", "too", "under", "until", "up", "upon", "very", "via", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Accent-stripped, lowercased text with stop words removed.
pub fn preprocess(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded
        .split_whitespace()
        .filter(|word| !ENGLISH_STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn char_ngrams(text: &str, min_n: usize, max_n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut grams = Vec::new();
    for n in min_n..=max_n {
        if n == 0 || n > chars.len() {
            continue;
        }
        for window in chars.windows(n) {
            grams.push(window.iter().collect());
        }
    }
    grams
}

/// Character n-gram TF-IDF with smoothed idf and L2-normalized rows.
#[derive(Debug, Clone, Copy)]
pub struct CharNgramTfidf {
    min_n: usize,
    max_n: usize,
}

impl CharNgramTfidf {
    pub fn new((min_n, max_n): (usize, usize)) -> Self {
        Self { min_n, max_n }
    }

    /// One row per document. An empty document is a zero row; a corpus
    /// with no n-grams at all yields a matrix with zero columns.
    pub fn fit_transform(&self, docs: &[String]) -> Array2<f64> {
        let counts: Vec<HashMap<String, f64>> = docs
            .iter()
            .map(|doc| {
                let mut tf = HashMap::new();
                for gram in char_ngrams(&preprocess(doc), self.min_n, self.max_n) {
                    *tf.entry(gram).or_insert(0.0) += 1.0;
                }
                tf
            })
            .collect();

        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for tf in &counts {
            for gram in tf.keys() {
                *df.entry(gram.as_str()).or_insert(0) += 1;
            }
        }

        let n_docs = docs.len() as f64;
        let vocabulary: HashMap<&str, (usize, f64)> = df
            .iter()
            .enumerate()
            .map(|(column, (gram, doc_freq))| {
                let idf = ((1.0 + n_docs) / (1.0 + *doc_freq as f64)).ln() + 1.0;
                (*gram, (column, idf))
            })
            .collect();

        let mut matrix = Array2::<f64>::zeros((docs.len(), vocabulary.len()));
        for (row, tf) in counts.iter().enumerate() {
            for (gram, count) in tf {
                let (column, idf) = vocabulary[gram.as_str()];
                matrix[[row, column]] = count * idf;
            }
            let norm = matrix.row(row).dot(&matrix.row(row)).sqrt();
            if norm > 0.0 {
                matrix.row_mut(row).mapv_inplace(|v| v / norm);
            }
        }
        matrix
    }
}

/// Min-max scaling over the pool; a constant column scales to zeros.
pub fn scale_years(years: &[i32]) -> Array1<f64> {
    let min = years.iter().copied().min().unwrap_or_default() as f64;
    let max = years.iter().copied().max().unwrap_or_default() as f64;
    let range = max - min;
    years
        .iter()
        .map(|&y| if range > 0.0 { (y as f64 - min) / range } else { 0.0 })
        .collect()
}

/// Weighted feature matrix: place, publisher and edition TF-IDF blocks
/// followed by the scaled year column.
pub fn feature_matrix(table: &FeatureTable, config: &FeatureConfig) -> Array2<f64> {
    let rows = table.rows();
    let places: Vec<String> = rows.iter().map(|r| r.place.clone()).collect();
    let publishers: Vec<String> = rows.iter().map(|r| r.publisher.clone()).collect();
    let editions: Vec<String> = rows.iter().map(|r| r.edition.clone().unwrap_or_default()).collect();
    let years: Vec<i32> = rows.iter().map(|r| r.pub_date).collect();

    let text = CharNgramTfidf::new(config.text_ngram_range);
    let blocks = [
        (text.fit_transform(&places), config.place_weight),
        (text.fit_transform(&publishers), config.publisher_weight),
        (
            CharNgramTfidf::new(config.edition_ngram_range).fit_transform(&editions),
            config.edition_weight,
        ),
    ];

    let width: usize = blocks.iter().map(|(b, _)| b.ncols()).sum::<usize>() + 1;
    let mut matrix = Array2::<f64>::zeros((rows.len(), width));
    let mut offset = 0;
    for (block, weight) in &blocks {
        let end = offset + block.ncols();
        matrix.slice_mut(s![.., offset..end]).assign(&(block * *weight));
        offset = end;
    }
    let year_column = scale_years(&years) * config.pub_date_weight;
    matrix.column_mut(offset).assign(&year_column);
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRow;
    use uuid::Uuid;

    fn row(place: &str, publisher: &str, edition: Option<&str>, year: i32) -> FeatureRow {
        FeatureRow {
            place: place.to_string(),
            publisher: publisher.to_string(),
            edition: edition.map(str::to_string),
            pub_date: year,
            uuid: Uuid::now_v7(),
        }
    }

    #[test]
    fn test_preprocess_strips_accents_and_stop_words() {
        assert_eq!(preprocess("Éditions de la Pléiade"), "editions de la pleiade");
        assert_eq!(preprocess("The House of Harper"), "house harper");
        assert_eq!(preprocess(""), "");
    }

    #[test]
    fn test_tfidf_rows_are_unit_or_zero() {
        let docs = vec!["new york".to_string(), String::new(), "london".to_string()];
        let matrix = CharNgramTfidf::new((2, 4)).fit_transform(&docs);
        assert_eq!(matrix.nrows(), 3);

        let norm = |i: usize| matrix.row(i).dot(&matrix.row(i)).sqrt();
        assert!((norm(0) - 1.0).abs() < 1e-9);
        assert_eq!(norm(1), 0.0);
        assert!((norm(2) - 1.0).abs() < 1e-9);
        assert_eq!(matrix.row(0).dot(&matrix.row(2)), 0.0);
    }

    #[test]
    fn test_identical_documents_share_vectors() {
        let docs = vec!["random house".to_string(), "random house".to_string()];
        let matrix = CharNgramTfidf::new((2, 4)).fit_transform(&docs);
        assert_eq!(matrix.row(0), matrix.row(1));
    }

    #[test]
    fn test_all_empty_column_has_no_features() {
        let docs = vec![String::new(), "  ".to_string()];
        let matrix = CharNgramTfidf::new((1, 3)).fit_transform(&docs);
        assert_eq!(matrix.dim(), (2, 0));
    }

    #[test]
    fn test_scale_years() {
        assert_eq!(scale_years(&[1990, 2000, 1995]).to_vec(), vec![0.0, 1.0, 0.5]);
        assert_eq!(scale_years(&[1990, 1990]).to_vec(), vec![0.0, 0.0]);
        assert!(scale_years(&[]).is_empty());
    }

    #[test]
    fn test_feature_matrix_weights_year_column() {
        let table = FeatureTable::new(vec![
            row("", "", None, 1900),
            row("", "", None, 2000),
        ]);
        let matrix = feature_matrix(&table, &FeatureConfig::default());
        assert_eq!(matrix.ncols(), 1);
        assert_eq!(matrix[[0, 0]], 0.0);
        assert_eq!(matrix[[1, 0]], 2.0);
    }

    #[test]
    fn test_feature_matrix_blocks_are_weighted() {
        let table = FeatureTable::new(vec![
            row("new york", "random house", Some("2nd ed"), 1995),
            row("new york", "random house", Some("2nd ed"), 1995),
        ]);
        let config = FeatureConfig::default();
        let matrix = feature_matrix(&table, &config);
        let place_width = CharNgramTfidf::new(config.text_ngram_range)
            .fit_transform(&["new york".to_string()])
            .ncols();
        let place_block: ndarray::ArrayView1<f64> = matrix.slice(s![0, ..place_width]);
        let place_norm = place_block.dot(&place_block).sqrt();
        assert!((place_norm - config.place_weight).abs() < 1e-9);
        assert_eq!(matrix.row(0), matrix.row(1));
    }
}
