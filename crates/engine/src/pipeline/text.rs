//! Tokenization and similarity helpers shared by the analysis nodes.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "of", "for", "with", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "being", "it", "its", "this", "that",
    "these", "those", "has", "have", "had", "will", "would", "can", "could", "should", "than",
    "then", "into", "about", "over", "under", "between", "not", "no",
];

/// Lowercased word tokens of a statement.
pub fn tokens(statement: &str) -> HashSet<String> {
    statement
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Tokens with stop words removed, for topical-relatedness checks.
pub fn content_tokens(statement: &str) -> HashSet<String> {
    tokens(statement)
        .into_iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard similarity of two token sets.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Four-digit years (1000–2999) mentioned in a statement.
pub fn extract_years(statement: &str) -> Vec<i32> {
    let mut years = Vec::new();
    let mut digits = String::new();

    for c in statement.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if digits.len() == 4 {
                if let Ok(year) = digits.parse::<i32>() {
                    if (1000..3000).contains(&year) {
                        years.push(year);
                    }
                }
            }
            digits.clear();
        }
    }

    years
}

/// Numbers mentioned in a statement, excluding 4-digit years.
pub fn extract_numbers(statement: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let mut current = String::new();

    for c in statement.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() || (c == '.' && !current.is_empty() && !current.contains('.')) {
            current.push(c);
        } else {
            if !current.is_empty() && current != "." {
                if let Ok(value) = current.trim_end_matches('.').parse::<f64>() {
                    let is_year = current.len() == 4
                        && !current.contains('.')
                        && (1000.0..3000.0).contains(&value);
                    if !is_year {
                        numbers.push(value);
                    }
                }
            }
            current.clear();
        }
    }

    numbers
}

/// Strip Markdown code fences so "```json ... ```" wrappers parse.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end_matches('`').trim()
}

/// Most frequent non-stop-word tokens across a set of statements; used to
/// derive gap terms from low-coverage fact groups.
pub fn top_content_terms(statements: &[&str], limit: usize) -> Vec<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for statement in statements {
        for token in content_tokens(statement) {
            if token.len() > 3 {
                *counts.entry(token).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard_similarity() {
        let a = tokens("wheat yields decline under warming");
        let b = tokens("wheat yields decline under drought");
        let similarity = jaccard(&a, &b);
        assert!(similarity > 0.5 && similarity < 1.0);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn test_extract_years() {
        assert_eq!(extract_years("founded in 2010, expanded 2015"), vec![2010, 2015]);
        assert_eq!(extract_years("the 10000 figure"), Vec::<i32>::new());
        assert_eq!(extract_years("no years here"), Vec::<i32>::new());
    }

    #[test]
    fn test_extract_numbers_excludes_years() {
        let numbers = extract_numbers("revenue grew 23.5 percent in 2021 to 400 million");
        assert_eq!(numbers, vec![23.5, 400.0]);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[{\"a\":1}]\n```"), "[{\"a\":1}]");
        assert_eq!(strip_code_fences("[1,2]"), "[1,2]");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
    }

    #[test]
    fn test_top_content_terms() {
        let terms = top_content_terms(
            &[
                "wheat yields decline under warming",
                "warming reduces wheat yields",
            ],
            2,
        );
        assert!(terms.contains(&"wheat".to_string()) || terms.contains(&"yields".to_string()));
        assert!(!terms.contains(&"under".to_string()));
    }
}
