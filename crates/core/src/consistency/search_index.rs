//! Patient search tokens.

/// Normalized search tokens for a patient.
///
/// Names are lowercased and split on anything that is not alphanumeric.
/// Documents are indexed both verbatim (lowercased) and with punctuation
/// stripped, so `12.345.678-9` matches `123456789`.
pub fn patient_tokens(full_name: &str, document: Option<&str>) -> Vec<String> {
    let mut tokens: Vec<String> = full_name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect();

    if let Some(document) = document.map(str::trim).filter(|d| !d.is_empty()) {
        tokens.push(document.to_lowercase());
        let compact: String = document
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if !compact.is_empty() {
            tokens.push(compact);
        }
    }

    tokens.sort();
    tokens.dedup();
    tokens
}

/// Normalizes a search term the same way names are tokenized.
pub fn normalize_term(term: &str) -> Option<String> {
    let normalized = term.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_tokens() {
        assert_eq!(
            patient_tokens("María José  O'Neil", None),
            vec!["josé", "maría", "neil", "o"]
        );
    }

    #[test]
    fn test_document_tokens() {
        let tokens = patient_tokens("Ana", Some("12.345.678-K"));
        assert!(tokens.contains(&"12.345.678-k".to_string()));
        assert!(tokens.contains(&"12345678k".to_string()));
        assert!(tokens.contains(&"ana".to_string()));
    }

    #[test]
    fn test_blank_inputs() {
        assert!(patient_tokens("", Some("  ")).is_empty());
        assert_eq!(normalize_term("   "), None);
        assert_eq!(normalize_term(" Ana "), Some("ana".to_string()));
    }
}
