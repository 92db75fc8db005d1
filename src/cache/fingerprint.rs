//! Content fingerprints used as cache keys
//!
//! Keys never contain the raw input. Query keys embed the user id so the
//! shared tier can be cleared per user by pattern.

use sha2::{Digest, Sha256};

use super::entry::CacheKind;

/// SHA-256 hex digest of `input`
pub fn fingerprint(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Trim, collapse internal whitespace, lowercase
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `embedding:<sha256(text)>`
pub fn embedding_key(text: &str) -> String {
    format!("{}:{}", CacheKind::Embedding.namespace(), fingerprint(text))
}

/// `query:<user_id>:<sha256(user, normalized query, top_k, sorted documents)>`
pub fn query_key(user_id: &str, query: &str, top_k: usize, document_ids: &[String]) -> String {
    let mut documents: Vec<&str> = document_ids.iter().map(String::as_str).collect();
    documents.sort_unstable();
    documents.dedup();

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(b"|");
    hasher.update(top_k.to_string().as_bytes());
    for doc in documents {
        hasher.update(b"|");
        hasher.update(doc.as_bytes());
    }

    format!(
        "{}:{}:{}",
        CacheKind::Query.namespace(),
        user_id,
        hex::encode(hasher.finalize())
    )
}

/// Escape glob metacharacters so an id matches literally in a key pattern
pub fn escape_pattern(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Shared-tier pattern matching every key that embeds `user_id`
pub fn user_pattern(user_id: &str) -> String {
    format!("*:{}:*", escape_pattern(user_id))
}

/// Shared-tier pattern matching every key of `kind`
pub fn namespace_pattern(kind: CacheKind) -> String {
    format!("{}:*", kind.namespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint("hello");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("hello"));
        assert_ne!(a, fingerprint("hello "));
        assert_eq!(
            a,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_embedding_key_hides_content() {
        let key = embedding_key("my secret paragraph");
        assert!(key.starts_with("embedding:"));
        assert!(!key.contains("secret"));
    }

    #[test]
    fn test_query_key_normalization() {
        let a = query_key("u1", "  What is   RAG? ", 5, &[]);
        let b = query_key("u1", "what is rag?", 5, &[]);
        assert_eq!(a, b);
        assert!(a.starts_with("query:u1:"));
    }

    #[test]
    fn test_query_key_distinguishes_inputs() {
        let base = query_key("u1", "q", 5, &[]);
        assert_ne!(base, query_key("u2", "q", 5, &[]));
        assert_ne!(base, query_key("u1", "q", 6, &[]));
        assert_ne!(base, query_key("u1", "q", 5, &["d1".to_string()]));
    }

    #[test]
    fn test_query_key_document_order_irrelevant() {
        let a = query_key("u1", "q", 5, &["b".to_string(), "a".to_string()]);
        let b = query_key("u1", "q", 5, &["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_patterns() {
        assert_eq!(user_pattern("u-1"), "*:u-1:*");
        assert_eq!(user_pattern("a*b"), "*:a\\*b:*");
        assert_eq!(namespace_pattern(CacheKind::Query), "query:*");
    }
}
