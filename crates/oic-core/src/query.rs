use std::collections::BTreeMap;

/// Query parameters keyed by name; a repeated name keeps the last value.
pub type QueryParams = BTreeMap<String, String>;

pub const RESOURCE_TYPE_KEY: &str = "rt";
pub const INTERFACE_KEY: &str = "if";

const RESERVED: &[char] = &['?', '&', ';', '='];

/// True for a non-empty resource type or interface name without whitespace
/// or query separators.
pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || RESERVED.contains(&c))
}

/// Normalizes a resource path: trims, ensures a leading slash and drops a
/// trailing one (except for the root).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Splits `uri` into its path and the raw query after `?`.
pub fn split_uri_query(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri, None),
    }
}

/// Parses `a=b&c=d` (or `;`-separated) pairs. Pairs without `=` or with an
/// empty key are skipped.
pub fn parse_query(query: &str) -> QueryParams {
    query
        .split(|c| c == '&' || c == ';')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn format_query(params: &QueryParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Joins a path and optional query parameters into a request uri.
pub fn build_uri(path: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", format_query(params))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        build_uri, format_query, is_valid_identifier, normalize_path, parse_query,
        split_uri_query, QueryParams,
    };

    #[test]
    fn identifiers_reject_separators_and_whitespace() {
        assert!(is_valid_identifier("core.light"));
        assert!(is_valid_identifier("oic.if.baseline"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("core light"));
        assert!(!is_valid_identifier("rt=x"));
        assert!(!is_valid_identifier("a&b"));
    }

    #[test]
    fn path_normalization_is_stable() {
        assert_eq!(normalize_path(" a/light/ "), "/a/light");
        assert_eq!(normalize_path("/oic/res"), "/oic/res");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn split_and_parse_discovery_query() {
        let (path, query) = split_uri_query("/oic/res?rt=core.light&if=oic.if.baseline");
        assert_eq!(path, "/oic/res");
        let params = parse_query(query.expect("query present"));
        assert_eq!(params.get("rt").map(String::as_str), Some("core.light"));
        assert_eq!(params.get("if").map(String::as_str), Some("oic.if.baseline"));

        assert_eq!(split_uri_query("/oic/res"), ("/oic/res", None));
    }

    #[test]
    fn parse_skips_malformed_pairs() {
        let params = parse_query("k=v;novalue&=x&k2=");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("k2").map(String::as_str), Some(""));
    }

    #[test]
    fn format_and_build_round_trip() {
        let mut params = QueryParams::new();
        params.insert("k".into(), "v".into());
        params.insert("a".into(), "b".into());
        assert_eq!(format_query(&params), "a=b&k=v");
        assert_eq!(build_uri("/a/light", &params), "/a/light?a=b&k=v");
        assert_eq!(build_uri("/a/light", &QueryParams::new()), "/a/light");
        assert_eq!(parse_query(&format_query(&params)), params);
    }
}
