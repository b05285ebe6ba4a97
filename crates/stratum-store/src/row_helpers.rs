use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON string column into a typed value.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Build a `(?1, ?2, …)` placeholder list for an IN clause.
pub fn placeholders(count: usize) -> String {
    placeholders_from(1, count)
}

/// Placeholder list starting at a given parameter index, for statements
/// with leading fixed parameters.
pub fn placeholders_from(start: usize, count: usize) -> String {
    let mut out = String::with_capacity(count * 4);
    out.push('(');
    for i in 0..count {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
        out.push_str(&(start + i).to_string());
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::messages::Role;

    #[test]
    fn parse_enum_success() {
        let role: Role = parse_enum("assistant", "messages", "role").unwrap();
        assert_eq!(role, Role::Assistant);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<Role, _> = parse_enum("INVALID", "messages", "role");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "role", .. })
        ));
    }

    #[test]
    fn parse_json_success() {
        let anchors: Vec<String> = parse_json(r#"["a", "b"]"#, "summaries", "anchors").unwrap();
        assert_eq!(anchors, vec!["a", "b"]);
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<Vec<String>, _> = parse_json("not json", "summaries", "anchors");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "summaries", column: "anchors", .. })
        ));
    }

    #[test]
    fn placeholder_lists() {
        assert_eq!(placeholders(1), "(?1)");
        assert_eq!(placeholders(3), "(?1, ?2, ?3)");
        assert_eq!(placeholders_from(2, 2), "(?2, ?3)");
    }
}
