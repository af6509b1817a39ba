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

/// Parse a string column into an enum, returning CorruptRow on failure.
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

/// Parse a JSON array-of-strings column.
pub fn parse_string_list(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_string_list_ok() {
        let ids = parse_string_list(r#"["a","b"]"#, "messages", "used_ids").unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn parse_string_list_rejects_garbage() {
        let err = parse_string_list("[1,", "messages", "used_ids").unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { column: "used_ids", .. }));
    }

    #[test]
    fn parse_enum_reports_variant() {
        let err =
            parse_enum::<agora_core::messages::MessageRole>("bot", "messages", "role").unwrap_err();
        assert!(err.to_string().contains("unknown variant: bot"));
    }
}
