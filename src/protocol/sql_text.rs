//! Extracts the table name an `INSERT` statement's raw SQL text names (§6's
//! `useBulkCopyForBatchInsert`, which keys cached per-table metadata off it) — distinct from
//! [`super::get_sql_identifier`], which decodes the *wire* token format used by RETURNVALUE and
//! COLINFO. There's no SQL parser here, just enough lexing to find one identifier token: skip
//! block comments and whitespace, match `INSERT [INTO]`, then read whatever bracket-quoted,
//! double-quote-quoted, or bare identifier token follows.

/// Returns the table name named by `sql`'s `INSERT [INTO]` clause, verbatim — quoting and escape
/// sequences included, not unescaped — or `None` if `sql` isn't recognizably an `INSERT`.
pub(crate) fn insert_table_name(sql: &str) -> Option<&str> {
    let bytes = sql.as_bytes();

    let pos = skip_insignificant(bytes, 0);
    let pos = match_keyword(bytes, pos, "insert")?;
    let pos = skip_insignificant(bytes, pos);
    let pos = match_keyword(bytes, pos, "into").unwrap_or(pos);
    let pos = skip_insignificant(bytes, pos);

    identifier_token(sql, pos)
}

/// Advances past any run of whitespace and `/* ... */` block comments (not nested — T-SQL
/// doesn't nest them either).
fn skip_insignificant(bytes: &[u8], mut pos: usize) -> usize {
    loop {
        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }

        if bytes[pos..].starts_with(b"/*") {
            match find_subslice(&bytes[pos + 2..], b"*/") {
                Some(end) => pos += 2 + end + 2,
                None => return bytes.len(), // unterminated comment swallows the rest
            }
            continue;
        }

        return pos;
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Matches `keyword` case-insensitively as a whole word starting at `pos`; `keyword` must be
/// ASCII lowercase. Returns the position just past it.
fn match_keyword(bytes: &[u8], pos: usize, keyword: &str) -> Option<usize> {
    let end = pos + keyword.len();
    let candidate = bytes.get(pos..end)?;
    if !candidate.eq_ignore_ascii_case(keyword.as_bytes()) {
        return None;
    }
    if bytes.get(end).is_some_and(is_identifier_byte) {
        return None; // e.g. "insertable" shouldn't match "insert"
    }
    Some(end)
}

fn is_identifier_byte(b: &u8) -> bool {
    b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.'
}

/// Reads one identifier token (bracketed, double-quoted, or bare) starting at `pos` and returns
/// the slice of `sql` it spans, quote characters included.
fn identifier_token(sql: &str, pos: usize) -> Option<&str> {
    let bytes = sql.as_bytes();
    let start = pos;

    match bytes.get(pos).copied() {
        Some(b'[') => {
            let mut i = pos + 1;
            loop {
                i = find_from(bytes, i, b']')?;
                if bytes.get(i + 1) == Some(&b']') {
                    i += 2; // escaped `]]` inside the identifier; keep scanning
                } else {
                    return Some(&sql[start..=i]);
                }
            }
        }
        Some(b'"') => {
            let mut i = pos + 1;
            loop {
                i = find_from(bytes, i, b'"')?;
                if bytes.get(i + 1) == Some(&b'"') {
                    i += 2; // escaped `""` inside the identifier; keep scanning
                } else {
                    return Some(&sql[start..=i]);
                }
            }
        }
        Some(b) if is_identifier_byte(&b) => {
            let mut i = pos;
            while bytes.get(i).is_some_and(is_identifier_byte) {
                i += 1;
            }
            Some(&sql[start..i])
        }
        _ => None,
    }
}

fn find_from(bytes: &[u8], from: usize, target: u8) -> Option<usize> {
    bytes[from..].iter().position(|&b| b == target).map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bracket_quoted_table_name_with_escaped_closing_bracket() {
        let sql = "INSERT INTO [Peter[]]Table] (a, b) VALUES (1, 2)";
        assert_eq!(insert_table_name(sql), Some("[Peter[]]Table]"));
    }

    #[test]
    fn parses_a_double_quoted_table_name_with_escaped_closing_quote() {
        let sql = r#"INSERT INTO "Peter""""Table" (a, b) VALUES (1, 2)"#;
        assert_eq!(insert_table_name(sql), Some(r#""Peter""""Table""#));
    }

    #[test]
    fn ignores_block_comments_surrounding_the_statement_and_table_name() {
        let sql = "/* c1 */ INSERT /* c2 */ INTO /* c3 */ [Orders] /* c4 */ (a) VALUES (1)";
        assert_eq!(insert_table_name(sql), Some("[Orders]"));
    }

    #[test]
    fn accepts_insert_without_an_into_keyword() {
        let sql = "INSERT Orders (a) VALUES (1)";
        assert_eq!(insert_table_name(sql), Some("Orders"));
    }

    #[test]
    fn returns_none_for_non_insert_statements() {
        assert_eq!(insert_table_name("SELECT * FROM Orders"), None);
        assert_eq!(insert_table_name("UPDATE Orders SET a = 1"), None);
    }

    #[test]
    fn does_not_mistake_a_longer_identifier_for_the_insert_keyword() {
        assert_eq!(insert_table_name("INSERTABLE (a) VALUES (1)"), None);
    }
}
