//! Identifier and literal quoting for generated SQL.

/// Quote an identifier, keeping dotted `schema.table` names as separate parts.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn select_all(table: &str) -> String {
    format!("SELECT * FROM {}", quote_ident(table))
}

/// `SELECT * FROM table WHERE column = 'value'`
pub fn select_where_eq(table: &str, column: &str, value: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = {}",
        quote_ident(table),
        quote_ident(column),
        quote_literal(value)
    )
}

pub fn delete_all(table: &str) -> String {
    format!("DELETE FROM {}", quote_ident(table))
}

/// Parameterized insert with numbered placeholders, one per header.
pub fn insert_into(table: &str, headers: &[String]) -> String {
    let columns: Vec<String> = headers.iter().map(|h| quote_ident_single(h)).collect();
    let placeholders: Vec<String> = (1..=headers.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Column names may legitimately contain dots, so they are quoted whole.
fn quote_ident_single(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
