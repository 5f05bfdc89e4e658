//! SQL text for the durable store.
//!
//! Only identifiers are spliced into statements, always through
//! [`quote_ident`]. Keys, values and prefixes are bound parameters.

use amphora_routing::Route;

/// Column holding the primary value.
pub const DATA: &str = "data";

/// Column holding the secondary meta value.
pub const META: &str = "meta";

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualified, quoted table name of a route.
pub fn table_ref(route: &Route) -> String {
    qualified(route.schema.as_deref(), &route.table)
}

/// Quoted `schema.table` (or bare `table`).
pub fn qualified(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(table),
    }
}

/// `SELECT <column> ... WHERE id = $1`.
pub fn select(route: &Route, column: &str) -> String {
    format!(
        "SELECT {column} FROM {} WHERE id = $1",
        table_ref(route)
    )
}

/// Upsert of `column` keyed by `id = $1` with the value in `$2`.
///
/// With `with_url`, `$3` also sets the derived `url` column.
pub fn upsert(route: &Route, column: &str, with_url: bool) -> String {
    let table = table_ref(route);
    if with_url {
        format!(
            "INSERT INTO {table} (id, {column}, url) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET {column} = EXCLUDED.{column}, url = EXCLUDED.url \
             RETURNING {column}"
        )
    } else {
        format!(
            "INSERT INTO {table} (id, {column}) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET {column} = EXCLUDED.{column} \
             RETURNING {column}"
        )
    }
}

/// Shallow merge of `$2` into `column` of the existing row `id = $1`.
///
/// A `NULL` column merges as an empty object.
pub fn merge(route: &Route, column: &str) -> String {
    format!(
        "UPDATE {} SET {column} = COALESCE({column}, '{{}}'::jsonb) || $2 \
         WHERE id = $1 RETURNING {column}",
        table_ref(route)
    )
}

/// Delete by primary key.
pub fn delete(route: &Route) -> String {
    format!("DELETE FROM {} WHERE id = $1", table_ref(route))
}

/// Prefix scan selecting the id and/or the data column.
///
/// The pattern is bound as `$1` and must come from [`like_prefix`].
pub fn scan(route: &Route, keys: bool, values: bool) -> String {
    let columns = match (keys, values) {
        (true, false) => "id",
        (false, true) => DATA,
        _ => "id, data",
    };
    format!(
        "SELECT {columns} FROM {} WHERE id LIKE $1 ESCAPE '\\' ORDER BY id",
        table_ref(route)
    )
}

/// LIKE pattern matching every id that starts with `prefix`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len().saturating_add(1));
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use amphora_routing::EntityKind;

    use super::*;

    fn component() -> Route {
        Route {
            kind: EntityKind::Component,
            schema: Some("components".to_owned()),
            table: "button".to_owned(),
        }
    }

    fn uris() -> Route {
        Route {
            kind: EntityKind::Uri,
            schema: None,
            table: "uris".to_owned(),
        }
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("pages"), "\"pages\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(table_ref(&component()), "\"components\".\"button\"");
        assert_eq!(table_ref(&uris()), "\"uris\"");
    }

    #[test]
    fn select_and_delete_bind_the_key() {
        assert_eq!(
            select(&component(), DATA),
            "SELECT data FROM \"components\".\"button\" WHERE id = $1"
        );
        assert_eq!(delete(&uris()), "DELETE FROM \"uris\" WHERE id = $1");
    }

    #[test]
    fn upsert_overwrites_on_conflict() {
        let sql = upsert(&component(), DATA, false);
        assert!(sql.starts_with("INSERT INTO \"components\".\"button\" (id, data)"));
        assert!(sql.contains("ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data"));
        assert!(sql.ends_with("RETURNING data"));

        let sql = upsert(&uris(), DATA, true);
        assert!(sql.contains("(id, data, url) VALUES ($1, $2, $3)"));
        assert!(sql.contains("url = EXCLUDED.url"));
    }

    #[test]
    fn merge_uses_the_json_concat_operator() {
        assert_eq!(
            merge(&uris(), META),
            "UPDATE \"uris\" SET meta = COALESCE(meta, '{}'::jsonb) || $2 \
             WHERE id = $1 RETURNING meta"
        );
    }

    #[test]
    fn scan_selects_requested_columns() {
        assert!(scan(&uris(), true, false).starts_with("SELECT id FROM"));
        assert!(scan(&uris(), false, true).starts_with("SELECT data FROM"));
        assert!(scan(&uris(), true, true).starts_with("SELECT id, data FROM"));
    }

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("site.com/_pages"), "site.com/\\_pages%");
        assert_eq!(like_prefix("100%"), "100\\%%");
        assert_eq!(like_prefix("a\\b"), "a\\\\b%");
        assert_eq!(like_prefix(""), "%");
    }
}
