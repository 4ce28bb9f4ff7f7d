//! SQL shared by the SQLite and PostgreSQL backends.
//!
//! Only the placeholder syntax and a typed NULL differ between the two, so
//! the hierarchy queries are generated once per dialect.

/// SQL dialect of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Bind placeholder for the `n`-th (1-based) parameter.
    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    fn null_data(self) -> &'static str {
        match self {
            Dialect::Sqlite => "NULL",
            Dialect::Postgres => "CAST(NULL AS BYTEA)",
        }
    }
}

/// Disjoint union of collections and items as `(id, parent_id, name, modified, data, kind)`.
/// An item's parent is its owning collection.
fn node_view(dialect: Dialect) -> String {
    format!(
        "SELECT id, parent_id, name, modified, {null} AS data, 'collection' AS kind FROM collections \
         UNION ALL \
         SELECT id, collection_id AS parent_id, name, modified, data, 'item' AS kind FROM items",
        null = dialect.null_data()
    )
}

/// Query resolving a path of `depth` segments.
///
/// Alias `n0` is the leaf and `n{depth}` the root. Each join constrains the
/// previous alias's parent to be the next alias, which must be a collection;
/// names are bound leaf first. The chain ends on a row without a parent.
pub(crate) fn resolve_path_query(dialect: Dialect, depth: usize) -> String {
    debug_assert!(depth > 0);
    let mut sql = format!(
        "WITH nodes AS ({}) \
         SELECT n0.id, n0.parent_id, n0.name, n0.modified, n0.data, n0.kind FROM nodes n0",
        node_view(dialect)
    );
    for i in 1..=depth {
        sql.push_str(&format!(
            " JOIN nodes n{i} ON n{prev}.parent_id = n{i}.id AND n{i}.kind = 'collection'",
            prev = i - 1
        ));
    }
    let mut conditions: Vec<String> = (0..depth)
        .map(|i| format!("n{i}.name = {}", dialect.placeholder(i + 1)))
        .collect();
    conditions.push(format!("n{depth}.parent_id IS NULL"));
    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));
    sql.push_str(" ORDER BY n0.kind LIMIT 1");
    sql
}

/// Query listing the immediate children of one collection.
pub(crate) fn list_children_query(dialect: Dialect) -> String {
    format!(
        "WITH nodes AS ({}) \
         SELECT id, parent_id, name, modified, data, kind FROM nodes \
         WHERE parent_id = {} ORDER BY kind, name",
        node_view(dialect),
        dialect.placeholder(1)
    )
}
