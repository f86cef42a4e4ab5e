use serde::{Deserialize, Serialize};
use tracing::debug;

use versiondb_core::naming::{quote_ident, view_schema, QualifiedName};
use versiondb_core::{BranchSource, RevisionSpec};

use crate::error::StorageError;
use crate::registry::VersionedTable;
use crate::sqlite::Session;
use crate::visibility::visibility_predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewStatus {
    Created,
    Existing,
}

/// The views of one `{schema}_{branch}_rev_{N|head}` view schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSet {
    pub schema_name: String,
    pub views: Vec<QualifiedName>,
    pub status: ViewStatus,
}

/// `SELECT` of the identity and user columns of rows visible through `sources`.
pub fn visible_select(table: &VersionedTable, sources: &[BranchSource]) -> String {
    let alias = "v";
    let relation = table.qualified().quoted();
    let columns: Vec<String> = std::iter::once(table.pkey.as_str())
        .chain(table.column_names())
        .map(|c| format!("{alias}.{}", quote_ident(c)))
        .collect();

    format!(
        "SELECT {} FROM {relation} AS {alias} WHERE {} ORDER BY {alias}.{}",
        columns.join(", "),
        visibility_predicate(&relation, alias, &table.pkey, sources),
        quote_ident(&table.pkey),
    )
}

/// Creates the missing views of the view schema for (`branch`, `revision`).
/// Views that already exist are left untouched.
pub fn materialize(
    session: &Session,
    schema: &str,
    branch: &str,
    revision: RevisionSpec,
    sources: &[BranchSource],
    tables: &[VersionedTable],
) -> Result<ViewSet, StorageError> {
    let schema_name = view_schema(schema, branch, revision);
    let mut views = Vec::with_capacity(tables.len());
    let mut created = 0usize;

    for table in tables {
        let view = QualifiedName::new(schema_name.clone(), table.name.clone());
        if !session.relation_exists("main", &view.relation())? {
            session.exec_batch(&format!(
                "CREATE VIEW {} AS {}",
                view.quoted(),
                visible_select(table, sources)
            ))?;
            created += 1;
        }
        views.push(view);
    }

    debug!(view_schema = %schema_name, created, total = views.len(), "materialized views");
    Ok(ViewSet {
        schema_name,
        views,
        status: if created == 0 { ViewStatus::Existing } else { ViewStatus::Created },
    })
}
