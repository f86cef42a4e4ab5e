//! SQL rendering of the row visibility rule.
//!
//! Views cannot take parameters, so the branch chain is rendered as literals.
//! The predicate selects exactly the rows [`versiondb_core::visible_rows`]
//! returns for the same chain.

use versiondb_core::naming::{quote_ident, quote_literal};
use versiondb_core::BranchSource;

use crate::schema::{BRANCH_COLUMN, CREATED_COLUMN, PARENT_COLUMN, REMOVED_COLUMN};

/// Rows of `alias` created inside some link of the chain.
fn admitted(alias: &str, sources: &[BranchSource]) -> String {
    let terms: Vec<String> = sources
        .iter()
        .map(|source| {
            let branch = format!("{alias}.{BRANCH_COLUMN} = {}", quote_literal(&source.branch));
            match source.cutoff {
                Some(cutoff) => format!("({branch} AND {alias}.{CREATED_COLUMN} <= {})", cutoff.get()),
                None => format!("({branch})"),
            }
        })
        .collect();
    disjunction(terms)
}

/// Rows of `alias` created and not yet removed inside some link of the chain.
fn live(alias: &str, sources: &[BranchSource]) -> String {
    let terms: Vec<String> = sources
        .iter()
        .map(|source| {
            let branch = format!("{alias}.{BRANCH_COLUMN} = {}", quote_literal(&source.branch));
            match source.cutoff {
                Some(cutoff) => {
                    let cutoff = cutoff.get();
                    format!(
                        "({branch} AND {alias}.{CREATED_COLUMN} <= {cutoff} AND ({alias}.{REMOVED_COLUMN} IS NULL OR {alias}.{REMOVED_COLUMN} > {cutoff}))"
                    )
                }
                None => format!("({branch} AND {alias}.{REMOVED_COLUMN} IS NULL)"),
            }
        })
        .collect();
    disjunction(terms)
}

fn disjunction(terms: Vec<String>) -> String {
    if terms.is_empty() {
        "0".to_string()
    } else {
        format!("({})", terms.join(" OR "))
    }
}

/// WHERE clause for rows of `relation` (aliased `alias`) visible through `sources`.
pub fn visibility_predicate(relation: &str, alias: &str, pkey: &str, sources: &[BranchSource]) -> String {
    let successor = "vsucc";
    format!(
        "{} AND NOT EXISTS (SELECT 1 FROM {relation} AS {successor} WHERE {successor}.{PARENT_COLUMN} = {alias}.{} AND {})",
        live(alias, sources),
        quote_ident(pkey),
        admitted(successor, sources),
    )
}
