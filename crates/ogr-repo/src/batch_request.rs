//! Bulk requests over raw attribute maps.
//!
//! These skip the model layer but still go through a scratchpad, so they
//! validate, commit and notify exactly like any other mutation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ogr_store::FetchRequest;
use ogr_types::{EntityName, ObjectRef, TransactionAuthor, Value};

use crate::error::RepoResult;
use crate::repository::Repository;

/// Result of a bulk request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestOutcome {
    /// Number of nodes inserted, updated or deleted.
    pub affected: usize,
    /// Permanent references of the affected nodes.
    pub refs: Vec<ObjectRef>,
}

impl BatchRequestOutcome {
    fn from_refs(refs: Vec<ObjectRef>) -> Self {
        Self {
            affected: refs.len(),
            refs,
        }
    }
}

impl Repository {
    /// Insert one node of `entity` per row.
    pub async fn batch_insert(
        &self,
        entity: &EntityName,
        rows: Vec<BTreeMap<String, Value>>,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<BatchRequestOutcome> {
        if rows.is_empty() {
            return Ok(BatchRequestOutcome::default());
        }
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    let mut staged = Vec::with_capacity(rows.len());
                    for row in rows {
                        let mut node = ws.new_node(entity.clone())?;
                        for (name, value) in row {
                            node.set(name, value);
                        }
                        staged.push(ws.insert(node)?);
                    }
                    Ok(staged)
                },
                |_, receipt, staged| {
                    let refs = staged.iter().map(|r| receipt.promote(r)).collect();
                    Ok(BatchRequestOutcome::from_refs(refs))
                },
            )
            .await
    }

    /// Set `attributes` on every node `request` selects.
    pub async fn batch_update(
        &self,
        request: &FetchRequest,
        attributes: BTreeMap<String, Value>,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<BatchRequestOutcome> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    let nodes = ws.fetch(request)?;
                    let mut refs = Vec::with_capacity(nodes.len());
                    for mut node in nodes {
                        for (name, value) in &attributes {
                            node.set(name.clone(), value.clone());
                        }
                        refs.push(node.reference().clone());
                        ws.update(node)?;
                    }
                    Ok(refs)
                },
                |_, _, refs| Ok(BatchRequestOutcome::from_refs(refs)),
            )
            .await
    }

    /// Delete every node `request` selects.
    pub async fn batch_delete(
        &self,
        request: &FetchRequest,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<BatchRequestOutcome> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    let refs: Vec<ObjectRef> = ws
                        .fetch(request)?
                        .iter()
                        .map(|node| node.reference().clone())
                        .collect();
                    for reference in &refs {
                        ws.delete(reference)?;
                    }
                    Ok(refs)
                },
                |_, _, refs| Ok(BatchRequestOutcome::from_refs(refs)),
            )
            .await
    }
}
