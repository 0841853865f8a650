use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use ogr_types::{EntityName, Node, ObjectRef, StoreId, TypeError};
use tracing::debug;

use crate::changes::{ChangeSet, CommitReceipt};
use crate::error::{StoreError, StoreResult};
use crate::request::FetchRequest;
use crate::schema::Schema;
use crate::traits::Store;

type UniqueSlot = (EntityName, usize, String);

/// In-memory object graph store.
///
/// Rows live behind one `RwLock`: reads share it, commits take it
/// exclusively, which gives the single-writer commit the contexts rely on.
/// Uniqueness and relationship indexes are maintained alongside the rows so
/// commits never scan the whole store.
pub struct InMemoryStore {
    id: StoreId,
    schema: Schema,
    state: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<EntityName, BTreeMap<u64, Node>>,
    unique: HashMap<(EntityName, usize), HashMap<String, ObjectRef>>,
    referrers: HashMap<ObjectRef, BTreeSet<ObjectRef>>,
    next_row: u64,
    commits: u64,
}

impl StoreState {
    fn get(&self, reference: &ObjectRef) -> Option<&Node> {
        let row = reference.row()?;
        self.rows.get(reference.entity())?.get(&row)
    }
}

/// Validated commit, ready to apply.
struct CommitPlan {
    inserted: Vec<Node>,
    updated: Vec<Node>,
    deleted: Vec<ObjectRef>,
    receipt: CommitReceipt,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("store lock poisoned".into())
}

impl InMemoryStore {
    /// Create an empty store accepting the entities in `schema`.
    pub fn new(schema: Schema) -> Self {
        Self::with_id(StoreId::new(), schema)
    }

    pub fn with_id(id: StoreId, schema: Schema) -> Self {
        Self {
            id,
            schema,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Number of live nodes across all entities.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .map(|state| state.rows.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.state.read().map(|state| state.commits).unwrap_or(0)
    }

    fn check_own(&self, reference: &ObjectRef) -> StoreResult<()> {
        if reference.store() != self.id {
            return Err(StoreError::InvalidEncodedRef {
                encoded: reference.encode(),
                reason: "reference belongs to another store".into(),
            });
        }
        Ok(())
    }

    fn plan(&self, state: &StoreState, changes: &ChangeSet) -> StoreResult<CommitPlan> {
        let mut receipt = CommitReceipt::default();

        for (offset, node) in changes.inserted.iter().enumerate() {
            let temp = node.reference();
            self.check_own(temp)?;
            self.schema.entity(temp.entity())?;
            if !temp.is_temporary() {
                return Err(StoreError::Backend(format!(
                    "inserted node already has permanent reference {temp}"
                )));
            }
            let row = state.next_row + 1 + offset as u64;
            let permanent = ObjectRef::permanent(self.id, temp.entity().clone(), row);
            receipt.promotions.insert(temp.clone(), permanent.clone());
            receipt.inserted.push(permanent);
        }

        let remap = |r: &ObjectRef| receipt.promotions.get(r).cloned();

        let mut inserted = Vec::with_capacity(changes.inserted.len());
        for node in &changes.inserted {
            let mut node = node.clone();
            node.remap_refs(remap);
            inserted.push(node);
        }

        let mut updated = Vec::with_capacity(changes.updated.len());
        for node in &changes.updated {
            let reference = node.reference();
            self.check_own(reference)?;
            if reference.is_temporary() {
                return Err(StoreError::TemporaryReference(reference.clone()));
            }
            if state.get(reference).is_none() {
                return Err(StoreError::NotFound(reference.clone()));
            }
            let mut node = node.clone();
            node.remap_refs(remap);
            updated.push(node);
        }

        let mut deleted = Vec::with_capacity(changes.deleted.len());
        for reference in &changes.deleted {
            self.check_own(reference)?;
            if reference.is_temporary() {
                return Err(StoreError::TemporaryReference(reference.clone()));
            }
            if state.get(reference).is_none() {
                return Err(StoreError::NotFound(reference.clone()));
            }
            deleted.push(reference.clone());
        }

        for node in inserted.iter().chain(&updated) {
            self.schema.entity(node.entity())?.validate(node)?;
        }

        self.check_unique(state, &inserted, &updated, &deleted)?;
        self.check_references(state, &inserted, &updated, &deleted)?;

        receipt.updated = updated.iter().map(|n| n.reference().clone()).collect();
        receipt.deleted = deleted.clone();

        Ok(CommitPlan {
            inserted,
            updated,
            deleted,
            receipt,
        })
    }

    fn check_unique(
        &self,
        state: &StoreState,
        inserted: &[Node],
        updated: &[Node],
        deleted: &[ObjectRef],
    ) -> StoreResult<()> {
        let mut freed: HashSet<UniqueSlot> = HashSet::new();
        let old_versions = updated
            .iter()
            .map(Node::reference)
            .chain(deleted)
            .filter_map(|r| state.get(r));
        for old in old_versions {
            for (slot, _) in self.unique_slots(old)? {
                freed.insert(slot);
            }
        }

        let mut claims: HashMap<UniqueSlot, &ObjectRef> = HashMap::new();
        for node in inserted.iter().chain(updated) {
            for (slot, constraint) in self.unique_slots(node)? {
                let holder = state
                    .unique
                    .get(&(slot.0.clone(), slot.1))
                    .and_then(|index| index.get(&slot.2));
                let taken = match holder {
                    Some(holder) => holder != node.reference() && !freed.contains(&slot),
                    None => false,
                };
                if taken || claims.insert(slot.clone(), node.reference()).is_some() {
                    return Err(StoreError::ConstraintViolation {
                        entity: node.entity().clone(),
                        reason: format!("duplicate value for unique ({constraint})"),
                    });
                }
            }
        }
        Ok(())
    }

    fn unique_slots(&self, node: &Node) -> StoreResult<Vec<(UniqueSlot, String)>> {
        let entity = self.schema.entity(node.entity())?;
        Ok(entity
            .unique
            .iter()
            .enumerate()
            .filter_map(|(idx, constraint)| {
                constraint
                    .key(node)
                    .map(|key| ((node.entity().clone(), idx, key), constraint.describe()))
            })
            .collect())
    }

    fn check_references(
        &self,
        state: &StoreState,
        inserted: &[Node],
        updated: &[Node],
        deleted: &[ObjectRef],
    ) -> StoreResult<()> {
        let deleted_set: HashSet<&ObjectRef> = deleted.iter().collect();
        let inserted_set: HashSet<&ObjectRef> = inserted.iter().map(Node::reference).collect();
        let updated_by_ref: HashMap<&ObjectRef, &Node> =
            updated.iter().map(|n| (n.reference(), n)).collect();

        for node in inserted.iter().chain(updated) {
            for target in node.outgoing_refs() {
                if target.is_temporary() {
                    return Err(StoreError::TemporaryReference(target.clone()));
                }
                let live = inserted_set.contains(target)
                    || (state.get(target).is_some() && !deleted_set.contains(target));
                if target.store() != self.id || !live {
                    return Err(StoreError::ReferentialIntegrity {
                        from: node.reference().clone(),
                        to: target.clone(),
                    });
                }
            }
        }

        for target in deleted {
            let Some(referrers) = state.referrers.get(target) else {
                continue;
            };
            for from in referrers {
                if deleted_set.contains(from) {
                    continue;
                }
                let still_points = match updated_by_ref.get(from) {
                    Some(new) => new.outgoing_refs().any(|r| r == target),
                    None => true,
                };
                if still_points {
                    return Err(StoreError::ReferentialIntegrity {
                        from: from.clone(),
                        to: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn unindex(&self, state: &mut StoreState, node: &Node) -> StoreResult<()> {
        for ((entity, idx, key), _) in self.unique_slots(node)? {
            if let Some(index) = state.unique.get_mut(&(entity, idx)) {
                if index.get(&key) == Some(node.reference()) {
                    index.remove(&key);
                }
            }
        }
        for target in node.outgoing_refs() {
            if let Some(set) = state.referrers.get_mut(target) {
                set.remove(node.reference());
                if set.is_empty() {
                    state.referrers.remove(target);
                }
            }
        }
        Ok(())
    }

    fn index(&self, state: &mut StoreState, node: &Node) -> StoreResult<()> {
        for ((entity, idx, key), _) in self.unique_slots(node)? {
            state
                .unique
                .entry((entity, idx))
                .or_default()
                .insert(key, node.reference().clone());
        }
        for target in node.outgoing_refs() {
            state
                .referrers
                .entry(target.clone())
                .or_default()
                .insert(node.reference().clone());
        }
        Ok(())
    }

    fn apply(&self, state: &mut StoreState, plan: CommitPlan) -> StoreResult<CommitReceipt> {
        let mut removed = Vec::new();
        for reference in plan.updated.iter().map(Node::reference).chain(&plan.deleted) {
            if let Some(old) = state.get(reference).cloned() {
                removed.push(old);
            }
        }
        for old in &removed {
            self.unindex(state, old)?;
        }

        for reference in &plan.deleted {
            if let (Some(rows), Some(row)) =
                (state.rows.get_mut(reference.entity()), reference.row())
            {
                rows.remove(&row);
            }
        }

        let inserted_count = plan.inserted.len() as u64;
        for node in plan.inserted.into_iter().chain(plan.updated) {
            self.index(state, &node)?;
            let Some(row) = node.reference().row() else {
                return Err(StoreError::TemporaryReference(node.reference().clone()));
            };
            state
                .rows
                .entry(node.entity().clone())
                .or_default()
                .insert(row, node);
        }

        state.next_row += inserted_count;
        state.commits += 1;
        Ok(plan.receipt)
    }
}

impl Store for InMemoryStore {
    fn store_id(&self) -> StoreId {
        self.id
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn read(&self, reference: &ObjectRef) -> StoreResult<Option<Node>> {
        self.check_own(reference)?;
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.get(reference).cloned())
    }

    fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<Node>> {
        self.schema.entity(request.entity())?;
        let state = self.state.read().map_err(poisoned)?;
        let candidates: Vec<Node> = state
            .rows
            .get(request.entity())
            .map(|rows| rows.values().filter(|n| request.matches(n)).cloned().collect())
            .unwrap_or_default();
        Ok(request.finish(candidates))
    }

    fn count(&self, request: &FetchRequest) -> StoreResult<usize> {
        self.schema.entity(request.entity())?;
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .rows
            .get(request.entity())
            .map(|rows| rows.values().filter(|n| request.matches(n)).count())
            .unwrap_or(0))
    }

    fn commit(&self, changes: &ChangeSet) -> StoreResult<CommitReceipt> {
        let mut state = self.state.write().map_err(poisoned)?;
        let plan = self.plan(&state, changes)?;
        let receipt = self.apply(&mut state, plan)?;
        debug!(
            store = %self.id.short_id(),
            inserted = receipt.inserted.len(),
            updated = receipt.updated.len(),
            deleted = receipt.deleted.len(),
            "store commit"
        );
        Ok(receipt)
    }

    fn object_ref(&self, encoded: &str) -> StoreResult<ObjectRef> {
        let invalid = |reason: String| StoreError::InvalidEncodedRef {
            encoded: encoded.to_string(),
            reason,
        };
        let reference = ObjectRef::decode(encoded).map_err(|e| match e {
            TypeError::InvalidEncodedRef { reason, .. } => invalid(reason),
            other => invalid(other.to_string()),
        })?;
        if reference.store() != self.id {
            return Err(invalid("reference belongs to another store".into()));
        }
        if reference.is_temporary() {
            return Err(invalid("temporary references are not resolvable".into()));
        }
        if !self.schema.contains(reference.entity()) {
            return Err(invalid(format!("unknown entity {}", reference.entity())));
        }
        Ok(reference)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("id", &self.id)
            .field("node_count", &self.len())
            .finish()
    }
}
