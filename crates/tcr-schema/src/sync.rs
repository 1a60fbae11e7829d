//! Schema synchronization
//!
//! One state machine per storage partition:
//!
//! ```text
//! Unsynced ─► ChangeSetComputed ─► Applied ─► Verified
//!     └──────────────┴────────────────┴──────► Failed
//! ```
//!
//! The synchronizer diffs the expected tables of a batch of declarations
//! against the last-known structure of the partition (seeded by
//! introspection the first time the partition is seen), applies the
//! resulting operations one by one and then sweeps the real structure,
//! creating anything still missing directly. The ledger keeps the
//! fingerprint of the last operation applied to each table or column, so
//! re-applying a change set is a no-op and a retry after a partial failure
//! skips what already succeeded, while a column changed back and forth is
//! altered every time. Nothing is rolled back.

use crate::engine::StorageEngine;
use crate::error::{EngineError, SchemaError};
use crate::model::{ColumnSpec, SchemaOp, StorageStructure, TableSpec};
use crate::plan::plan_tables;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tcr_record::{ContentHash, StorageAlias};
use tcr_transform::EntityDecl;
use tokio::sync::Mutex;

/// Phase of a partition's state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    /// Never synchronized in this process
    Unsynced,
    /// Diff computed, nothing applied yet
    ChangeSetComputed {
        /// Number of operations in the change set
        operations: usize,
    },
    /// Change set applied, verification pending
    Applied,
    /// Structure matches the declarations
    Verified,
    /// A step failed
    Failed {
        /// Operations applied before the failure
        applied: Vec<String>,
        /// Step or operation that failed
        failed: String,
        /// Failure reason
        reason: String,
    },
}

/// Ordered operations needed to align one partition with its declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Partition
    pub alias: StorageAlias,
    /// Operations in execution order
    pub operations: Vec<SchemaOp>,
}

impl ChangeSet {
    /// Whether nothing needs to change
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Outcome of applying a change set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Operations executed by this call
    pub applied: Vec<String>,
    /// Operations skipped because the ledger already had them
    pub skipped: Vec<String>,
}

/// Outcome of a full synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Partition
    pub alias: StorageAlias,
    /// Change set that was computed
    pub change_set: ChangeSet,
    /// Application outcome
    pub apply: ApplyReport,
    /// Structures the verification sweep had to create directly
    pub repaired: Vec<String>,
    /// Final phase
    pub phase: SyncPhase,
}

/// Known column: `None` when it was only seen through introspection
type KnownTables = BTreeMap<String, BTreeMap<String, Option<ColumnSpec>>>;

#[derive(Debug)]
struct PartitionState {
    phase: SyncPhase,
    known: Option<KnownTables>,
    /// Last applied operation per table (`t`) or column (`t.c`)
    ledger: HashMap<String, ContentHash>,
}

impl PartitionState {
    fn new() -> Self {
        Self {
            phase: SyncPhase::Unsynced,
            known: None,
            ledger: HashMap::new(),
        }
    }

    /// Whether `op` is the last thing applied to its target and the known
    /// structure still shows its result
    fn already_applied(&self, op: &SchemaOp, fingerprint: &ContentHash) -> bool {
        self.ledger.get(&target(op)) == Some(fingerprint) && self.reflects(op)
    }

    fn reflects(&self, op: &SchemaOp) -> bool {
        let Some(known) = &self.known else {
            return false;
        };
        match op {
            SchemaOp::CreateTable(spec) => known.contains_key(&spec.name),
            SchemaOp::AddColumn { table, column } | SchemaOp::AlterColumn { table, column } => {
                known
                    .get(table)
                    .and_then(|columns| columns.get(&column.name))
                    .is_some_and(|c| c.as_ref() == Some(column))
            }
        }
    }

    fn record(&mut self, op: &SchemaOp) {
        let known = self.known.get_or_insert_with(BTreeMap::new);
        match op {
            SchemaOp::CreateTable(spec) => {
                known.insert(
                    spec.name.clone(),
                    spec.columns
                        .iter()
                        .map(|c| (c.name.clone(), Some(c.clone())))
                        .collect(),
                );
            }
            SchemaOp::AddColumn { table, column } | SchemaOp::AlterColumn { table, column } => {
                known
                    .entry(table.clone())
                    .or_default()
                    .insert(column.name.clone(), Some(column.clone()));
            }
        }
    }
}

fn target(op: &SchemaOp) -> String {
    match op {
        SchemaOp::CreateTable(spec) => spec.name.clone(),
        SchemaOp::AddColumn { table, column } | SchemaOp::AlterColumn { table, column } => {
            format!("{table}.{}", column.name)
        }
    }
}

fn seed(structure: &StorageStructure) -> KnownTables {
    structure
        .tables()
        .map(|table| {
            let columns = structure
                .columns(table)
                .map(|c| (c.to_string(), None))
                .collect();
            (table.to_string(), columns)
        })
        .collect()
}

fn diff(known: &KnownTables, expected: &[TableSpec]) -> Vec<SchemaOp> {
    let mut ops = Vec::new();
    for table in expected {
        let Some(existing) = known.get(&table.name) else {
            ops.push(SchemaOp::CreateTable(table.clone()));
            continue;
        };
        for column in &table.columns {
            match existing.get(&column.name) {
                None => ops.push(SchemaOp::AddColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                }),
                Some(Some(previous)) if previous != column => ops.push(SchemaOp::AlterColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                }),
                Some(_) => {}
            }
        }
    }
    ops
}

/// Reconciles declared entities with actual storage, per partition
#[derive(Debug, Clone)]
pub struct SchemaSynchronizer {
    engine: Arc<dyn StorageEngine>,
    states: Arc<DashMap<StorageAlias, Arc<Mutex<PartitionState>>>>,
}

impl SchemaSynchronizer {
    /// Create a synchronizer over `engine`
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            states: Arc::new(DashMap::new()),
        }
    }

    /// Engine the synchronizer drives
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    fn state(&self, alias: &StorageAlias) -> Arc<Mutex<PartitionState>> {
        Arc::clone(
            self.states
                .entry(alias.clone())
                .or_insert_with(|| Arc::new(Mutex::new(PartitionState::new())))
                .value(),
        )
    }

    /// Current phase of a partition
    pub async fn phase(&self, alias: &StorageAlias) -> SyncPhase {
        match self.states.get(alias).map(|s| Arc::clone(s.value())) {
            Some(state) => state.lock().await.phase.clone(),
            None => SyncPhase::Unsynced,
        }
    }

    /// Forget everything about a partition (after it was dropped)
    pub fn forget(&self, alias: &StorageAlias) {
        self.states.remove(alias);
    }

    /// Diff `decls` against the partition's last-known structure
    ///
    /// # Errors
    /// Returns [`SchemaError::Engine`] if the partition cannot be created or
    /// introspected
    pub async fn compute_change_set(
        &self,
        alias: &StorageAlias,
        decls: &[EntityDecl],
    ) -> Result<ChangeSet, SchemaError> {
        let state = self.state(alias);
        let mut state = state.lock().await;
        self.compute_locked(&mut state, alias, decls).await
    }

    /// Execute a change set, skipping operations already in the ledger
    ///
    /// # Errors
    /// Returns [`SchemaError::ApplyFailed`] with the operations applied so
    /// far when an operation fails; the partition moves to `Failed`
    pub async fn apply(
        &self,
        alias: &StorageAlias,
        change_set: &ChangeSet,
    ) -> Result<ApplyReport, SchemaError> {
        let state = self.state(alias);
        let mut state = state.lock().await;
        self.apply_locked(&mut state, alias, change_set).await
    }

    /// Create every expected structure that is still missing, bypassing the
    /// change-set machinery
    ///
    /// # Errors
    /// Returns [`SchemaError`] if listing or creating fails; the partition
    /// moves to `Failed`
    pub async fn verify(
        &self,
        alias: &StorageAlias,
        decls: &[EntityDecl],
    ) -> Result<Vec<String>, SchemaError> {
        let state = self.state(alias);
        let mut state = state.lock().await;
        self.verify_locked(&mut state, alias, decls).await
    }

    /// Compute, apply and verify in one exclusive run
    ///
    /// # Errors
    /// Returns the first failing step's error; the partition is left in
    /// `Failed` with enough state for an idempotent retry
    #[tracing::instrument(skip(self, decls), fields(entities = decls.len()))]
    pub async fn synchronize(
        &self,
        alias: &StorageAlias,
        decls: &[EntityDecl],
    ) -> Result<SyncReport, SchemaError> {
        let state = self.state(alias);
        let mut state = state.lock().await;

        let change_set = self.compute_locked(&mut state, alias, decls).await?;
        let apply = self.apply_locked(&mut state, alias, &change_set).await?;
        let repaired = self.verify_locked(&mut state, alias, decls).await?;

        tracing::info!(
            alias = %alias,
            applied = apply.applied.len(),
            skipped = apply.skipped.len(),
            repaired = repaired.len(),
            "schema verified"
        );
        Ok(SyncReport {
            alias: alias.clone(),
            change_set,
            apply,
            repaired,
            phase: state.phase.clone(),
        })
    }

    async fn compute_locked(
        &self,
        state: &mut PartitionState,
        alias: &StorageAlias,
        decls: &[EntityDecl],
    ) -> Result<ChangeSet, SchemaError> {
        if state.known.is_none() {
            let structure = match self.seed_structure(alias).await {
                Ok(structure) => structure,
                Err(source) => {
                    state.phase = SyncPhase::Failed {
                        applied: Vec::new(),
                        failed: "introspect".into(),
                        reason: source.to_string(),
                    };
                    return Err(SchemaError::engine(alias, source));
                }
            };
            state.known = Some(seed(&structure));
        }

        let expected = plan_tables(decls);
        let operations = diff(state.known.as_ref().unwrap_or(&BTreeMap::new()), &expected);
        tracing::debug!(alias = %alias, operations = operations.len(), "change set computed");

        state.phase = SyncPhase::ChangeSetComputed {
            operations: operations.len(),
        };
        Ok(ChangeSet {
            alias: alias.clone(),
            operations,
        })
    }

    async fn seed_structure(&self, alias: &StorageAlias) -> Result<StorageStructure, EngineError> {
        self.engine.ensure_partition(alias).await?;
        self.engine.list_structures(alias).await
    }

    async fn apply_locked(
        &self,
        state: &mut PartitionState,
        alias: &StorageAlias,
        change_set: &ChangeSet,
    ) -> Result<ApplyReport, SchemaError> {
        let mut report = ApplyReport::default();

        for op in &change_set.operations {
            let fingerprint = op.fingerprint()?;
            if state.already_applied(op, &fingerprint) {
                tracing::debug!(alias = %alias, op = %op, "already applied, skipping");
                report.skipped.push(op.to_string());
                continue;
            }

            match self.engine.execute(alias, op).await {
                Ok(()) => report.applied.push(op.to_string()),
                Err(EngineError::AlreadyExists(what)) => {
                    tracing::debug!(alias = %alias, %what, "structure already present");
                    report.skipped.push(op.to_string());
                }
                Err(source) => {
                    tracing::warn!(alias = %alias, op = %op, error = %source, "schema operation failed");
                    state.phase = SyncPhase::Failed {
                        applied: report.applied.clone(),
                        failed: op.to_string(),
                        reason: source.to_string(),
                    };
                    return Err(SchemaError::ApplyFailed {
                        alias: alias.clone(),
                        applied: report.applied,
                        failed: op.to_string(),
                        source,
                    });
                }
            }
            state.ledger.insert(target(op), fingerprint);
            state.record(op);
        }

        state.phase = SyncPhase::Applied;
        Ok(report)
    }

    async fn verify_locked(
        &self,
        state: &mut PartitionState,
        alias: &StorageAlias,
        decls: &[EntityDecl],
    ) -> Result<Vec<String>, SchemaError> {
        let mut repaired = Vec::new();
        let result = self.sweep(state, alias, decls, &mut repaired).await;

        match result {
            Ok(()) => {
                if !repaired.is_empty() {
                    tracing::info!(alias = %alias, repaired = ?repaired, "verification created missing structures");
                }
                state.phase = SyncPhase::Verified;
                Ok(repaired)
            }
            Err((failed, source)) => {
                tracing::warn!(alias = %alias, %failed, error = %source, "schema verification failed");
                state.phase = SyncPhase::Failed {
                    applied: repaired,
                    failed,
                    reason: source.to_string(),
                };
                Err(SchemaError::engine(alias, source))
            }
        }
    }

    async fn sweep(
        &self,
        state: &mut PartitionState,
        alias: &StorageAlias,
        decls: &[EntityDecl],
        repaired: &mut Vec<String>,
    ) -> Result<(), (String, EngineError)> {
        let actual = self
            .engine
            .list_structures(alias)
            .await
            .map_err(|e| ("introspect".to_string(), e))?;

        for table in plan_tables(decls) {
            let missing: Vec<SchemaOp> = if actual.has_table(&table.name) {
                table
                    .columns
                    .iter()
                    .filter(|c| !actual.has_column(&table.name, &c.name))
                    .map(|c| SchemaOp::AddColumn {
                        table: table.name.clone(),
                        column: c.clone(),
                    })
                    .collect()
            } else {
                vec![SchemaOp::CreateTable(table)]
            };

            for op in missing {
                match self.engine.execute(alias, &op).await {
                    Ok(()) | Err(EngineError::AlreadyExists(_)) => {}
                    Err(e) => return Err((op.to_string(), e)),
                }
                repaired.push(op.to_string());
                state.record(&op);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use pretty_assertions::assert_eq;
    use tcr_record::NamespaceLabel;
    use tcr_transform::capture;

    fn decls(src: &str) -> Vec<EntityDecl> {
        capture(src, &"tenant.7.blog".parse::<NamespaceLabel>().unwrap()).unwrap()
    }

    const POST: &str = "class Post(Model):\n    title = CharField(max_length=10)\n";
    const POST_WITH_BODY: &str =
        "class Post(Model):\n    title = CharField(max_length=10)\n    body = TextField()\n";

    fn setup() -> (Arc<MemoryEngine>, SchemaSynchronizer, StorageAlias) {
        let engine = Arc::new(MemoryEngine::new());
        let sync = SchemaSynchronizer::new(engine.clone());
        (engine, sync, StorageAlias::named("tenant_7"))
    }

    #[tokio::test]
    async fn synchronize_reaches_verified() {
        let (engine, sync, alias) = setup();
        assert_eq!(sync.phase(&alias).await, SyncPhase::Unsynced);

        let report = sync.synchronize(&alias, &decls(POST)).await.unwrap();
        assert_eq!(report.phase, SyncPhase::Verified);
        assert_eq!(report.apply.applied, vec!["create table tenant_7_blog_post"]);
        assert!(engine.table(&alias, "tenant_7_blog_post").is_some());
    }

    #[tokio::test]
    async fn reapplying_a_change_set_is_a_no_op() {
        let (engine, sync, alias) = setup();
        let change_set = sync.compute_change_set(&alias, &decls(POST)).await.unwrap();
        assert_eq!(change_set.len(), 1);

        sync.apply(&alias, &change_set).await.unwrap();
        let executed = engine.executed();
        let again = sync.apply(&alias, &change_set).await.unwrap();

        assert!(again.applied.is_empty());
        assert_eq!(again.skipped.len(), 1);
        assert_eq!(engine.executed(), executed);
        assert_eq!(sync.phase(&alias).await, SyncPhase::Applied);
    }

    #[tokio::test]
    async fn unchanged_declarations_compute_an_empty_change_set() {
        let (_, sync, alias) = setup();
        sync.synchronize(&alias, &decls(POST)).await.unwrap();
        let change_set = sync.compute_change_set(&alias, &decls(POST)).await.unwrap();
        assert!(change_set.is_empty());
    }

    #[tokio::test]
    async fn new_fields_become_additive_operations() {
        let (engine, sync, alias) = setup();
        sync.synchronize(&alias, &decls(POST)).await.unwrap();
        let report = sync.synchronize(&alias, &decls(POST_WITH_BODY)).await.unwrap();

        assert_eq!(report.apply.applied, vec!["add column tenant_7_blog_post.body"]);
        assert!(engine
            .table(&alias, "tenant_7_blog_post")
            .unwrap()
            .column("body")
            .is_some());
    }

    #[tokio::test]
    async fn changed_fields_become_alter_operations() {
        let (_, sync, alias) = setup();
        sync.synchronize(&alias, &decls(POST)).await.unwrap();
        let change_set = sync
            .compute_change_set(
                &alias,
                &decls("class Post(Model):\n    title = CharField(max_length=10, null=True)\n"),
            )
            .await
            .unwrap();
        assert_eq!(change_set.len(), 1);
        assert!(matches!(change_set.operations[0], SchemaOp::AlterColumn { .. }));
    }

    #[tokio::test]
    async fn column_changed_back_and_forth_is_altered_every_time() {
        let (engine, sync, alias) = setup();
        let strict = decls(POST);
        let nullable = decls("class Post(Model):\n    title = CharField(max_length=10, null=True)\n");
        let nullable_title = |engine: &MemoryEngine| {
            engine
                .table(&alias, "tenant_7_blog_post")
                .unwrap()
                .column("title")
                .unwrap()
                .nullable
        };

        sync.synchronize(&alias, &strict).await.unwrap();
        sync.synchronize(&alias, &nullable).await.unwrap();
        assert!(nullable_title(&*engine));
        sync.synchronize(&alias, &strict).await.unwrap();
        assert!(!nullable_title(&*engine));

        let report = sync.synchronize(&alias, &nullable).await.unwrap();
        assert_eq!(report.apply.applied, vec!["alter column tenant_7_blog_post.title"]);
        assert!(report.apply.skipped.is_empty());
        assert!(nullable_title(&*engine));
        assert!(sync.compute_change_set(&alias, &nullable).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_records_progress_and_retry_skips_it() {
        let (engine, sync, alias) = setup();
        let src = "class Author(Model):\n    name = CharField()\n\nclass Post(Model):\n    title = CharField()\n";
        engine.reject_table("tenant_7_blog_post");

        let err = sync.synchronize(&alias, &decls(src)).await.unwrap_err();
        match &err {
            SchemaError::ApplyFailed { applied, failed, .. } => {
                assert_eq!(applied, &vec!["create table tenant_7_blog_author".to_string()]);
                assert_eq!(failed, "create table tenant_7_blog_post");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
        assert!(matches!(sync.phase(&alias).await, SyncPhase::Failed { .. }));

        engine.accept_table("tenant_7_blog_post");
        let report = sync.synchronize(&alias, &decls(src)).await.unwrap();
        assert_eq!(report.apply.applied, vec!["create table tenant_7_blog_post"]);
        assert_eq!(report.phase, SyncPhase::Verified);
    }

    #[tokio::test]
    async fn verification_recreates_structures_dropped_out_of_band() {
        let (engine, sync, alias) = setup();
        let change_set = sync.compute_change_set(&alias, &decls(POST)).await.unwrap();
        sync.apply(&alias, &change_set).await.unwrap();
        engine.drop_table(&alias, "tenant_7_blog_post");

        // The ledger still has the create, so only the sweep can repair it.
        sync.apply(&alias, &change_set).await.unwrap();
        let repaired = sync.verify(&alias, &decls(POST)).await.unwrap();
        assert_eq!(repaired, vec!["create table tenant_7_blog_post"]);
        assert_eq!(sync.phase(&alias).await, SyncPhase::Verified);
    }

    #[tokio::test]
    async fn existing_structure_is_discovered_on_first_contact() {
        let (engine, sync, alias) = setup();
        engine.ensure_partition(&alias).await.unwrap();
        engine
            .execute(&alias, &SchemaOp::CreateTable(plan_tables(&decls(POST)).remove(0)))
            .await
            .unwrap();

        let change_set = sync.compute_change_set(&alias, &decls(POST_WITH_BODY)).await.unwrap();
        assert_eq!(change_set.len(), 1);
        assert!(matches!(change_set.operations[0], SchemaOp::AddColumn { .. }));
    }

    #[tokio::test]
    async fn unavailable_engine_fails_without_partial_state() {
        let (engine, sync, alias) = setup();
        engine.set_available(false);
        let err = sync.synchronize(&alias, &decls(POST)).await.unwrap_err();
        assert!(matches!(err, SchemaError::Engine { .. }));
        assert!(err.is_retryable());

        engine.set_available(true);
        assert!(sync.synchronize(&alias, &decls(POST)).await.is_ok());
    }
}
