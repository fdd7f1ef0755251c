//! Integration tests for foreign keys and delete policies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sitestore_core::catalog::DependentRelation;
use sitestore_core::{
    parse_fields, BlobStore, ConflictError, Database, DeleteBehavior, Error, KeySpace, NewTable,
    ReferenceIndex, Row, RowRef, ScanIndex, Session, StoreConfig, ValidationError, Value,
};

struct TestContext {
    db: Database,
    session: Session,
}

impl TestContext {
    fn new() -> Self {
        Self {
            db: Database::in_memory(),
            session: Session::new("hub-1", "alice").unwrap(),
        }
    }

    fn with_config(config: StoreConfig) -> Self {
        let blobs = Database::in_memory().blobs().clone();
        Self {
            db: Database::new(blobs, config),
            session: Session::new("hub-1", "alice").unwrap(),
        }
    }

    async fn table(&self, new: NewTable) {
        self.db.create_table(&self.session, new).await.unwrap();
    }

    async fn insert(&self, table: &str, json: &str) -> Row {
        self.db
            .insert_row(&self.session, table, parse_fields(json).unwrap())
            .await
            .unwrap()
    }

    async fn exists(&self, table: &str, row_id: &str) -> bool {
        match self.db.get_row(&self.session, table, row_id).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

async fn customers_and_orders(ctx: &TestContext, policy: DeleteBehavior) {
    ctx.table(NewTable::new("Customers").with_property("name", "string"))
        .await;
    ctx.table(
        NewTable::new("Orders")
            .with_property("customerId", "string")
            .with_reference("customerId", "customers", policy),
    )
    .await;
}

#[tokio::test]
async fn test_orders_customers_scenario() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::Restrict).await;

    ctx.insert("customers", r#"{"id":"c1","name":"Acme"}"#).await;
    let o1 = ctx.insert("orders", r#"{"customerId":"c1"}"#).await;

    let err = ctx
        .db
        .insert_row(
            &ctx.session,
            "orders",
            parse_fields(r#"{"customerId":"c2"}"#).unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    match err {
        Error::Validation(ValidationError::ForeignKeyViolation {
            field,
            references,
            value,
            ..
        }) => {
            assert_eq!(field, "customerId");
            assert_eq!(references, "customers.id");
            assert_eq!(value, "\"c2\"");
        }
        other => panic!("expected foreign key violation, got {other:?}"),
    }

    // The order still points at c1, so the customer cannot go.
    let err = ctx
        .db
        .delete_row(&ctx.session, "customers", "c1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Conflict(ConflictError::RestrictViolation { count: 1, .. })
    ));
    assert!(ctx.exists("customers", "c1").await);
    assert!(ctx.exists("orders", &o1.id).await);

    let result = ctx.db.delete_row(&ctx.session, "orders", &o1.id).await.unwrap();
    assert!(!result.cascaded());
    assert!(!ctx.exists("orders", &o1.id).await);

    let result = ctx.db.delete_row(&ctx.session, "customers", "c1").await.unwrap();
    assert_eq!(result.target, RowRef::new("customers", "c1"));
    assert_eq!(result.affected_count(), 0);
    assert!(!ctx.exists("customers", "c1").await);
}

#[tokio::test]
async fn test_null_reference_is_allowed() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::Restrict).await;

    let row = ctx.insert("orders", r#"{"customerId":null,"note":"walk-in"}"#).await;
    assert!(row.fields["customerId"].is_null());
    ctx.insert("orders", r#"{"note":"no customer field"}"#).await;
}

#[tokio::test]
async fn test_reference_to_missing_table_fails() {
    let ctx = TestContext::new();
    ctx.table(NewTable::new("Issues").with_reference(
        "siteId",
        "sites",
        DeleteBehavior::Restrict,
    ))
    .await;

    let err = ctx
        .db
        .insert_row(
            &ctx.session,
            "issues",
            parse_fields(r#"{"siteId":"s1"}"#).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::ForeignKeyViolation { .. })
    ));
}

#[tokio::test]
async fn test_no_type_coercion_in_references() {
    let ctx = TestContext::new();
    ctx.table(NewTable::new("Codes")).await;
    ctx.table(NewTable::new("Items").with_relationship(
        "code",
        sitestore_core::RelationshipDef::new("codes.value"),
    ))
    .await;
    ctx.insert("codes", r#"{"value":5}"#).await;

    ctx.insert("items", r#"{"code":5}"#).await;
    ctx.insert("items", r#"{"code":5.0}"#).await;
    let err = ctx
        .db
        .insert_row(&ctx.session, "items", parse_fields(r#"{"code":"5"}"#).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::ForeignKeyViolation { .. })
    ));
}

#[tokio::test]
async fn test_restrict_blocks_delete() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::Restrict).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;
    ctx.insert("orders", r#"{"customerId":"c1"}"#).await;
    ctx.insert("orders", r#"{"customerId":"c1"}"#).await;

    let plan = ctx.db.can_delete(&ctx.session, "customers", "c1").await.unwrap();
    assert!(!plan.is_allowed());
    assert_eq!(plan.blockers[0].row_ids.len(), 2);

    let err = ctx
        .db
        .delete_row(&ctx.session, "customers", "c1")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
    match err {
        Error::Conflict(ConflictError::RestrictViolation {
            referencing_table,
            field,
            count,
            ..
        }) => {
            assert_eq!(referencing_table, "orders");
            assert_eq!(field, "customerId");
            assert_eq!(count, 2);
        }
        other => panic!("expected restrict violation, got {other:?}"),
    }
    assert!(ctx.exists("customers", "c1").await);
}

#[tokio::test]
async fn test_restrict_checked_before_any_cascade() {
    let ctx = TestContext::new();
    ctx.table(NewTable::new("Customers")).await;
    ctx.table(NewTable::new("Orders").with_reference(
        "customerId",
        "customers",
        DeleteBehavior::Cascade,
    ))
    .await;
    ctx.table(NewTable::new("Notes").with_reference(
        "customerId",
        "customers",
        DeleteBehavior::SetNull,
    ))
    .await;
    ctx.table(NewTable::new("Invoices").with_reference(
        "customerId",
        "customers",
        DeleteBehavior::Restrict,
    ))
    .await;

    ctx.insert("customers", r#"{"id":"c1"}"#).await;
    let order = ctx.insert("orders", r#"{"customerId":"c1"}"#).await;
    let note = ctx.insert("notes", r#"{"customerId":"c1"}"#).await;
    ctx.insert("invoices", r#"{"customerId":"c1"}"#).await;

    let err = ctx
        .db
        .delete_row(&ctx.session, "customers", "c1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Conflict(ConflictError::RestrictViolation { .. })
    ));

    assert!(ctx.exists("orders", &order.id).await);
    let note = ctx.db.get_row(&ctx.session, "notes", &note.id).await.unwrap();
    assert_eq!(note.fields["customerId"], Value::from("c1"));
    assert!(note.meta.cascade_reason.is_none());
}

#[tokio::test]
async fn test_set_null_annotates_dependents() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::SetNull).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;
    let order = ctx.insert("orders", r#"{"customerId":"c1","total":10}"#).await;

    let bob = Session::new("hub-1", "bob").unwrap();
    let result = ctx.db.delete_row(&bob, "customers", "c1").await.unwrap();
    assert!(result.cascaded());
    assert_eq!(
        result.nullified_fields,
        vec![(RowRef::new("orders", order.id.clone()), "customerId".to_string())]
    );

    let order = ctx.db.get_row(&ctx.session, "orders", &order.id).await.unwrap();
    assert!(order.fields["customerId"].is_null());
    assert_eq!(order.fields["total"], Value::Int(10));
    assert_eq!(order.meta.created_by, "alice");
    assert_eq!(order.meta.updated_by.as_deref(), Some("bob"));
    let reason = order.meta.cascade_reason.unwrap();
    assert!(reason.contains("customers/c1"));
}

#[tokio::test]
async fn test_update_revalidates_merged_row() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::Restrict).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;
    let order = ctx.insert("orders", r#"{"customerId":"c1","status":"open"}"#).await;

    let err = ctx
        .db
        .update_row(
            &ctx.session,
            "orders",
            &order.id,
            parse_fields(r#"{"customerId":"nope"}"#).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::ForeignKeyViolation { .. })
    ));

    let updated = ctx
        .db
        .update_row(
            &ctx.session,
            "orders",
            &order.id,
            parse_fields(r#"{"status":"closed","id":"ignored","_meta":{"createdBy":"mallory"}}"#)
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated.id, order.id);
    assert_eq!(updated.fields["status"], Value::from("closed"));
    assert_eq!(updated.fields["customerId"], Value::from("c1"));
    assert_eq!(updated.meta.created_by, "alice");
    assert_eq!(updated.meta.created_at, order.meta.created_at);
    assert!(updated.meta.updated_at.is_some());
}

#[tokio::test]
async fn test_update_of_unrelated_field_rechecks_references() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::Restrict).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;
    let order = ctx.insert("orders", r#"{"customerId":"c1","status":"open"}"#).await;

    // Remove the customer behind the store's back, bypassing delete policies.
    let key = ctx.session.keys().row_key("customers", "c1").unwrap();
    ctx.db.blobs().delete(&key).await.unwrap();

    let err = ctx
        .db
        .update_row(
            &ctx.session,
            "orders",
            &order.id,
            parse_fields(r#"{"status":"closed"}"#).unwrap(),
        )
        .await
        .unwrap_err();
    match err {
        Error::Validation(ValidationError::ForeignKeyViolation { field, value, .. }) => {
            assert_eq!(field, "customerId");
            assert_eq!(value, "\"c1\"");
        }
        other => panic!("expected foreign key violation, got {other:?}"),
    }

    let stored = ctx.db.get_row(&ctx.session, "orders", &order.id).await.unwrap();
    assert_eq!(stored.fields["status"], Value::from("open"));
}

#[tokio::test]
async fn test_update_of_absent_row_creates_it() {
    let ctx = TestContext::new();
    ctx.table(NewTable::new("Punch List").with_required("title"))
        .await;

    let row = ctx
        .db
        .update_row(
            &ctx.session,
            "punch-list",
            "p1",
            parse_fields(r#"{"title":"Fix door"}"#).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(row.id, "p1");
    assert!(row.meta.updated_at.is_none());
    assert!(ctx.exists("punch-list", "p1").await);

    let err = ctx
        .db
        .update_row(
            &ctx.session,
            "punch-list",
            "p1",
            parse_fields(r#"{"title":null}"#).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingRequiredField { .. })
    ));
}

#[tokio::test]
async fn test_second_delete_is_not_found() {
    let ctx = TestContext::new();
    ctx.table(NewTable::new("Customers")).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;

    ctx.db.delete_row(&ctx.session, "customers", "c1").await.unwrap();
    let err = ctx
        .db
        .delete_row(&ctx.session, "customers", "c1")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_supplied_id_collision_is_conflict() {
    let ctx = TestContext::new();
    ctx.table(NewTable::new("Customers")).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;

    let err = ctx
        .db
        .insert_row(&ctx.session, "customers", parse_fields(r#"{"id":"c1"}"#).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Conflict(ConflictError::AlreadyExists { .. })
    ));
}

async fn three_levels(ctx: &TestContext) {
    ctx.table(NewTable::new("Projects")).await;
    ctx.table(NewTable::new("Tasks").with_reference(
        "projectId",
        "projects",
        DeleteBehavior::Cascade,
    ))
    .await;
    ctx.table(NewTable::new("Comments").with_reference(
        "taskId",
        "tasks",
        DeleteBehavior::Cascade,
    ))
    .await;

    ctx.insert("projects", r#"{"id":"p1"}"#).await;
    ctx.insert("tasks", r#"{"id":"t1","projectId":"p1"}"#).await;
    ctx.insert("comments", r#"{"id":"k1","taskId":"t1"}"#).await;
}

#[tokio::test]
async fn test_flat_cascade_stops_at_direct_dependents() {
    let ctx = TestContext::new();
    three_levels(&ctx).await;

    let result = ctx.db.delete_row(&ctx.session, "projects", "p1").await.unwrap();
    assert_eq!(result.deleted_rows, vec![RowRef::new("tasks", "t1")]);
    assert!(!ctx.exists("tasks", "t1").await);
    assert!(ctx.exists("comments", "k1").await);
}

#[tokio::test]
async fn test_recursive_cascade_reaches_grandchildren() {
    let ctx = TestContext::with_config(StoreConfig::new().with_recursive_cascade(10));
    three_levels(&ctx).await;

    let result = ctx.db.delete_row(&ctx.session, "projects", "p1").await.unwrap();
    assert_eq!(
        result.deleted_rows,
        vec![RowRef::new("tasks", "t1"), RowRef::new("comments", "k1")]
    );
    assert!(!ctx.exists("comments", "k1").await);
}

#[tokio::test]
async fn test_recursive_cascade_depth_limit() {
    let ctx = TestContext::with_config(StoreConfig::new().with_recursive_cascade(1));
    three_levels(&ctx).await;

    let err = ctx
        .db
        .delete_row(&ctx.session, "projects", "p1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CascadeDepthExceeded { depth: 2 }));
    assert!(ctx.exists("projects", "p1").await);
    assert!(ctx.exists("tasks", "t1").await);
}

#[tokio::test]
async fn test_recursive_cascade_survives_cycles() {
    let ctx = TestContext::with_config(StoreConfig::new().with_recursive_cascade(10));
    ctx.table(NewTable::new("Tasks")).await;
    ctx.db
        .extend_table(
            &ctx.session,
            "tasks",
            &sitestore_core::TableExtension::new().with_relationship(
                "blockedBy",
                sitestore_core::RelationshipDef::to_table("tasks")
                    .with_on_delete(DeleteBehavior::Cascade),
            ),
        )
        .await
        .unwrap();

    ctx.insert("tasks", r#"{"id":"a"}"#).await;
    ctx.insert("tasks", r#"{"id":"b","blockedBy":"a"}"#).await;
    ctx.db
        .update_row(
            &ctx.session,
            "tasks",
            "a",
            parse_fields(r#"{"blockedBy":"b"}"#).unwrap(),
        )
        .await
        .unwrap();

    let result = ctx.db.delete_row(&ctx.session, "tasks", "a").await.unwrap();
    assert_eq!(result.deleted_rows, vec![RowRef::new("tasks", "b")]);
    assert!(!ctx.exists("tasks", "a").await);
    assert!(!ctx.exists("tasks", "b").await);
}

#[tokio::test]
async fn test_corrupt_rows_are_skipped() {
    let ctx = TestContext::new();
    customers_and_orders(&ctx, DeleteBehavior::Restrict).await;
    ctx.insert("customers", r#"{"id":"c1"}"#).await;

    let key = ctx.session.keys().row_key("customers", "c2").unwrap();
    ctx.db
        .blobs()
        .put(&key, Bytes::from_static(b"{\"id\":\"c2\",broken"))
        .await
        .unwrap();

    let rows = ctx.db.list_rows(&ctx.session, "customers").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "c1");

    let err = ctx
        .db
        .insert_row(
            &ctx.session,
            "orders",
            parse_fields(r#"{"customerId":"c2"}"#).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::ForeignKeyViolation { .. })
    ));
}

/// Counts hook calls while delegating lookups to a scan.
struct CountingIndex {
    scan: ScanIndex,
    written: AtomicUsize,
    deleted: AtomicUsize,
}

#[async_trait]
impl ReferenceIndex for CountingIndex {
    async fn dependents(
        &self,
        keys: &KeySpace,
        table: &str,
    ) -> sitestore_core::Result<Vec<DependentRelation>> {
        self.scan.dependents(keys, table).await
    }

    async fn find_rows(
        &self,
        keys: &KeySpace,
        table: &str,
        field: &str,
        value: &Value,
    ) -> sitestore_core::Result<Vec<Row>> {
        self.scan.find_rows(keys, table, field, value).await
    }

    async fn row_written(&self, _keys: &KeySpace, _table: &str, _row: &Row) -> sitestore_core::Result<()> {
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn row_deleted(
        &self,
        _keys: &KeySpace,
        _table: &str,
        _row_id: &str,
    ) -> sitestore_core::Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_custom_index_sees_every_row_write() {
    let base = Database::in_memory();
    let blobs: Arc<dyn BlobStore> = base.blobs().clone();
    let index = Arc::new(CountingIndex {
        scan: ScanIndex::new(blobs.clone()),
        written: AtomicUsize::new(0),
        deleted: AtomicUsize::new(0),
    });
    let ctx = TestContext {
        db: Database::new(blobs, StoreConfig::default()).with_index(index.clone()),
        session: Session::new("hub-1", "alice").unwrap(),
    };
    customers_and_orders(&ctx, DeleteBehavior::Cascade).await;

    ctx.insert("customers", r#"{"id":"c1"}"#).await;
    ctx.insert("orders", r#"{"customerId":"c1"}"#).await;
    ctx.db.delete_row(&ctx.session, "customers", "c1").await.unwrap();

    assert_eq!(index.written.load(Ordering::SeqCst), 2);
    assert_eq!(index.deleted.load(Ordering::SeqCst), 2);
}
