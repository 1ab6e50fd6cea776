use audit_trail_core::{
    open_db_in_memory, Actor, AuditAction, AuditQuery, AuditStore, FinalizedAuditRecord,
    PropertyChange, SqliteAuditStore,
};
use chrono::{TimeZone, Utc};
use uuid::Uuid;

fn updated_record(entity_id: &str) -> FinalizedAuditRecord {
    let changes = vec![
        PropertyChange::new("name", Some("Passport".into()), Some("Visa".into())),
        PropertyChange::new("description", None, Some("travel".into())),
    ];
    FinalizedAuditRecord {
        entity_name: "identification_types".to_string(),
        entity_id: entity_id.to_string(),
        action: AuditAction::Updated,
        timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        actor: Actor::new(Uuid::new_v4(), "auditor"),
        changes_json: Some(serde_json::to_string(&changes).unwrap()),
        changes,
    }
}

#[test]
fn append_persists_entry_and_property_rows() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteAuditStore::new(&conn);
    let record = updated_record("7");

    let ids = store.append(std::slice::from_ref(&record)).unwrap();
    assert_eq!(ids.len(), 1);

    let entries = store.list_entries(&AuditQuery::default()).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.id, ids[0]);
    assert_eq!(entry.entity_id, "7");
    assert_eq!(entry.action, AuditAction::Updated);
    assert_eq!(entry.timestamp, record.timestamp);
    assert_eq!(entry.actor_id, record.actor.id);
    assert_eq!(entry.changes_json, record.changes_json);

    let properties = store.entry_properties(entry.id).unwrap();
    let names: Vec<_> = properties.iter().map(|p| p.property_name.as_str()).collect();
    assert_eq!(names, ["name", "description"]);
    assert_eq!(properties[1].old_value, None);
    assert_eq!(properties[1].new_value.as_deref(), Some("travel"));
}

#[test]
fn audit_tables_reject_update_and_delete() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteAuditStore::new(&conn);
    store.append(&[updated_record("7")]).unwrap();

    for sql in [
        "UPDATE audit_entries SET entity_id = 'x';",
        "DELETE FROM audit_entries;",
        "UPDATE audit_entry_properties SET new_value = 'x';",
        "DELETE FROM audit_entry_properties;",
    ] {
        let err = conn.execute(sql, []).unwrap_err();
        assert!(err.to_string().contains("append-only"), "{sql}: {err}");
    }
    assert_eq!(store.count_entries().unwrap(), 1);
}

#[test]
fn failed_append_leaves_no_partial_batch() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteAuditStore::new(&conn);
    conn.execute_batch(
        "CREATE TRIGGER reject_second BEFORE INSERT ON audit_entries
         WHEN NEW.entity_id = 'bad'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .unwrap();

    let result = store.append(&[updated_record("1"), updated_record("bad")]);
    assert!(result.is_err());
    assert_eq!(store.count_entries().unwrap(), 0);
    let orphaned: i64 = conn
        .query_row("SELECT COUNT(*) FROM audit_entry_properties;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(orphaned, 0);
}

#[test]
fn list_entries_filters_by_entity_and_pages() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteAuditStore::new(&conn);
    store
        .append(&[updated_record("1"), updated_record("2"), updated_record("1")])
        .unwrap();

    let for_one = store
        .list_entries(&AuditQuery {
            entity_name: Some("identification_types".to_string()),
            entity_id: Some("1".to_string()),
            ..AuditQuery::default()
        })
        .unwrap();
    assert_eq!(for_one.len(), 2);
    assert!(for_one[0].id < for_one[1].id);

    let second_page = store
        .list_entries(&AuditQuery {
            limit: Some(1),
            offset: 1,
            ..AuditQuery::default()
        })
        .unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].entity_id, "2");

    let skip_only = store
        .list_entries(&AuditQuery {
            offset: 2,
            ..AuditQuery::default()
        })
        .unwrap();
    assert_eq!(skip_only.len(), 1);
}
