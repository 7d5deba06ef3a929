//! End-to-end flow tests with the file key vault.

use phidb::audit::{count_last_24h, AuditDecision, AuditQuery, AuditStore, AuditWriter, MemoryAuditStore};
use phidb::codec::{Document, RecordCodec};
use phidb::engine::{CipherMode, FieldEncryptionEngine};
use phidb::error::Error;
use phidb::key_vault::CachedKeyVault;
use phidb::policy::{Action, Principal, PolicyEvaluator, Role, RuleTable};
use phidb::projection::VisibilityTable;
use phidb::schema::{patient_schema, EntityKind};
use phidb::service::RecordService;
use phidb_key_file::FileKeyVault;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn build_service(
    key_dir: &Path,
) -> (RecordService<CachedKeyVault<FileKeyVault>>, Arc<MemoryAuditStore>) {
    let vault = CachedKeyVault::new(FileKeyVault::init(key_dir).expect("init key dir"));
    let audit = Arc::new(MemoryAuditStore::new());
    let evaluator = Arc::new(PolicyEvaluator::new(
        RuleTable::standard(),
        AuditWriter::new(Arc::clone(&audit) as Arc<dyn AuditStore>),
    ));
    let codec =
        RecordCodec::new(FieldEncryptionEngine::new(vault, patient_schema(), CipherMode::default()));
    (RecordService::new(evaluator, codec, VisibilityTable::standard_patient()), audit)
}

fn smith_record() -> Document {
    json!({
        "id": "pat_0001",
        "created_at": "2024-06-02T09:30:00Z",
        "first_name": "Jane",
        "last_name": "Smith",
        "email": "jane.smith@example.com",
        "phone": "+1-555-0117",
        "birth_date": "1985-03-14",
        "national_id": "123-45-6789",
        "diagnoses": ["Hypertension"],
        "medications": ["Lisinopril 10mg"],
        "notes": "Follow-up in six months."
    })
    .as_object()
    .unwrap()
    .clone()
}

#[test]
fn test_clinician_and_front_desk_views_of_the_same_record() {
    let temp_dir = TempDir::new().expect("temp dir");
    let (service, audit) = build_service(temp_dir.path());

    let clinician = Principal::new("dr.osei", [Role::Clinician]);
    let front_desk = Principal::new("reception.1", [Role::FrontDesk]);

    let stored = service.store(&clinician, Action::Create, &smith_record()).expect("store");

    // Clinician view includes the surname and the clinical list.
    let clinician_view = service.fetch(&clinician, Action::View, &stored).expect("clinician view");
    assert_eq!(clinician_view.get("last_name").unwrap(), &json!("Smith"));
    assert_eq!(clinician_view.get("diagnoses").unwrap(), &json!(["Hypertension"]));

    // Front desk sees the surname but the diagnosis key is absent entirely.
    let front_view = service.fetch(&front_desk, Action::View, &stored).expect("front-desk view");
    assert_eq!(front_view.get("last_name").unwrap(), &json!("Smith"));
    assert!(!front_view.contains_key("diagnoses"));

    // Front desk requesting the sensitive subset is denied, with exactly
    // one audit entry recording the deny.
    let before = audit.count(None).unwrap();
    let result = service.fetch(&front_desk, Action::ViewSensitiveSubset, &stored);
    assert!(matches!(result, Err(Error::PolicyDeny(_))));
    assert_eq!(audit.count(None).unwrap(), before + 1);

    let denies = audit
        .query(&AuditQuery::new().action(Action::ViewSensitiveSubset))
        .unwrap();
    assert_eq!(denies.len(), 1);
    assert_eq!(denies[0].decision, AuditDecision::Deny);
    assert_eq!(denies[0].actor, "reception.1");
}

#[test]
fn test_records_survive_process_restart() {
    let temp_dir = TempDir::new().expect("temp dir");

    let stored = {
        let (service, _) = build_service(temp_dir.path());
        let clinician = Principal::new("dr.osei", [Role::Clinician]);
        service.store(&clinician, Action::Create, &smith_record()).expect("store")
    };

    // A fresh service over the same key directory decrypts what the first
    // one wrote: the vault's idempotent lookup at work.
    let (service, _) = build_service(temp_dir.path());
    let clinician = Principal::new("dr.osei", [Role::Clinician]);
    let view = service.fetch(&clinician, Action::View, &stored).expect("fetch after restart");
    assert_eq!(view.get("national_id").unwrap(), &json!("123-45-6789"));
}

#[test]
fn test_equality_search_on_stored_surname() {
    let temp_dir = TempDir::new().expect("temp dir");
    let (service, _) = build_service(temp_dir.path());
    let clinician = Principal::new("dr.osei", [Role::Clinician]);

    let stored_a = service.store(&clinician, Action::Create, &smith_record()).unwrap();

    let mut second = smith_record();
    second.insert("id".to_string(), json!("pat_0002"));
    second.insert("national_id".to_string(), json!("987-65-4321"));
    let stored_b = service.store(&clinician, Action::Create, &second).unwrap();

    // Same surname, same stored blob: an exact-match query on the
    // ciphertext finds both records.
    assert_eq!(stored_a.get("last_name"), stored_b.get("last_name"));
}

#[test]
fn test_audit_query_surface() {
    let temp_dir = TempDir::new().expect("temp dir");
    let (service, audit) = build_service(temp_dir.path());
    let clinician = Principal::new("dr.osei", [Role::Clinician]);
    let nobody = Principal::new("anonymous", []);

    let stored = service.store(&clinician, Action::Create, &smith_record()).unwrap();
    service.fetch(&clinician, Action::View, &stored).unwrap();
    let _ = service.fetch(&nobody, Action::View, &stored);

    // Time-range + action + entity-type filters, newest first.
    let views = audit
        .query(&AuditQuery::new().action(Action::View).entity_kind(EntityKind::Patient))
        .unwrap();
    assert_eq!(views.len(), 2);
    assert!(views[0].timestamp >= views[1].timestamp);

    // Rolling count for dashboards: everything here happened just now.
    assert_eq!(count_last_24h(audit.as_ref()).unwrap(), 3);
}
