//! Walkthrough of the full enforcement path: policy, codec, projection,
//! audit.

use phidb::audit::{AuditQuery, AuditStore, AuditWriter, MemoryAuditStore};
use phidb::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("PhiDB Record Flow Example");
    println!("=========================\n");

    // Collaborators are injected: vault, audit store, rule and visibility
    // tables.
    let audit = Arc::new(MemoryAuditStore::new());
    let evaluator = Arc::new(PolicyEvaluator::new(
        RuleTable::standard(),
        AuditWriter::new(Arc::clone(&audit) as Arc<dyn AuditStore>),
    ));
    let engine =
        FieldEncryptionEngine::new(MemoryKeyVault::new(), patient_schema(), CipherMode::default());
    let service =
        RecordService::new(evaluator, RecordCodec::new(engine), VisibilityTable::standard_patient());
    println!("✓ Service wired (memory vault, memory audit store)\n");

    let record = json!({
        "id": "pat_0001",
        "created_at": "2024-06-02T09:30:00Z",
        "last_name": "Smith",
        "email": "jane.smith@example.com",
        "birth_date": "1985-03-14",
        "national_id": "123-45-6789",
        "diagnoses": ["Hypertension"]
    })
    .as_object()
    .unwrap()
    .clone();

    // A clinician creates the record; classified fields leave the
    // application tier encrypted.
    let clinician = Principal::new("dr.osei", [Role::Clinician]);
    let stored = service.store(&clinician, Action::Create, &record)?;
    println!("Stored surname field: {}", serde_json::to_string(&stored["last_name"])?);
    println!("✓ Record encrypted for storage\n");

    // The clinician sees clinical content; the front desk does not.
    let view = service.fetch(&clinician, Action::View, &stored)?;
    println!("Clinician view: diagnoses = {}", view["diagnoses"]);

    let front_desk = Principal::new("reception.1", [Role::FrontDesk]);
    let view = service.fetch(&front_desk, Action::View, &stored)?;
    println!("Front-desk view: diagnoses present = {}", view.contains_key("diagnoses"));
    println!("Front-desk view: national_id = {}", view["national_id"]);
    println!("✓ Role projection applied\n");

    // A denied request still lands in the audit trail.
    let denied = service.fetch(&front_desk, Action::ViewSensitiveSubset, &stored);
    println!("Front-desk sensitive request: {:?}", denied.err().map(|e| e.to_string()));

    let entries = audit.query(&AuditQuery::new())?;
    println!("Audit entries recorded: {}", entries.len());
    for entry in &entries {
        println!("  [{:?}] {} {} by {}", entry.decision, entry.action, entry.entity_kind, entry.actor);
    }

    println!("\n=========================");
    println!("All operations audited.");

    Ok(())
}
