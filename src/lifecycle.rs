// src/lifecycle.rs
//
// Patient lifecycle tracking. Originally this lived as a side effect of the
// entity save path; here it is an explicit diff the caller runs after a
// successful persist, followed by apply_audit_events to write the trail.
// Audit writes are best-effort and not transactional with the persist.

use crate::models::{plan_label, plan_rank, AuditActivity, ChangeType, PatientRow};
use crate::store::{AuditStore, NewPatientStatus, NewPlanHistory, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// First persist of a patient record.
    Registered,
    PlanChanged {
        old_plan: Option<i16>,
        new_plan: Option<i16>,
        change_type: ChangeType,
    },
    OptedOut,
    OptedIn,
}

/// Diff the previous persisted state against the new state.
/// `old = None` means the patient was just created.
pub fn record_patient_change(old: Option<&PatientRow>, new: &PatientRow) -> Vec<AuditEvent> {
    let Some(old) = old else {
        return vec![AuditEvent::Registered];
    };

    let mut events = Vec::new();

    let plan_changed = old.membership_plan != new.membership_plan;
    let date_changed = old.enrollment_date != new.enrollment_date;

    if plan_changed {
        let change_type = if plan_rank(new.membership_plan) > plan_rank(old.membership_plan) {
            ChangeType::Upgrade
        } else {
            ChangeType::Downgrade
        };
        events.push(AuditEvent::PlanChanged {
            old_plan: old.membership_plan,
            new_plan: new.membership_plan,
            change_type,
        });
    } else if date_changed && new.membership_plan.is_some() {
        events.push(AuditEvent::PlanChanged {
            old_plan: old.membership_plan,
            new_plan: new.membership_plan,
            change_type: ChangeType::Renewal,
        });
    }

    if old.accepts_marketing && !new.accepts_marketing {
        events.push(AuditEvent::OptedOut);
    } else if !old.accepts_marketing && new.accepts_marketing {
        events.push(AuditEvent::OptedIn);
    }

    events
}

/// Write the audit trail for a set of events. A PlanChanged event produces
/// one plan_history row and one patient_status row.
pub async fn apply_audit_events(
    audit: &dyn AuditStore,
    patient: &PatientRow,
    events: &[AuditEvent],
) -> Result<(), StoreError> {
    for event in events {
        match event {
            AuditEvent::Registered => {
                audit
                    .add_patient_status(NewPatientStatus {
                        patient_id: patient.patient_id,
                        activity_type: AuditActivity::Added,
                        description: Some("Patient registered in directory".to_string()),
                        full_content: None,
                    })
                    .await?;
            }
            AuditEvent::PlanChanged {
                old_plan,
                new_plan,
                change_type,
            } => {
                audit
                    .add_plan_history(NewPlanHistory {
                        patient_id: patient.patient_id,
                        old_plan: *old_plan,
                        new_plan: *new_plan,
                        change_type: *change_type,
                    })
                    .await?;

                let activity_type = match change_type {
                    ChangeType::Renewal => AuditActivity::PlanRenewed,
                    _ => AuditActivity::PlanUpdated,
                };
                audit
                    .add_patient_status(NewPatientStatus {
                        patient_id: patient.patient_id,
                        activity_type,
                        description: Some(format!(
                            "{}: {} → {}",
                            change_type.label(),
                            plan_label(*old_plan),
                            plan_label(*new_plan)
                        )),
                        full_content: None,
                    })
                    .await?;
            }
            AuditEvent::OptedOut => {
                audit
                    .add_patient_status(NewPatientStatus {
                        patient_id: patient.patient_id,
                        activity_type: AuditActivity::OptOut,
                        description: patient.unsubscribe_reason.clone(),
                        full_content: None,
                    })
                    .await?;
            }
            AuditEvent::OptedIn => {
                audit
                    .add_patient_status(NewPatientStatus {
                        patient_id: patient.patient_id,
                        activity_type: AuditActivity::OptIn,
                        description: Some("Communications re-enabled".to_string()),
                        full_content: None,
                    })
                    .await?;
            }
        }
    }

    Ok(())
}
