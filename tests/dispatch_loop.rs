//! End-to-end tests for the scheduled wish dispatch engine, driven through
//! the store and gateway traits with an in-memory backend.

mod common;

use chrono::{Duration, FixedOffset};

use common::{
    fixed_now, patient, signature, template, wish, FixedClock, MemoryAuditStore,
    MemoryPatientStore, MemoryWishStore, RecordingEmailGateway, ScriptedSmsGateway,
};
use pcms_server::dispatch::{DispatchSummary, Dispatcher};
use pcms_server::models::{AuditActivity, CommStatus, WishStatus};
use pcms_server::store::WishStore;

const CHANNEL_EMAIL: i16 = 0;
const CHANNEL_SMS: i16 = 1;

fn pacific() -> FixedOffset {
    FixedOffset::west_opt(8 * 3600).unwrap()
}

fn dispatcher<'a>(
    patients: &'a MemoryPatientStore,
    wishes: &'a MemoryWishStore,
    audit: &'a MemoryAuditStore,
    sms: &'a ScriptedSmsGateway,
    email: &'a RecordingEmailGateway,
    clock: &'a FixedClock,
) -> Dispatcher<'a> {
    Dispatcher {
        patients,
        wishes,
        audit,
        sms,
        email,
        clock,
        claim_ttl: Duration::minutes(10),
        practice_tz: pacific(),
        summary_recipients: vec!["frontdesk@example.com".to_string()],
    }
}

#[tokio::test]
async fn empty_run_mutates_nothing_and_sends_no_summary() {
    let patients = MemoryPatientStore::default();
    let wishes = MemoryWishStore::default();
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary, DispatchSummary::default());
    assert!(audit.communications.lock().unwrap().is_empty());
    assert!(audit.statuses.lock().unwrap().is_empty());
    assert!(email.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn future_wishes_are_left_alone() {
    let p = patient("Ada", "Lovelace");
    let w = wish(p.patient_id, CHANNEL_SMS, fixed_now() + Duration::hours(2));
    let wish_id = w.wish_id;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(wishes.status_of(wish_id), WishStatus::Pending);
}

#[tokio::test]
async fn due_sms_wish_is_sent_with_plain_text_and_placeholders() {
    let p = patient("Ada", "Lovelace");
    let w = wish(p.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(5));
    let wish_id = w.wish_id;
    let patient_id = p.patient_id;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary, DispatchSummary { sent: 1, failed: 0, total: 1 });
    assert_eq!(wishes.status_of(wish_id), WishStatus::Sent);

    let sent = sms.sent.lock().unwrap();
    let (to, body) = &sent[0];
    assert_eq!(to, "+17603405107");
    // HTML stripped, paragraphs become blank lines, placeholders filled.
    assert_eq!(body, "Dear Ada Lovelace,\n\nHave a great day!");
    drop(sent);

    let statuses = audit.statuses.lock().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].patient_id, patient_id);
    assert_eq!(statuses[0].activity_type, AuditActivity::SmsSent);

    let comms = audit.communications.lock().unwrap();
    assert_eq!(comms.len(), 1);
    assert_eq!(comms[0].status, CommStatus::Sent);
    assert!(comms[0].external_message_id.is_some());
}

#[tokio::test]
async fn due_email_wish_uses_template_subject_and_html_body() {
    let p = patient("Grace", "Hopper");
    let t = template(
        CHANNEL_EMAIL,
        Some("Happy Birthday {first_name}!"),
        "<p>Dear {first_name},</p><p>Best wishes from the practice.</p>",
    );
    let mut w = wish(p.patient_id, CHANNEL_EMAIL, fixed_now() - Duration::minutes(1));
    w.template_id = Some(t.template_id);
    w.custom_subject = None;
    w.custom_body = None;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    wishes.add_template(t);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);

    let sent = email.sent.lock().unwrap();
    // First email is the wish, second is the batch summary.
    assert_eq!(sent.len(), 2);
    let message = &sent[0];
    assert_eq!(message.subject, "Happy Birthday Grace!");
    assert_eq!(message.to, "patient@example.com");
    assert!(message.html_body.contains("Dear Grace,"));
    assert!(message.html_body.contains("margin:0"));

    let digest = &sent[1];
    assert_eq!(digest.to, "frontdesk@example.com");
    assert_eq!(digest.subject, "Scheduled wishes: 1 sent, 0 failed");
    assert!(digest.html_body.contains("Grace Hopper [Email]: Sent"));
}

#[tokio::test]
async fn opted_out_patient_fails_with_recorded_reason() {
    let mut p = patient("Alan", "Turing");
    p.accepts_marketing = false;
    p.unsubscribe_reason = Some("Asked at front desk".to_string());
    let w = wish(p.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(1));
    let wish_id = w.wish_id;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary, DispatchSummary { sent: 0, failed: 1, total: 1 });
    assert_eq!(wishes.status_of(wish_id), WishStatus::Failed);
    assert_eq!(
        wishes.error_of(wish_id).as_deref(),
        Some("Patient opted out. Reason: Asked at front desk")
    );
    assert!(sms.sent.lock().unwrap().is_empty());

    // The failure still lands in the communication log.
    let comms = audit.communications.lock().unwrap();
    assert_eq!(comms.len(), 1);
    assert_eq!(comms[0].status, CommStatus::Failed);
}

#[tokio::test]
async fn failed_template_wish_logs_template_body() {
    let mut p = patient("Alan", "Turing");
    p.accepts_marketing = false;
    p.unsubscribe_reason = Some("Moved away".to_string());

    let t = template(CHANNEL_EMAIL, Some("Hello"), "<p>Template body here</p>");
    let mut w = wish(p.patient_id, CHANNEL_EMAIL, fixed_now() - Duration::minutes(1));
    w.template_id = Some(t.template_id);
    w.custom_body = None;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    wishes.add_template(t);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    let comms = audit.communications.lock().unwrap();
    assert_eq!(comms.len(), 1);
    assert_eq!(comms[0].status, CommStatus::Failed);
    // The operator sees what would have gone out, not an empty body.
    assert_eq!(comms[0].body, "<p>Template body here</p>");
}

#[tokio::test]
async fn sms_wish_without_phone_fails() {
    let mut p = patient("Ada", "Lovelace");
    p.phone = None;
    let w = wish(p.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(1));
    let wish_id = w.wish_id;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        wishes.error_of(wish_id).as_deref(),
        Some("Patient missing phone number for SMS")
    );
}

#[tokio::test]
async fn wish_without_template_or_body_fails() {
    let p = patient("Ada", "Lovelace");
    let mut w = wish(p.patient_id, CHANNEL_EMAIL, fixed_now() - Duration::minutes(1));
    w.custom_body = Some("   ".to_string());
    w.template_id = None;
    let wish_id = w.wish_id;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        wishes.error_of(wish_id).as_deref(),
        Some("Missing template and custom body")
    );
}

#[tokio::test]
async fn unknown_channel_code_fails_the_wish() {
    let p = patient("Ada", "Lovelace");
    let w = wish(p.patient_id, 9, fixed_now() - Duration::minutes(1));
    let wish_id = w.wish_id;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        wishes.error_of(wish_id).as_deref(),
        Some("Unknown channel code: 9")
    );
}

#[tokio::test]
async fn wish_for_deleted_patient_fails() {
    let w = wish(uuid::Uuid::new_v4(), CHANNEL_SMS, fixed_now() - Duration::minutes(1));
    let wish_id = w.wish_id;

    let patients = MemoryPatientStore::default();
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        wishes.error_of(wish_id).as_deref(),
        Some("Patient record missing")
    );
}

#[tokio::test]
async fn gateway_failure_fails_one_wish_and_batch_continues() {
    let mut bad = patient("Ada", "Lovelace");
    bad.phone = Some("7605550001".to_string());
    let good = patient("Grace", "Hopper");

    let w_bad = wish(bad.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(2));
    let w_good = wish(good.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(1));
    let (bad_id, good_id) = (w_bad.wish_id, w_good.wish_id);

    let patients = MemoryPatientStore::with(vec![bad, good]);
    let wishes = MemoryWishStore::with(vec![w_bad, w_good]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway {
        fail_numbers: vec!["+17605550001".to_string()],
        ..Default::default()
    };
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary, DispatchSummary { sent: 1, failed: 1, total: 2 });
    assert_eq!(wishes.status_of(bad_id), WishStatus::Failed);
    assert_eq!(wishes.status_of(good_id), WishStatus::Sent);
    // Raw provider error preserved for the operator.
    assert_eq!(
        wishes.error_of(bad_id).as_deref(),
        Some("carrier rejected message")
    );
}

#[tokio::test]
async fn claimed_wishes_are_not_reclaimed_until_expiry() {
    let p = patient("Ada", "Lovelace");
    let w = wish(p.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(5));
    let wish_id = w.wish_id;

    let wishes = MemoryWishStore::with(vec![w]);

    // A competing run holds the claim.
    let held = wishes
        .claim_due(fixed_now(), fixed_now() + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(held.len(), 1);

    // While the claim is live the wish is invisible to a second claim.
    let second = wishes
        .claim_due(fixed_now(), fixed_now() + Duration::minutes(10))
        .await
        .unwrap();
    assert!(second.is_empty());

    // After the claim expires the wish becomes claimable again.
    let later = fixed_now() + Duration::minutes(11);
    let reclaimed = wishes
        .claim_due(later, later + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].wish_id, wish_id);
}

#[tokio::test]
async fn template_email_carries_default_signature() {
    let p = patient("Grace", "Hopper");
    let sig = signature("<p>Dr. Smith, DDS</p>");
    let mut t = template(CHANNEL_EMAIL, Some("Hello"), "<p>Template body</p>");
    t.signature_id = Some(sig.signature_id);
    let mut w = wish(p.patient_id, CHANNEL_EMAIL, fixed_now() - Duration::minutes(1));
    w.template_id = Some(t.template_id);
    w.custom_subject = None;
    w.custom_body = None;

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    wishes.add_template(t);
    wishes.add_signature(sig);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let summary = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);
    let sent = email.sent.lock().unwrap();
    assert!(sent[0].html_body.contains("Dr. Smith, DDS"));
}

#[tokio::test]
async fn custom_body_email_skips_template_signature() {
    let p = patient("Grace", "Hopper");
    let sig = signature("<p>Dr. Smith, DDS</p>");
    let mut t = template(CHANNEL_EMAIL, Some("Hello"), "<p>Template body</p>");
    t.signature_id = Some(sig.signature_id);
    let mut w = wish(p.patient_id, CHANNEL_EMAIL, fixed_now() - Duration::minutes(1));
    w.template_id = Some(t.template_id);
    // Composed in the editor, signature already baked in.
    w.custom_body = Some("<p>Custom note</p><p>Dr. Jones</p>".to_string());

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    wishes.add_template(t);
    wishes.add_signature(sig);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    let sent = email.sent.lock().unwrap();
    assert!(!sent[0].html_body.contains("Dr. Smith, DDS"));
    assert!(sent[0].html_body.contains("Dr. Jones"));
}

#[tokio::test]
async fn custom_body_overrides_template() {
    let p = patient("Grace", "Hopper");
    let t = template(CHANNEL_EMAIL, Some("From template"), "<p>Template body</p>");
    let mut w = wish(p.patient_id, CHANNEL_EMAIL, fixed_now() - Duration::minutes(1));
    w.template_id = Some(t.template_id);
    w.custom_subject = Some("Custom subject".to_string());
    w.custom_body = Some("<p>Custom body</p>".to_string());

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    wishes.add_template(t);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    dispatcher(&patients, &wishes, &audit, &sms, &email, &clock)
        .run()
        .await
        .unwrap();

    let sent = email.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "Custom subject");
    assert!(sent[0].html_body.contains("Custom body"));
    assert!(!sent[0].html_body.contains("Template body"));
}

#[tokio::test]
async fn summary_digest_is_skipped_without_recipients() {
    let p = patient("Ada", "Lovelace");
    let w = wish(p.patient_id, CHANNEL_SMS, fixed_now() - Duration::minutes(1));

    let patients = MemoryPatientStore::with(vec![p]);
    let wishes = MemoryWishStore::with(vec![w]);
    let audit = MemoryAuditStore::default();
    let sms = ScriptedSmsGateway::default();
    let email = RecordingEmailGateway::default();
    let clock = FixedClock(fixed_now());

    let mut d = dispatcher(&patients, &wishes, &audit, &sms, &email, &clock);
    d.summary_recipients = Vec::new();
    let summary = d.run().await.unwrap();

    assert_eq!(summary.sent, 1);
    assert!(email.sent.lock().unwrap().is_empty());
}
