use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use tocsin_common::types::{
    ContactData, NotificationEvent, PlottingData, ScheduleData, ScheduledNotification, State,
    SubscriptionData, Trigger, TriggerData, TriggerType,
};
use tocsin_storage::memory::MemoryDatabase;
use tocsin_storage::Database;

use crate::config::NotifierConfig;
use crate::planner::Planner;
use crate::plugin::SenderRegistry;
use crate::scheduler::{DeliveryOutcome, Scheduler};
use crate::worker::NotifierWorkers;
use crate::Sender;

struct RecordingSender {
    sent: Mutex<Vec<ScheduledNotification>>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<ScheduledNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, notification: &ScheduledNotification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn sender_type(&self) -> &str {
        "webhook"
    }
}

struct FailingSender {
    attempts: AtomicI32,
}

impl FailingSender {
    fn new() -> Arc<Self> {
        Arc::new(FailingSender {
            attempts: AtomicI32::new(0),
        })
    }

    fn attempts(&self) -> i32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for FailingSender {
    async fn send(&self, _notification: &ScheduledNotification) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("gateway unreachable")
    }

    fn sender_type(&self) -> &str {
        "webhook"
    }
}

fn make_trigger(id: &str) -> Trigger {
    Trigger {
        id: id.to_string(),
        name: format!("trigger {id}"),
        desc: None,
        targets: vec!["m1".into()],
        warn_value: Some(10.0),
        error_value: Some(20.0),
        trigger_type: TriggerType::Rising,
        tags: vec!["cpu".into(), "prod".into()],
        ttl_state: None,
        ttl: 0,
        schedule: None,
        expression: None,
        python_expression: None,
        patterns: vec!["m1".into()],
        mute_new_metrics: false,
    }
}

fn make_subscription(id: &str, contacts: &[&str]) -> SubscriptionData {
    SubscriptionData {
        contacts: contacts.iter().map(|c| c.to_string()).collect(),
        tags: vec!["cpu".into()],
        schedule: None,
        plotting: PlottingData::default(),
        id: id.to_string(),
        enabled: true,
        ignore_warnings: false,
        ignore_recoverings: false,
        throttling_enabled: true,
        user: "user".into(),
    }
}

fn make_contact(id: &str) -> ContactData {
    ContactData {
        contact_type: "webhook".into(),
        value: format!("https://hooks.example.com/{id}"),
        id: id.to_string(),
        user: "user".into(),
    }
}

fn make_event(old_state: State, state: State, ts: i64) -> NotificationEvent {
    NotificationEvent {
        is_trigger_event: false,
        timestamp: ts,
        metric: "m1".into(),
        value: Some(25.0),
        state,
        trigger_id: "t1".into(),
        subscription_id: None,
        contact_id: String::new(),
        old_state,
        message: None,
    }
}

fn make_notification(due: i64) -> ScheduledNotification {
    ScheduledNotification {
        event: make_event(State::Ok, State::Error, due),
        trigger: TriggerData::default(),
        contact: make_contact("c1"),
        plotting: PlottingData::default(),
        throttled: false,
        send_fail: 0,
        timestamp: due,
    }
}

struct Fixture {
    db: Arc<MemoryDatabase>,
    scheduler: Arc<Scheduler>,
    planner: Planner,
    sender: Arc<RecordingSender>,
}

fn setup() -> Fixture {
    let db = Arc::new(MemoryDatabase::new());
    db.save_trigger(&make_trigger("t1")).unwrap();
    db.save_contact(&make_contact("c1")).unwrap();
    db.save_subscription(&make_subscription("s1", &["c1"])).unwrap();

    let sender = RecordingSender::new();
    let mut registry = SenderRegistry::new();
    registry.register(sender.clone());

    let config = NotifierConfig::default();
    let scheduler = Arc::new(Scheduler::new(db.clone(), registry, config.clone()));
    let planner = Planner::new(db.clone(), scheduler.clone(), &config);
    Fixture {
        db,
        scheduler,
        planner,
        sender,
    }
}

// ── planner ──

#[test]
fn planner_schedules_one_notification_per_contact() {
    let fixture = setup();
    fixture.db.save_contact(&make_contact("c2")).unwrap();
    fixture
        .db
        .save_subscription(&make_subscription("s1", &["c1", "c2"]))
        .unwrap();

    let event = make_event(State::Ok, State::Error, 100);
    assert_eq!(fixture.planner.plan(&event, 100).unwrap(), 2);

    let due = fixture.scheduler.pop_due(100).unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].event.subscription_id.as_deref(), Some("s1"));
    assert_eq!(due[0].event.contact_id, due[0].contact.id);
    assert_eq!(due[0].timestamp, 100, "no throttle means due at event time");
    assert_eq!(due[0].trigger.id, "t1");
}

#[test]
fn planner_applies_ignore_warnings_policy() {
    let fixture = setup();
    let mut sub = make_subscription("s1", &["c1"]);
    sub.ignore_warnings = true;
    fixture.db.save_subscription(&sub).unwrap();

    let warning = make_event(State::Ok, State::Warn, 100);
    assert_eq!(fixture.planner.plan(&warning, 100).unwrap(), 0);

    let escalation = make_event(State::Warn, State::Error, 100);
    assert_eq!(fixture.planner.plan(&escalation, 100).unwrap(), 1);
}

#[test]
fn planner_respects_schedule_windows() {
    let fixture = setup();
    let mut sub = make_subscription("s1", &["c1"]);
    // An empty window denies everything.
    sub.schedule = Some(ScheduleData {
        start_offset: 600,
        end_offset: 600,
        ..ScheduleData::always(["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"])
    });
    fixture.db.save_subscription(&sub).unwrap();

    let event = make_event(State::Ok, State::Error, 100);
    assert_eq!(fixture.planner.plan(&event, 100).unwrap(), 0);
}

#[test]
fn planner_skips_disabled_subscriptions_and_unknown_triggers() {
    let fixture = setup();
    let mut sub = make_subscription("s1", &["c1"]);
    sub.enabled = false;
    fixture.db.save_subscription(&sub).unwrap();

    let event = make_event(State::Ok, State::Error, 100);
    assert_eq!(fixture.planner.plan(&event, 100).unwrap(), 0);

    let mut orphan = make_event(State::Ok, State::Error, 100);
    orphan.trigger_id = "deleted".into();
    assert_eq!(fixture.planner.plan(&orphan, 100).unwrap(), 0);
}

#[test]
fn planner_skips_missing_contacts_but_keeps_the_rest() {
    let fixture = setup();
    fixture
        .db
        .save_subscription(&make_subscription("s1", &["ghost", "c1"]))
        .unwrap();

    let event = make_event(State::Ok, State::Error, 100);
    assert_eq!(fixture.planner.plan(&event, 100).unwrap(), 1);
    let due = fixture.scheduler.pop_due(100).unwrap();
    assert_eq!(due[0].contact.id, "c1");
}

#[test]
fn planner_ignores_test_events() {
    let fixture = setup();
    let event = make_event(State::Ok, State::Test, 100);
    assert_eq!(fixture.planner.plan(&event, 100).unwrap(), 0);
}

#[test]
fn planner_throttles_chatty_pairs() {
    let fixture = setup();
    let now = 100_000;

    // 11 sends in the last 3 hours: the 30-minute rule applies.
    for i in 0..11 {
        fixture
            .db
            .register_throttle_event("c1", "t1", now - 600 - i)
            .unwrap();
    }

    let event = make_event(State::Ok, State::Error, now);
    assert_eq!(fixture.planner.plan(&event, now).unwrap(), 1);
    let due = fixture.scheduler.pop_due(now + 3600).unwrap();
    assert!(due[0].throttled);
    assert_eq!(due[0].timestamp, now + 1800);
}

#[test]
fn planner_escalates_to_the_largest_exceeded_delay() {
    let fixture = setup();
    let now = 100_000;

    // 21 sends within the last hour exceeds both rules; the 1-hour
    // delay wins.
    for i in 0..21 {
        fixture
            .db
            .register_throttle_event("c1", "t1", now - 60 - i)
            .unwrap();
    }

    let event = make_event(State::Ok, State::Error, now);
    fixture.planner.plan(&event, now).unwrap();
    let due = fixture.scheduler.pop_due(now + 7200).unwrap();
    assert_eq!(due[0].timestamp, now + 3600);
}

#[test]
fn subscription_without_throttling_is_never_delayed() {
    let fixture = setup();
    let mut sub = make_subscription("s1", &["c1"]);
    sub.throttling_enabled = false;
    fixture.db.save_subscription(&sub).unwrap();

    let now = 100_000;
    for i in 0..30 {
        fixture
            .db
            .register_throttle_event("c1", "t1", now - 60 - i)
            .unwrap();
    }

    let event = make_event(State::Ok, State::Error, now);
    fixture.planner.plan(&event, now).unwrap();
    let due = fixture.scheduler.pop_due(now).unwrap();
    assert!(!due[0].throttled);
    assert_eq!(due[0].timestamp, now);
}

// ── scheduler ──

#[test]
fn duplicate_enqueue_is_dropped() {
    let fixture = setup();
    let notification = make_notification(100);

    assert!(fixture.scheduler.enqueue(&notification, 100).unwrap());
    assert!(!fixture.scheduler.enqueue(&notification, 100).unwrap());

    let due = fixture.scheduler.pop_due(100).unwrap();
    assert_eq!(due.len(), 1, "exactly one pending notification");
}

#[test]
fn planner_plus_scheduler_deduplicate_replayed_events() {
    let fixture = setup();
    let event = make_event(State::Ok, State::Error, 100);

    // The same event delivered twice (at-least-once upstream) plans one
    // notification.
    assert_eq!(fixture.planner.plan(&event, 100).unwrap(), 1);
    assert_eq!(fixture.planner.plan(&event, 101).unwrap(), 0);
    assert_eq!(fixture.scheduler.pop_due(200).unwrap().len(), 1);
}

#[tokio::test]
async fn delivery_success_clears_the_dedup_key() {
    let fixture = setup();
    let notification = make_notification(100);
    fixture.scheduler.enqueue(&notification, 100).unwrap();

    let due = fixture.scheduler.pop_due(100).unwrap();
    let outcome = fixture
        .scheduler
        .deliver(due.into_iter().next().unwrap(), 100)
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(fixture.sender.sent().len(), 1);

    // Once delivered, the same notification may be scheduled again.
    assert!(fixture.scheduler.enqueue(&notification, 100).unwrap());
}

#[tokio::test]
async fn delivery_failure_requeues_with_backoff() {
    let db = Arc::new(MemoryDatabase::new());
    let failing = FailingSender::new();
    let mut registry = SenderRegistry::new();
    registry.register(failing.clone());
    let scheduler = Scheduler::new(db.clone(), registry, NotifierConfig::default());

    let notification = make_notification(100);
    scheduler.enqueue(&notification, 100).unwrap();

    let due = scheduler.pop_due(100).unwrap();
    let outcome = scheduler
        .deliver(due.into_iter().next().unwrap(), 100)
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Requeued);

    let retried = scheduler.pop_due(100 + 60).unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].send_fail, 1);
    assert_eq!(retried[0].timestamp, 100 + 60, "30s * 2^1");
}

#[tokio::test]
async fn delivery_drops_after_retry_cap() {
    let db = Arc::new(MemoryDatabase::new());
    let failing = FailingSender::new();
    let mut registry = SenderRegistry::new();
    registry.register(failing.clone());
    let scheduler = Scheduler::new(db.clone(), registry, NotifierConfig::default());

    scheduler.enqueue(&make_notification(0), 0).unwrap();

    let mut now = 0;
    let mut last_outcome = DeliveryOutcome::Requeued;
    loop {
        now += 10_000;
        let due = scheduler.pop_due(now).unwrap();
        if due.is_empty() {
            break;
        }
        for notification in due {
            last_outcome = scheduler.deliver(notification, now).await.unwrap();
        }
    }

    assert_eq!(last_outcome, DeliveryOutcome::Dropped);
    // One initial attempt plus max_send_retries retries.
    assert_eq!(failing.attempts(), 4);
}

#[tokio::test]
async fn unknown_contact_type_is_a_fatal_delivery_error() {
    let fixture = setup();
    let mut notification = make_notification(100);
    notification.contact.contact_type = "carrier-pigeon".into();

    fixture.scheduler.enqueue(&notification, 100).unwrap();
    let due = fixture.scheduler.pop_due(100).unwrap();
    let outcome = fixture
        .scheduler
        .deliver(due.into_iter().next().unwrap(), 100)
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Dropped);
    assert!(fixture.sender.sent().is_empty());
    assert!(fixture.scheduler.pop_due(10_000).unwrap().is_empty());
}

#[test]
fn config_defaults_include_throttle_rules() {
    let config: NotifierConfig = toml::from_str("workers = 8").unwrap();
    assert_eq!(config.workers, 8);
    assert_eq!(config.max_send_retries, 3);
    assert_eq!(config.dedup_ttl_secs, 3600);
    assert_eq!(config.throttling.len(), 2);
    assert_eq!(config.throttling[0].max_count, 10);
    assert_eq!(config.throttling[0].delay_secs, 1800);
}

#[test]
fn backoff_doubles_and_caps() {
    let config = NotifierConfig::default();
    assert_eq!(config.backoff(1), 60);
    assert_eq!(config.backoff(2), 120);
    assert_eq!(config.backoff(3), 240);
    assert_eq!(config.backoff(10), 1800, "capped at 30 minutes");
}

// ── workers ──

#[tokio::test]
async fn workers_plan_and_deliver_end_to_end() {
    let db = Arc::new(MemoryDatabase::new());
    db.save_trigger(&make_trigger("t1")).unwrap();
    db.save_contact(&make_contact("c1")).unwrap();
    db.save_subscription(&make_subscription("s1", &["c1"])).unwrap();

    let sender = RecordingSender::new();
    let mut registry = SenderRegistry::new();
    registry.register(sender.clone());

    let config = NotifierConfig::default();
    let scheduler = Arc::new(Scheduler::new(db.clone(), registry, config.clone()));
    let planner = Arc::new(Planner::new(db.clone(), scheduler.clone(), &config));

    let now = chrono::Utc::now().timestamp();
    db.push_event(&make_event(State::Ok, State::Error, now - 5))
        .unwrap();

    let (workers, shutdown) = NotifierWorkers::new(planner, scheduler, db.clone());
    let handle = tokio::spawn(workers.run());

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap();

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.state, State::Error);
    assert_eq!(sent[0].contact.id, "c1");
}
