use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use courier_core::config::SchedulerConfig;
use courier_core::model::{
    Channel, ChannelOutcome, Device, NotificationRequest, NotificationSettings, NotificationStatus,
    NotificationType, Priority, Recipient, SmtpSettings,
};
use courier_core::store::{MemoryStore, NotificationStore};
use courier_core::{CourierError, MemoryRateLimiter, SettingsHandle};
use courier_delivery::channels::{
    ChannelError, EmailSender, MailTransport, OutgoingEmail, PushError, PushPayload, PushProvider,
    PushSender, SystemSender,
};
use courier_delivery::{DeliveryJobs, DeviceRegistry, Dispatcher, InlineJobs};
use courier_notify::NotificationService;
use courier_scheduler::Scheduler;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl MailTransport for Outbox {
    async fn deliver(&self, _smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Gateway {
    rejected_tokens: Vec<String>,
    pushed: Mutex<Vec<String>>,
}

#[async_trait]
impl PushProvider for Gateway {
    async fn push(&self, device: &Device, _payload: &PushPayload, _key: &str) -> Result<(), PushError> {
        if self.rejected_tokens.contains(&device.token) {
            return Err(PushError::InvalidToken);
        }
        self.pushed.lock().unwrap().push(device.token.clone());
        Ok(())
    }
}

struct UnreachableBroker;

#[async_trait]
impl DeliveryJobs for UnreachableBroker {
    async fn enqueue(&self, _notification_id: &str) -> courier_core::Result<()> {
        Err(CourierError::Broker("broker unreachable".into()))
    }
}

struct Harness {
    service: NotificationService,
    store: Arc<MemoryStore>,
    settings: SettingsHandle,
    dispatcher: Arc<Dispatcher>,
    outbox: Arc<Outbox>,
    gateway: Arc<Gateway>,
}

fn wednesday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn settings() -> NotificationSettings {
    NotificationSettings {
        sender_email: Some("noreply@courier.test".into()),
        sender_name: Some("Courier".into()),
        smtp: SmtpSettings {
            host: Some("smtp.courier.test".into()),
            ..SmtpSettings::default()
        },
        push_provider_key: Some("server-key".into()),
        ..NotificationSettings::default()
    }
}

fn harness(rejected_tokens: Vec<String>, at: NaiveDateTime) -> Harness {
    harness_with(rejected_tokens, at, |dispatcher| Arc::new(InlineJobs::new(dispatcher)))
}

fn harness_with(
    rejected_tokens: Vec<String>,
    at: NaiveDateTime,
    jobs: impl FnOnce(Arc<Dispatcher>) -> Arc<dyn DeliveryJobs>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.add_recipient(Recipient {
        id: "u-1".into(),
        name: "Ana Souza".into(),
        email: Some("ana@courier.test".into()),
    });

    let settings = SettingsHandle::new(Some(settings()));
    let devices = DeviceRegistry::new(store.clone());
    let outbox = Arc::new(Outbox::default());
    let gateway = Arc::new(Gateway {
        rejected_tokens,
        ..Gateway::default()
    });

    let dispatcher = Arc::new(
        Dispatcher::new(
            store.clone(),
            settings.clone(),
            Arc::new(MemoryRateLimiter::new()),
            Duration::from_secs(5),
        )
        .with_sender(Arc::new(EmailSender::new(settings.clone(), outbox.clone())))
        .with_sender(Arc::new(PushSender::new(settings.clone(), devices.clone(), gateway.clone())))
        .with_sender(Arc::new(SystemSender::new(settings.clone()))),
    );

    let service = NotificationService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        devices,
        jobs(dispatcher.clone()),
    )
    .with_clock(Arc::new(move || at));

    Harness {
        service,
        store,
        settings,
        dispatcher,
        outbox,
        gateway,
    }
}

fn email_and_push(priority: Priority) -> NotificationRequest {
    let mut req = NotificationRequest::new(
        NotificationType::OpinionRequested,
        priority,
        "u-1",
        "Opinion requested",
        "Bill 42/2024 needs a technical opinion",
    );
    req.action_url = Some("https://courier.test/bills/42".into());
    req.channels = Some(vec![Channel::Email, Channel::Push]);
    req
}

async fn enable_push(h: &Harness) {
    let mut prefs = h.service.get_preferences("u-1").await.unwrap();
    prefs.enabled_channels.push(Channel::Push);
    h.service.update_preferences("u-1", prefs).await.unwrap();
}

#[tokio::test]
async fn create_dispatch_and_read() {
    let h = harness(vec![], wednesday(10, 0));
    enable_push(&h).await;
    h.service
        .register_device("u-1", "tok-1", "android", Some("Pixel 8"), Some("2.1.0"))
        .await
        .unwrap();

    let summary = h
        .service
        .create_notification(email_and_push(Priority::High))
        .await
        .unwrap()
        .expect("eligible");

    let sent = h.store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(sent.status, NotificationStatus::Sent);
    assert!(sent.channel_outcomes.values().all(ChannelOutcome::is_delivered));

    let mails = h.outbox.sent.lock().unwrap().clone();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, "ana@courier.test");
    assert_eq!(mails[0].subject, "Opinion requested");
    assert!(mails[0].html.contains("Ana Souza"));
    assert_eq!(*h.gateway.pushed.lock().unwrap(), vec!["tok-1".to_string()]);

    assert_eq!(h.service.count_unread("u-1").await.unwrap(), 1);
    assert_eq!(h.service.list_unread("u-1").await.unwrap()[0].id, summary.id);

    let read = h.service.mark_as_read(&summary.id, "u-1").await.unwrap();
    assert!(read.read);
    let again = h.service.mark_as_read(&summary.id, "u-1").await.unwrap();
    assert_eq!(again.status, NotificationStatus::Read);
    assert_eq!(h.service.count_unread("u-1").await.unwrap(), 0);
}

#[tokio::test]
async fn push_without_devices_still_sends_email() {
    let h = harness(vec![], wednesday(10, 0));
    enable_push(&h).await;

    let summary = h
        .service
        .create_notification(email_and_push(Priority::Normal))
        .await
        .unwrap()
        .unwrap();

    let n = h.store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(n.status, NotificationStatus::Sent);
    assert!(n.channel_outcomes[&Channel::Email].is_delivered());
    match &n.channel_outcomes[&Channel::Push] {
        ChannelOutcome::Failed { reason, .. } => assert!(reason.contains("no active devices")),
        other => panic!("push should have failed, got {:?}", other),
    }
}

#[tokio::test]
async fn rejected_token_is_deactivated() {
    let h = harness(vec!["stale".into()], wednesday(10, 0));
    enable_push(&h).await;
    h.service.register_device("u-1", "stale", "ios", None, None).await.unwrap();
    h.service.register_device("u-1", "fresh", "android", None, None).await.unwrap();

    h.service
        .create_notification(email_and_push(Priority::Normal))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.service.list_active_tokens("u-1").await.unwrap(), vec!["fresh".to_string()]);
    assert_eq!(h.service.list_user_devices("u-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn quiet_hours_suppress_without_a_record() {
    let h = harness(vec![], wednesday(23, 30));
    let mut prefs = h.service.get_preferences("u-1").await.unwrap();
    prefs.do_not_disturb = true;
    prefs.do_not_disturb_window = Some(courier_core::model::TimeWindow::new(
        chrono::NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
    ));
    h.service.update_preferences("u-1", prefs).await.unwrap();

    let result = h
        .service
        .create_notification(email_and_push(Priority::Urgent))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(h.service.list_for_user("u-1", 0, 20).await.unwrap().total, 0);
    assert!(h.outbox.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reregistering_a_token_keeps_one_device() {
    let h = harness(vec![], wednesday(10, 0));
    h.service.register_device("u-1", "T1", "android", None, None).await.unwrap();
    h.service.register_device("u-1", "T1", "IOS", None, None).await.unwrap();

    let devices = h.service.list_user_devices("u-1").await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].platform, "ios");
    assert!(devices[0].active);

    assert!(matches!(
        h.service.deactivate_device("u-2", "T1").await,
        Err(CourierError::Authorization(_))
    ));
    h.service.deactivate_device("u-1", "T1").await.unwrap();
    assert!(h.service.list_active_tokens("u-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn mark_all_as_read_only_touches_delivered() {
    let h = harness(vec![], wednesday(10, 0));
    for _ in 0..3 {
        let mut req = email_and_push(Priority::Normal);
        req.channels = Some(vec![Channel::System]);
        h.service.create_notification(req).await.unwrap().unwrap();
    }
    let mut later = email_and_push(Priority::Normal);
    later.channels = Some(vec![Channel::System]);
    later.scheduled_at = Some(chrono::Utc::now() + chrono::Duration::hours(3));
    h.service.create_notification(later).await.unwrap().unwrap();

    assert_eq!(h.service.mark_all_as_read("u-1").await.unwrap(), 3);
    let page = h.service.list_for_user("u-1", 0, 2).await.unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 2);
}

#[tokio::test]
async fn failed_enqueue_is_recovered_by_the_scheduler() {
    let h = harness_with(vec![], wednesday(10, 0), |_| Arc::new(UnreachableBroker));
    let mut req = email_and_push(Priority::Normal);
    req.channels = Some(vec![Channel::Email]);

    let summary = h.service.create_notification(req).await.unwrap().unwrap();
    let stranded = h.store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(stranded.status, NotificationStatus::Pending);
    assert!(h.outbox.sent.lock().unwrap().is_empty());

    let scheduler = Scheduler::new(
        h.store.clone(),
        h.store.clone(),
        h.settings.clone(),
        h.dispatcher.clone(),
        SchedulerConfig {
            promote_interval_secs: 60,
            stalled_after_secs: 300,
            reprocess_interval_secs: 300,
            retention_interval_secs: 86_400,
            retention_days: 90,
            settings_reload_secs: 60,
        },
    );
    assert_eq!(scheduler.recover_stalled(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + chrono::Duration::minutes(10);
    assert_eq!(scheduler.recover_stalled(later).await.unwrap(), 1);

    let delivered = h.store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(delivered.status, NotificationStatus::Sent);
    assert_eq!(h.outbox.sent.lock().unwrap().len(), 1);
}
