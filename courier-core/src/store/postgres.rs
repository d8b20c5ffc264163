use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DeviceStore, NotificationStore, PreferenceStore, RecipientDirectory, SettingsStore};
use crate::db::DbPool;
use crate::error::{CourierError, Result};
use crate::model::{
    Channel, ChannelOutcome, Device, Notification, NotificationPreferences, NotificationSettings,
    NotificationStatus, Page, Priority, Recipient, RelatedEntity,
};
use crate::schema::{notification_preferences, notification_settings, notifications, user_devices, users};

const SETTINGS_ROW_ID: i32 = 1;

#[derive(Debug, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct NotificationRow {
    id: String,
    notification_type: String,
    priority: i16,
    status: String,
    recipient_id: String,
    recipient_name: Option<String>,
    recipient_email: Option<String>,
    title: String,
    message: String,
    detailed_message: Option<String>,
    related_entity_type: Option<String>,
    related_entity_id: Option<String>,
    action_url: Option<String>,
    action_label: Option<String>,
    extra: Option<serde_json::Value>,
    channels: serde_json::Value,
    channel_outcomes: serde_json::Value,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    scheduled: bool,
    scheduled_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    retry_count: i32,
    dispatching_until: Option<DateTime<Utc>>,
    version: i64,
}

impl NotificationRow {
    fn from_notification(n: &Notification) -> Result<Self> {
        Ok(Self {
            id: n.id.clone(),
            notification_type: n.notification_type.as_str().to_string(),
            priority: n.priority.level(),
            status: n.status.as_str().to_string(),
            recipient_id: n.recipient_id.clone(),
            recipient_name: n.recipient_name.clone(),
            recipient_email: n.recipient_email.clone(),
            title: n.title.clone(),
            message: n.message.clone(),
            detailed_message: n.detailed_message.clone(),
            related_entity_type: n.related_entity.as_ref().map(|e| e.entity_type.clone()),
            related_entity_id: n.related_entity.as_ref().map(|e| e.entity_id.clone()),
            action_url: n.action_url.clone(),
            action_label: n.action_label.clone(),
            extra: n.extra.clone(),
            channels: serde_json::to_value(&n.channels)?,
            channel_outcomes: serde_json::to_value(&n.channel_outcomes)?,
            last_error: n.last_error.clone(),
            created_at: n.created_at,
            sent_at: n.sent_at,
            read_at: n.read_at,
            scheduled: n.scheduled,
            scheduled_at: n.scheduled_at,
            expires_at: n.expires_at,
            retry_count: n.retry_count,
            dispatching_until: n.dispatching_until,
            version: n.version,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = CourierError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        let related_entity = match (row.related_entity_type, row.related_entity_id) {
            (Some(entity_type), Some(entity_id)) => Some(RelatedEntity { entity_type, entity_id }),
            _ => None,
        };
        let channels: Vec<Channel> = serde_json::from_value(row.channels)?;
        let channel_outcomes: BTreeMap<Channel, ChannelOutcome> =
            serde_json::from_value(row.channel_outcomes)?;

        Ok(Notification {
            notification_type: row.notification_type.parse().map_err(CourierError::Storage)?,
            priority: Priority::from_level(row.priority)
                .ok_or_else(|| CourierError::Storage(format!("invalid priority level {}", row.priority)))?,
            status: row.status.parse().map_err(CourierError::Storage)?,
            id: row.id,
            recipient_id: row.recipient_id,
            recipient_name: row.recipient_name,
            recipient_email: row.recipient_email,
            title: row.title,
            message: row.message,
            detailed_message: row.detailed_message,
            related_entity,
            action_url: row.action_url,
            action_label: row.action_label,
            extra: row.extra,
            channels,
            channel_outcomes,
            last_error: row.last_error,
            created_at: row.created_at,
            sent_at: row.sent_at,
            read_at: row.read_at,
            scheduled: row.scheduled,
            scheduled_at: row.scheduled_at,
            expires_at: row.expires_at,
            retry_count: row.retry_count,
            dispatching_until: row.dispatching_until,
            version: row.version,
        })
    }
}

fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>> {
    rows.into_iter().map(Notification::try_from).collect()
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = user_devices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct DeviceRow {
    id: String,
    user_id: String,
    token: String,
    platform: String,
    model: Option<String>,
    app_version: Option<String>,
    registered_at: DateTime<Utc>,
    last_access_at: DateTime<Utc>,
    active: bool,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            platform: row.platform,
            model: row.model,
            app_version: row.app_version,
            registered_at: row.registered_at,
            last_access_at: row.last_access_at,
            active: row.active,
        }
    }
}

impl From<&Device> for DeviceRow {
    fn from(device: &Device) -> Self {
        DeviceRow {
            id: device.id.clone(),
            user_id: device.user_id.clone(),
            token: device.token.clone(),
            platform: device.platform.clone(),
            model: device.model.clone(),
            app_version: device.app_version.clone(),
            registered_at: device.registered_at,
            last_access_at: device.last_access_at,
            active: device.active,
        }
    }
}

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notifications::table)
            .values(NotificationRow::from_notification(notification)?)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        let row = notifications::table
            .find(id)
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Notification::try_from).transpose()
    }

    async fn claim(
        &self,
        id: &str,
        expected_version: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::version.eq(expected_version))
                .filter(
                    notifications::dispatching_until
                        .is_null()
                        .or(notifications::dispatching_until.le(now)),
                ),
        )
        .set((
            notifications::version.eq(expected_version + 1),
            notifications::dispatching_until.eq(Some(lease_until)),
        ))
        .returning(NotificationRow::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;
        row.map(Notification::try_from).transpose()
    }

    async fn save(&self, notification: &Notification) -> Result<bool> {
        let mut row = NotificationRow::from_notification(notification)?;
        row.version = notification.version + 1;

        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(&notification.id))
                .filter(notifications::version.eq(notification.version)),
        )
        .set(&row)
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn list_for_recipient(&self, recipient_id: &str, page: u32, size: u32) -> Result<Page<Notification>> {
        let mut conn = self.pool.get().await?;
        let total: i64 = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .count()
            .get_result(&mut conn)
            .await?;
        let rows = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .order(notifications::created_at.desc())
            .offset(i64::from(page) * i64::from(size))
            .limit(i64::from(size))
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;

        Ok(Page {
            items: into_notifications(rows)?,
            page,
            size,
            total: total as u64,
        })
    }

    async fn list_by_status(&self, recipient_id: &str, status: NotificationStatus) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::status.eq(status.as_str()))
            .order(notifications::created_at.desc())
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn count_by_status(&self, recipient_id: &str, status: NotificationStatus) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let count: i64 = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::status.eq(status.as_str()))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as u64)
    }

    async fn mark_all_read(&self, recipient_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::recipient_id.eq(recipient_id))
                .filter(notifications::status.eq(NotificationStatus::Sent.as_str())),
        )
        .set((
            notifications::status.eq(NotificationStatus::Read.as_str()),
            notifications::read_at.eq(Some(now)),
            notifications::version.eq(notifications::version + 1),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated as u64)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows = notifications::table
            .filter(notifications::status.eq(NotificationStatus::Pending.as_str()))
            .filter(notifications::scheduled.eq(true))
            .filter(notifications::scheduled_at.le(now))
            .order((notifications::priority.desc(), notifications::created_at.asc()))
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn stalled_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows = notifications::table
            .filter(notifications::status.eq(NotificationStatus::Pending.as_str()))
            .filter(notifications::scheduled.eq(false))
            .filter(notifications::channels.ne(serde_json::json!([])))
            .filter(notifications::created_at.lt(cutoff))
            .order(notifications::created_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn retryable_errors(&self, max_attempts: i32, limit: i64) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get().await?;
        let rows = notifications::table
            .filter(notifications::status.eq(NotificationStatus::Error.as_str()))
            .filter(notifications::retry_count.lt(max_attempts))
            .order(notifications::created_at.asc())
            .limit(limit)
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        into_notifications(rows)
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(
            notifications::table
                .filter(notifications::status.eq(NotificationStatus::Read.as_str()))
                .filter(notifications::created_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        let mut conn = self.pool.get().await?;
        let doc: Option<serde_json::Value> = notification_preferences::table
            .find(user_id)
            .select(notification_preferences::preferences)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(doc.map(serde_json::from_value).transpose()?)
    }

    async fn upsert_preferences(&self, preferences: &NotificationPreferences) -> Result<()> {
        let doc = serde_json::to_value(preferences)?;
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notification_preferences::table)
            .values((
                notification_preferences::user_id.eq(&preferences.user_id),
                notification_preferences::preferences.eq(&doc),
                notification_preferences::updated_at.eq(preferences.updated_at),
            ))
            .on_conflict(notification_preferences::user_id)
            .do_update()
            .set((
                notification_preferences::preferences.eq(excluded(notification_preferences::preferences)),
                notification_preferences::updated_at.eq(excluded(notification_preferences::updated_at)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_preferences(&self, user_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(notification_preferences::table.find(user_id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn load_settings(&self) -> Result<Option<NotificationSettings>> {
        let mut conn = self.pool.get().await?;
        let doc: Option<serde_json::Value> = notification_settings::table
            .find(SETTINGS_ROW_ID)
            .select(notification_settings::settings)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(doc.map(serde_json::from_value).transpose()?)
    }

    async fn save_settings(&self, settings: &NotificationSettings) -> Result<()> {
        let doc = serde_json::to_value(settings)?;
        let mut conn = self.pool.get().await?;
        diesel::insert_into(notification_settings::table)
            .values((
                notification_settings::id.eq(SETTINGS_ROW_ID),
                notification_settings::settings.eq(&doc),
                notification_settings::updated_at.eq(Utc::now()),
            ))
            .on_conflict(notification_settings::id)
            .do_update()
            .set((
                notification_settings::settings.eq(excluded(notification_settings::settings)),
                notification_settings::updated_at.eq(excluded(notification_settings::updated_at)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<Device>> {
        let mut conn = self.pool.get().await?;
        let row = user_devices::table
            .filter(user_devices::token.eq(token))
            .select(DeviceRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Device::from))
    }

    async fn upsert_device(&self, device: &Device) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(user_devices::table)
            .values(DeviceRow::from(device))
            .on_conflict(user_devices::token)
            .do_update()
            .set((
                user_devices::user_id.eq(excluded(user_devices::user_id)),
                user_devices::platform.eq(excluded(user_devices::platform)),
                user_devices::model.eq(excluded(user_devices::model)),
                user_devices::app_version.eq(excluded(user_devices::app_version)),
                user_devices::last_access_at.eq(excluded(user_devices::last_access_at)),
                user_devices::active.eq(excluded(user_devices::active)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str, active_only: bool) -> Result<Vec<Device>> {
        let mut conn = self.pool.get().await?;
        let mut query = user_devices::table
            .filter(user_devices::user_id.eq(user_id))
            .order(user_devices::last_access_at.desc())
            .select(DeviceRow::as_select())
            .into_boxed();
        if active_only {
            query = query.filter(user_devices::active.eq(true));
        }
        let rows = query.load(&mut conn).await?;
        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn set_active(&self, token: &str, active: bool) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(user_devices::table.filter(user_devices::token.eq(token)))
            .set(user_devices::active.eq(active))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }
}

#[async_trait]
impl RecipientDirectory for PgStore {
    async fn find_recipient(&self, user_id: &str) -> Result<Option<Recipient>> {
        let mut conn = self.pool.get().await?;
        let row: Option<(String, String, Option<String>)> = users::table
            .find(user_id)
            .select((users::id, users::name, users::email))
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(|(id, name, email)| Recipient { id, name, email }))
    }
}
