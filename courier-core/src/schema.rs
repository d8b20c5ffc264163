use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    notifications (id) {
        id -> Text,
        notification_type -> Text,
        priority -> SmallInt,
        status -> Text,
        recipient_id -> Text,
        recipient_name -> Nullable<Text>,
        recipient_email -> Nullable<Text>,
        title -> Text,
        message -> Text,
        detailed_message -> Nullable<Text>,
        related_entity_type -> Nullable<Text>,
        related_entity_id -> Nullable<Text>,
        action_url -> Nullable<Text>,
        action_label -> Nullable<Text>,
        extra -> Nullable<Jsonb>,
        channels -> Jsonb,
        channel_outcomes -> Jsonb,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
        read_at -> Nullable<Timestamptz>,
        scheduled -> Bool,
        scheduled_at -> Nullable<Timestamptz>,
        expires_at -> Nullable<Timestamptz>,
        retry_count -> Integer,
        dispatching_until -> Nullable<Timestamptz>,
        version -> BigInt,
    }
}

table! {
    notification_preferences (user_id) {
        user_id -> Text,
        preferences -> Jsonb,
        updated_at -> Timestamptz,
    }
}

table! {
    notification_settings (id) {
        id -> Integer,
        settings -> Jsonb,
        updated_at -> Timestamptz,
    }
}

table! {
    user_devices (id) {
        id -> Text,
        user_id -> Text,
        token -> Text,
        platform -> Text,
        model -> Nullable<Text>,
        app_version -> Nullable<Text>,
        registered_at -> Timestamptz,
        last_access_at -> Timestamptz,
        active -> Bool,
    }
}

table! {
    users (id) {
        id -> Text,
        name -> Text,
        email -> Nullable<Text>,
    }
}

allow_tables_to_appear_in_same_query!(notifications, users);
