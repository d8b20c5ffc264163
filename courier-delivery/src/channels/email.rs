use async_trait::async_trait;
use courier_core::model::{Channel, Notification, NotificationSettings, Priority, SmtpSettings};
use courier_core::SettingsHandle;
use std::sync::Arc;

use super::{ChannelError, ChannelSender};

/// A rendered message ready for a mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Moves a rendered email to the recipient's mailbox.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), ChannelError>;
}

pub struct EmailSender {
    settings: SettingsHandle,
    transport: Arc<dyn MailTransport>,
}

impl EmailSender {
    pub fn new(settings: SettingsHandle, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            settings,
            transport,
        }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let settings = self
            .settings
            .current()
            .ok_or(ChannelError::ConfigurationMissing(Channel::Email))?;
        if !settings.email_enabled {
            return Err(ChannelError::ChannelDisabled(Channel::Email));
        }
        if !settings.email_ready() {
            return Err(ChannelError::ConfigurationMissing(Channel::Email));
        }

        let to = notification
            .recipient_email
            .as_deref()
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| ChannelError::Transport("recipient has no email address".into()))?;

        let email = OutgoingEmail {
            from: settings.sender_email.clone().unwrap_or_default(),
            from_name: settings.sender_name.clone(),
            to: to.to_string(),
            subject: notification.title.clone(),
            html: render_email_body(notification, &settings),
            text: notification.message.clone(),
        };

        self.transport.deliver(&settings.smtp, &email).await?;
        tracing::info!(notification_id = %notification.id, to = %email.to, "Notification email sent");
        Ok(())
    }
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn badge_color(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "#6c757d",
        Priority::Normal => "#0d6efd",
        Priority::High => "#fd7e14",
        Priority::Urgent => "#dc3545",
    }
}

/// Renders the HTML body, preferring a per-type template from settings.
/// Every interpolated value is HTML-escaped.
pub fn render_email_body(notification: &Notification, settings: &NotificationSettings) -> String {
    let recipient_name = notification.recipient_name.as_deref().unwrap_or("");
    let action_label = notification.action_label.as_deref().unwrap_or("Open");

    if let Some(template) = settings.email_templates.get(&notification.notification_type) {
        let placeholders = [
            ("{{title}}", notification.title.as_str()),
            ("{{message}}", notification.message.as_str()),
            ("{{detailed_message}}", notification.detailed_message.as_deref().unwrap_or("")),
            ("{{recipient_name}}", recipient_name),
            ("{{action_url}}", notification.action_url.as_deref().unwrap_or("")),
            ("{{action_label}}", action_label),
            ("{{priority}}", notification.priority.as_str()),
        ];
        return placeholders
            .iter()
            .fold(template.clone(), |body, (key, value)| body.replace(key, &html_escape(value)));
    }

    let greeting = if recipient_name.is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello, {},", html_escape(recipient_name))
    };

    let detailed = notification
        .detailed_message
        .as_deref()
        .map(|detail| {
            format!(
                r#"<div style="background-color: #ffffff; border-left: 4px solid #dee2e6; padding: 12px; margin-top: 16px; color: #495057;">{}</div>"#,
                html_escape(detail)
            )
        })
        .unwrap_or_default();

    let action = notification
        .action_url
        .as_deref()
        .map(|url| {
            format!(
                r#"<p style="margin-top: 24px;"><a href="{}" style="background-color: #0d6efd; color: #ffffff; padding: 10px 18px; border-radius: 6px; text-decoration: none;">{}</a></p>"#,
                html_escape(url),
                html_escape(action_label)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background-color: #f8f9fa; border-radius: 8px; padding: 24px; margin-bottom: 20px;">
        <span style="display: inline-block; background-color: {badge}; color: #ffffff; font-size: 12px; font-weight: bold; padding: 2px 8px; border-radius: 4px;">{priority}</span>
        <h1 style="margin: 12px 0 16px 0; font-size: 24px; color: #212529;">{title}</h1>
        <p style="margin: 0 0 12px 0;">{greeting}</p>
        <p style="margin: 0; font-size: 16px; color: #495057;">{message}</p>
        {detailed}
        {action}
    </div>
    <p style="font-size: 14px; color: #6c757d; margin-top: 20px;">
        This is an automated notification. Please do not reply.
    </p>
</body>
</html>"#,
        badge = badge_color(notification.priority),
        priority = notification.priority.as_str(),
        title = html_escape(&notification.title),
        greeting = greeting,
        message = html_escape(&notification.message),
        detailed = detailed,
        action = action,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::model::{NotificationRequest, NotificationType, Recipient};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, _smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn ready_settings() -> NotificationSettings {
        let mut settings = NotificationSettings {
            sender_email: Some("noreply@example.org".into()),
            ..NotificationSettings::default()
        };
        settings.smtp.host = Some("smtp.example.org".into());
        settings
    }

    fn notification(email: Option<&str>) -> Notification {
        let mut request = NotificationRequest::new(
            NotificationType::OpinionRequested,
            Priority::Urgent,
            "u-1",
            "Opinion <needed>",
            "Review bill 42 & reply",
        );
        request.action_url = Some("https://app.example.org/opinions/7".into());
        let recipient = Recipient {
            id: "u-1".into(),
            name: "Ana".into(),
            email: email.map(str::to_string),
        };
        Notification::from_request(request, &recipient, vec![Channel::Email], Utc::now())
    }

    #[test]
    fn default_body_escapes_and_includes_action() {
        let body = render_email_body(&notification(None), &ready_settings());
        assert!(body.contains("Opinion &lt;needed&gt;"));
        assert!(body.contains("Review bill 42 &amp; reply"));
        assert!(body.contains("Hello, Ana,"));
        assert!(body.contains(">Open</a>"));
        assert!(body.contains("URGENT"));
    }

    #[test]
    fn type_template_overrides_body() {
        let mut settings = ready_settings();
        settings.email_templates.insert(
            NotificationType::OpinionRequested,
            "<p>{{recipient_name}}: {{title}}</p>".into(),
        );
        let body = render_email_body(&notification(None), &settings);
        assert_eq!(body, "<p>Ana: Opinion &lt;needed&gt;</p>");
    }

    #[tokio::test]
    async fn disabled_email_is_rejected_before_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let settings = NotificationSettings {
            email_enabled: false,
            ..ready_settings()
        };
        let sender = EmailSender::new(SettingsHandle::new(Some(settings)), transport.clone());

        let err = sender.send(&notification(Some("ana@example.org"))).await.unwrap_err();
        assert!(matches!(err, ChannelError::ChannelDisabled(Channel::Email)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_smtp_host_is_configuration_missing() {
        let mut settings = ready_settings();
        settings.smtp.host = None;
        let sender = EmailSender::new(
            SettingsHandle::new(Some(settings)),
            Arc::new(RecordingTransport::default()),
        );

        let err = sender.send(&notification(Some("ana@example.org"))).await.unwrap_err();
        assert!(matches!(err, ChannelError::ConfigurationMissing(Channel::Email)));
    }

    #[tokio::test]
    async fn sends_rendered_email_to_recipient() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = EmailSender::new(SettingsHandle::new(Some(ready_settings())), transport.clone());

        sender.send(&notification(Some("ana@example.org"))).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.org");
        assert_eq!(sent[0].subject, "Opinion <needed>");
        assert_eq!(sent[0].from, "noreply@example.org");
    }

    #[tokio::test]
    async fn recipient_without_address_is_a_transport_error() {
        let sender = EmailSender::new(
            SettingsHandle::new(Some(ready_settings())),
            Arc::new(RecordingTransport::default()),
        );
        let err = sender.send(&notification(None)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }
}
