use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::time::Duration;

/// Outbound messages sent after a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AddedToGroup { email: String, group_name: String },
    RemovedFromGroup { email: String, group_name: String },
    RoleChanged {
        email: String,
        group_name: String,
        role: String,
    },
    /// Asks a group admin provisioned from a contract to confirm their account.
    ConfirmAdmin {
        email: String,
        group_name: String,
        contract_url: String,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::AddedToGroup { email, .. }
            | Notification::RemovedFromGroup { email, .. }
            | Notification::RoleChanged { email, .. }
            | Notification::ConfirmAdmin { email, .. } => email,
        }
    }

    fn subject(&self) -> String {
        match self {
            Notification::AddedToGroup { group_name, .. } => {
                format!("You have been added to {}", group_name)
            }
            Notification::RemovedFromGroup { group_name, .. } => {
                format!("You have been removed from {}", group_name)
            }
            Notification::RoleChanged { group_name, .. } => {
                format!("Your role in {} has changed", group_name)
            }
            Notification::ConfirmAdmin { group_name, .. } => {
                format!("Confirm your administrator account for {}", group_name)
            }
        }
    }

    fn body(&self) -> String {
        match self {
            Notification::AddedToGroup { group_name, .. } => format!(
                "You are now a member of the group \"{}\".\n\nSign in to access the services it grants.",
                group_name
            ),
            Notification::RemovedFromGroup { group_name, .. } => format!(
                "You are no longer a member of the group \"{}\".",
                group_name
            ),
            Notification::RoleChanged {
                group_name, role, ..
            } => format!("Your role in the group \"{}\" is now: {}.", group_name, role),
            Notification::ConfirmAdmin {
                group_name,
                contract_url,
                ..
            } => format!(
                "The authorization request for \"{}\" was approved and you are the administrator of its group.\n\n\
                 Sign in once to confirm your account.\n\nRequest: {}",
                group_name, contract_url
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let mut builder = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));

        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ));
        }

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer: builder.build(),
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn send(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        let to_email = notification.recipient().to_string();
        let subject = notification.subject();

        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to_email.parse()?)
            .subject(subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body())?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email)).await?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(anyhow::anyhow!("Failed to send email: {}", e))
            }
        }
    }
}

/// Records notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Result<Vec<Notification>, anyhow::Error> {
        Ok(self
            .sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Recording notifier mutex poisoned: {}", e))?
            .clone())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Recording notifier mutex poisoned: {}", e))?
            .push(notification.clone());
        Ok(())
    }
}
