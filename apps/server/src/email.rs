use openconv_shared::error::OpenConvError;

use crate::config::EmailConfig;

#[async_trait::async_trait]
pub trait EmailService: Send + Sync {
    async fn send_verification_code(&self, to: &str, code: &str) -> Result<(), OpenConvError>;
    async fn send_recovery_code(&self, to: &str, code: &str) -> Result<(), OpenConvError>;
}

/// Mock email service that logs codes via tracing. Used for development and testing.
#[derive(Default)]
pub struct MockEmailService;

impl MockEmailService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EmailService for MockEmailService {
    async fn send_verification_code(&self, to: &str, code: &str) -> Result<(), OpenConvError> {
        tracing::info!(to = to, code = code, "mock: verification code");
        Ok(())
    }

    async fn send_recovery_code(&self, to: &str, code: &str) -> Result<(), OpenConvError> {
        tracing::info!(to = to, code = code, "mock: recovery code");
        Ok(())
    }
}

/// SMTP email service using lettre.
pub struct SmtpEmailService {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpEmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, OpenConvError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::AsyncSmtpTransport;

        let creds = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        );

        let transport = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| OpenConvError::Internal(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| {
                OpenConvError::Internal(format!("invalid from address: {e}"))
            })?;

        Ok(Self { transport, from })
    }

    async fn send_email(&self, to: &str, subject: &str, body: String) -> Result<(), OpenConvError> {
        use lettre::{AsyncTransport, Message};

        let to_mailbox: lettre::message::Mailbox = to
            .parse()
            .map_err(|e| OpenConvError::Validation(format!("invalid email address: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .body(body)
            .map_err(|e| OpenConvError::Internal(format!("email build error: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| {
                OpenConvError::ServiceUnavailable(format!("email send failed: {e}"))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl EmailService for SmtpEmailService {
    async fn send_verification_code(&self, to: &str, code: &str) -> Result<(), OpenConvError> {
        self.send_email(
            to,
            "OpenConv - Verification Code",
            format!("Your OpenConv verification code is: {code}\n\nThis code expires in 10 minutes."),
        )
        .await
    }

    async fn send_recovery_code(&self, to: &str, code: &str) -> Result<(), OpenConvError> {
        self.send_email(
            to,
            "OpenConv - Account Recovery Code",
            format!("Your OpenConv recovery code is: {code}\n\nThis code expires in 10 minutes."),
        )
        .await
    }
}
