use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::config::MailConfig;
use crate::data::user::User;
use crate::error::MailError;

pub fn activation_link(site_url: &str, user: Uuid, token: &str) -> String {
    format!(
        "{}/api/v1/user/activate/{}/{}",
        site_url.trim_end_matches('/'),
        user,
        token
    )
}

pub fn activation_mail(user: &User, link: &str) -> (String, String) {
    let subject = "Activate your account".to_string();
    let body = format!(
        "Hi {},\n\n\
         please confirm your registration by opening the link below:\n\n\
         {}\n\n\
         If you didn't create an account, ignore this message.\n",
        user.display_name(),
        link
    );
    (subject, body)
}

#[derive(Clone)]
struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// Sends account mail over SMTP, or logs it when no server is configured.
#[derive(Clone, Default)]
pub struct Mailer {
    smtp: Option<SmtpMailer>,
}

impl Mailer {
    pub fn from_config(config: Option<&MailConfig>) -> Result<Mailer, MailError> {
        let config = match config {
            Some(it) => it,
            None => {
                tracing::info!("No mail server configured, mail will only be logged.");
                return Ok(Mailer::default());
            }
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Mailer {
            smtp: Some(SmtpMailer {
                transport,
                from: config.from.parse()?,
            }),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.smtp.is_some()
    }

    pub async fn send(&self, to: &str, subject: String, body: String) -> Result<(), MailError> {
        let smtp = match &self.smtp {
            Some(it) => it,
            None => {
                tracing::info!("Mail to {}: {}\n{}", to, subject, body);
                return Ok(());
            }
        };

        let message = Message::builder()
            .from(smtp.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        smtp.transport.send(message).await?;
        tracing::debug!("sent mail to {}", to);
        Ok(())
    }
}
