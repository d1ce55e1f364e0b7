use crate::config::MailConfig;
use crate::vouchers::notify::{Mailer, NotifyError, OutgoingMail};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// SMTP mailer backed by a pooled lettre transport.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, NotifyError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        }
        .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[rocket::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), NotifyError> {
        let message = build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|err: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: err.to_string(),
    })
}

/// Plain-text body plus the voucher image as an attachment.
pub fn build_message(mail: OutgoingMail) -> Result<Message, NotifyError> {
    let content_type = ContentType::parse(mail.attachment.content_type)
        .map_err(|err| NotifyError::Compose(err.to_string()))?;
    let attachment = Attachment::new(mail.attachment.filename).body(mail.attachment.bytes, content_type);

    Message::builder()
        .from(parse_mailbox(&mail.from)?)
        .to(parse_mailbox(&mail.to)?)
        .subject(mail.subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(mail.body))
                .singlepart(attachment),
        )
        .map_err(|err| NotifyError::Compose(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vouchers::notify::{MailAttachment, VOUCHER_SUBJECT};

    fn mail(to: &str) -> OutgoingMail {
        OutgoingMail {
            from: "noreply@karma.test".into(),
            to: to.into(),
            subject: VOUCHER_SUBJECT.into(),
            body: "voucher MU000001".into(),
            attachment: MailAttachment {
                filename: "Asha Nair.jpg".into(),
                content_type: "image/jpeg",
                bytes: vec![0xff, 0xd8, 0xff],
            },
        }
    }

    #[test]
    fn builds_multipart_message_with_attachment() {
        let message = build_message(mail("asha@example.com")).expect("message builds");
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(raw.contains("To: asha@example.com"));
        assert!(raw.contains("Subject: Congratulations on earning Karma points!"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("Content-Type: image/jpeg"));
        assert!(raw.contains("Asha Nair.jpg"));
        assert!(raw.contains("voucher MU000001"));
    }

    #[test]
    fn rejects_invalid_recipient() {
        let err = build_message(mail("not an address")).unwrap_err();
        assert!(matches!(err, NotifyError::Address { address, .. } if address == "not an address"));
    }
}
