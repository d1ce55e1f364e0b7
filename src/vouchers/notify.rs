//! Voucher notification: one rendered image and one email per voucher.

use crate::vouchers::directory::UserDirectory;
use crate::vouchers::store::PersistedVoucher;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const VOUCHER_SUBJECT: &str = "Congratulations on earning Karma points!";
pub const VOUCHER_IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no cached user for muid {0}")]
    UnknownRecipient(String),
    #[error("render HTTP error: {0}")]
    RenderHttp(#[from] reqwest::Error),
    #[error("render service returned status {status}: {body}")]
    RenderStatus { status: StatusCode, body: String },
    #[error("render service returned an empty image")]
    EmptyImage,
    #[error("render request timed out after {0:?}")]
    RenderTimeout(Duration),
    #[error("invalid mail address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to compose mail: {0}")]
    Compose(String),
    #[error("mail transport error: {0}")]
    Transport(String),
}

/// Everything printed on a voucher image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherCard {
    pub name: String,
    pub karma: String,
    pub code: String,
    pub hashtag: String,
    pub month_week: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: MailAttachment,
}

#[rocket::async_trait]
pub trait VoucherRenderer: Send + Sync {
    /// Render `card` as JPEG bytes.
    async fn render(&self, card: &VoucherCard) -> Result<Vec<u8>, NotifyError>;
}

#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), NotifyError>;
}

/// What happens when one recipient cannot be notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Stop at the first failure and return it.
    #[default]
    FailFast,
    /// Record the failure and continue with the next recipient.
    Isolate,
}

impl FromStr for DispatchPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" => Ok(DispatchPolicy::FailFast),
            "isolate" => Ok(DispatchPolicy::Isolate),
            other => Err(format!("unknown dispatch policy '{other}'")),
        }
    }
}

impl fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPolicy::FailFast => f.write_str("fail_fast"),
            DispatchPolicy::Isolate => f.write_str("isolate"),
        }
    }
}

/// A voucher that was committed but whose recipient was not notified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub code: String,
    pub muid: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub sent: usize,
    pub failures: Vec<DispatchFailure>,
}

pub struct NotificationDispatcher {
    renderer: Arc<dyn VoucherRenderer>,
    mailer: Arc<dyn Mailer>,
    from_mail: String,
    policy: DispatchPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        renderer: Arc<dyn VoucherRenderer>,
        mailer: Arc<dyn Mailer>,
        from_mail: impl Into<String>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            renderer,
            mailer,
            from_mail: from_mail.into(),
            policy,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Notify every voucher owner in order. Names and addresses come from the
    /// import's cached user directory.
    pub async fn dispatch(
        &self,
        vouchers: &[PersistedVoucher],
        users: &UserDirectory,
    ) -> Result<DispatchOutcome, NotifyError> {
        let mut outcome = DispatchOutcome::default();

        for voucher in vouchers {
            match self.notify_one(voucher, users).await {
                Ok(()) => outcome.sent += 1,
                Err(err) => match self.policy {
                    DispatchPolicy::FailFast => {
                        log::error!(
                            "voucher {}: notification failed, aborting remaining sends: {}",
                            voucher.code,
                            err
                        );
                        return Err(err);
                    }
                    DispatchPolicy::Isolate => {
                        log::warn!("voucher {}: notification failed: {}", voucher.code, err);
                        outcome.failures.push(DispatchFailure {
                            code: voucher.code.clone(),
                            muid: voucher.muid.clone(),
                            error: format!("Voucher created but notification failed: {err}"),
                        });
                    }
                },
            }
        }

        log::info!(
            "voucher notifications: {} sent, {} failed",
            outcome.sent,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn notify_one(
        &self,
        voucher: &PersistedVoucher,
        users: &UserDirectory,
    ) -> Result<(), NotifyError> {
        let user = users
            .get(&voucher.muid)
            .ok_or_else(|| NotifyError::UnknownRecipient(voucher.muid.clone()))?;
        let full_name = user.full_name();

        let card = VoucherCard {
            name: full_name.clone(),
            karma: voucher.karma.to_string(),
            code: voucher.code.clone(),
            hashtag: voucher.hashtag.clone(),
            month_week: format!("{}/{}", voucher.month, voucher.week),
        };
        let image = self.renderer.render(&card).await?;

        let mail = OutgoingMail {
            from: self.from_mail.clone(),
            to: user.email.clone(),
            subject: VOUCHER_SUBJECT.to_string(),
            body: voucher_mail_body(&full_name, &user.email, &voucher.code),
            attachment: MailAttachment {
                filename: format!("{full_name}.jpg"),
                content_type: VOUCHER_IMAGE_CONTENT_TYPE,
                bytes: image,
            },
        };

        self.mailer.send(mail).await?;
        log::debug!("voucher {}: mailed to {}", voucher.code, user.email);
        Ok(())
    }
}

pub fn voucher_mail_body(full_name: &str, email: &str, code: &str) -> String {
    format!(
        "Greetings from the Karma team!\n\
         \n\
         Great news! You are one step away from claiming your Karma points.\n\
         \n\
         Name: {full_name}\n\
         Email: {email}\n\
         \n\
         To claim your points, copy `voucher {code}` and post it in the #task-dropbox \
         channel together with the attached voucher image.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingMailer, StaticRenderer};
    use crate::vouchers::directory::UserLookup;
    use uuid::Uuid;

    fn users() -> UserDirectory {
        UserDirectory::new(vec![
            UserLookup {
                id: Uuid::from_u128(1),
                muid: "a@x".into(),
                email: "asha@example.com".into(),
                first_name: "Asha".into(),
                last_name: Some("Nair".into()),
            },
            UserLookup {
                id: Uuid::from_u128(2),
                muid: "b@x".into(),
                email: "bad-address".into(),
                first_name: "Bilal".into(),
                last_name: None,
            },
            UserLookup {
                id: Uuid::from_u128(3),
                muid: "c@x".into(),
                email: "chen@example.com".into(),
                first_name: "Chen".into(),
                last_name: None,
            },
        ])
    }

    fn voucher(code: &str, muid: &str) -> PersistedVoucher {
        PersistedVoucher {
            code: code.into(),
            muid: muid.into(),
            month: "1".into(),
            week: "2".into(),
            karma: 10,
            hashtag: "#t1".into(),
        }
    }

    fn dispatcher(mailer: Arc<RecordingMailer>, policy: DispatchPolicy) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::new(StaticRenderer::new(b"jpeg".to_vec())),
            mailer,
            "noreply@karma.test",
            policy,
        )
    }

    #[tokio::test]
    async fn composes_one_mail_per_voucher() {
        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = dispatcher(mailer.clone(), DispatchPolicy::FailFast);

        let outcome = dispatcher
            .dispatch(&[voucher("MU000001", "a@x")], &users())
            .await
            .expect("dispatch succeeds");
        assert_eq!(outcome.sent, 1);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        let mail = &sent[0];
        assert_eq!(mail.from, "noreply@karma.test");
        assert_eq!(mail.to, "asha@example.com");
        assert_eq!(mail.subject, VOUCHER_SUBJECT);
        assert!(mail.body.contains("Name: Asha Nair"));
        assert!(mail.body.contains("Email: asha@example.com"));
        assert!(mail.body.contains("voucher MU000001"));
        assert_eq!(mail.attachment.filename, "Asha Nair.jpg");
        assert_eq!(mail.attachment.content_type, "image/jpeg");
        assert_eq!(mail.attachment.bytes, b"jpeg".to_vec());
    }

    #[tokio::test]
    async fn renders_card_with_integer_karma_and_month_week() {
        let renderer = Arc::new(StaticRenderer::new(vec![1, 2, 3]));
        let dispatcher = NotificationDispatcher::new(
            renderer.clone(),
            Arc::new(RecordingMailer::default()),
            "noreply@karma.test",
            DispatchPolicy::FailFast,
        );

        dispatcher
            .dispatch(&[voucher("MU000009", "c@x")], &users())
            .await
            .unwrap();

        let cards = renderer.cards();
        assert_eq!(
            cards,
            vec![VoucherCard {
                name: "Chen".into(),
                karma: "10".into(),
                code: "MU000009".into(),
                hashtag: "#t1".into(),
                month_week: "1/2".into(),
            }]
        );
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let mailer = Arc::new(RecordingMailer::rejecting("bad-address"));
        let dispatcher = dispatcher(mailer.clone(), DispatchPolicy::FailFast);

        let result = dispatcher
            .dispatch(
                &[
                    voucher("MU000001", "a@x"),
                    voucher("MU000002", "b@x"),
                    voucher("MU000003", "c@x"),
                ],
                &users(),
            )
            .await;

        assert!(matches!(result, Err(NotifyError::Transport(_))));
        let recipients: Vec<String> = mailer.sent().into_iter().map(|m| m.to).collect();
        assert_eq!(recipients, vec!["asha@example.com"]);
    }

    #[tokio::test]
    async fn isolate_reports_failures_and_keeps_sending() {
        let mailer = Arc::new(RecordingMailer::rejecting("bad-address"));
        let dispatcher = dispatcher(mailer.clone(), DispatchPolicy::Isolate);

        let outcome = dispatcher
            .dispatch(
                &[
                    voucher("MU000001", "a@x"),
                    voucher("MU000002", "b@x"),
                    voucher("MU000003", "c@x"),
                ],
                &users(),
            )
            .await
            .expect("isolate never fails the batch");

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].code, "MU000002");
        assert!(
            outcome.failures[0]
                .error
                .starts_with("Voucher created but notification failed")
        );
        assert_eq!(mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn unknown_recipient_is_an_error() {
        let dispatcher = dispatcher(Arc::new(RecordingMailer::default()), DispatchPolicy::FailFast);
        let result = dispatcher
            .dispatch(&[voucher("MU000001", "ghost@x")], &users())
            .await;
        assert!(matches!(result, Err(NotifyError::UnknownRecipient(m)) if m == "ghost@x"));
    }

    #[test]
    fn parses_dispatch_policy() {
        assert_eq!("fail_fast".parse(), Ok(DispatchPolicy::FailFast));
        assert_eq!("Isolate".parse(), Ok(DispatchPolicy::Isolate));
        assert!("retry".parse::<DispatchPolicy>().is_err());
        assert_eq!(DispatchPolicy::default(), DispatchPolicy::FailFast);
    }
}
