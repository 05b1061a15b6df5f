use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to_name: String,
    pub to_address: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub attachment: Option<EmailAttachment>,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Mail is switched off; the message was only logged.
    Disabled(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address {0}")]
    Address(String),
    #[error("message build failed: {0}")]
    Build(String),
    #[error("smtp transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<DeliveryOutcome, MailError>;
}

pub struct SmtpMailer {
    from: Mailbox,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn from_config(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("SMTP_FROM is not a valid mailbox: {e}"))?;

        if cfg.is_disabled() {
            tracing::warn!("SMTP_PASSWORD not configured; confirmation emails will only be logged");
            return Ok(Self {
                from,
                transport: None,
            });
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();

        Ok(Self {
            from,
            transport: Some(transport),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<DeliveryOutcome, MailError> {
        let Some(transport) = &self.transport else {
            tracing::info!(
                to = %email.to_address,
                subject = %email.subject,
                "email disabled (development mode); message logged, not sent"
            );
            return Ok(DeliveryOutcome::Disabled(
                "Email sending is disabled in development mode".into(),
            ));
        };

        let message = build_message(&self.from, &email)?;
        transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::info!(to = %email.to_address, "confirmation email sent");
        Ok(DeliveryOutcome::Sent)
    }
}

/// HTML + plain-text alternatives, plus the optional file attachment.
pub fn build_message(from: &Mailbox, email: &OutgoingEmail) -> Result<Message, MailError> {
    let to = Mailbox::new(
        Some(email.to_name.clone()),
        email
            .to_address
            .trim()
            .parse()
            .map_err(|_| MailError::Address(email.to_address.clone()))?,
    );

    let alternative = MultiPart::alternative_plain_html(email.text.clone(), email.html.clone());
    let body = match &email.attachment {
        None => alternative,
        Some(att) => {
            let content_type = ContentType::parse(&att.content_type)
                .map_err(|e| MailError::Build(e.to_string()))?;
            MultiPart::mixed()
                .multipart(alternative)
                .singlepart(Attachment::new(att.filename.clone()).body(att.bytes.clone(), content_type))
        }
    };

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(email.subject.clone())
        .multipart(body)
        .map_err(|e| MailError::Build(e.to_string()))
}

/// Everything the confirmation mail shows.
#[derive(Debug, Clone)]
pub struct ConfirmationDetails {
    pub patient_name: String,
    pub patient_email: String,
    pub appointment_num: String,
    pub facility_name: String,
    pub service_name: String,
    pub scheduled_date: chrono::NaiveDate,
    pub scheduled_time: chrono::NaiveTime,
    pub queue_number: Option<i32>,
    pub referral_num: Option<String>,
    pub qr_png: Option<Vec<u8>>,
}

pub fn confirmation_email(d: &ConfirmationDetails) -> OutgoingEmail {
    let date = d.scheduled_date.format("%A, %B %-d, %Y").to_string();
    let time = d.scheduled_time.format("%-I:%M %p").to_string();

    let mut rows = vec![
        ("Appointment Number", d.appointment_num.clone()),
        ("Facility", d.facility_name.clone()),
        ("Service", d.service_name.clone()),
        ("Date", date),
        ("Time", time),
    ];
    if let Some(q) = d.queue_number {
        rows.push(("Queue Number", format!("#{q}")));
    }
    if let Some(r) = &d.referral_num {
        rows.push(("Referral Number", r.clone()));
    }

    let instructions = [
        "Bring a valid government-issued ID.",
        "Bring your PhilHealth ID or member data record if available.",
        "Bring your referral slip if this appointment uses a referral.",
        "Arrive at least 15 minutes before your scheduled time.",
        "Present the QR code at the facility for check-in.",
    ];

    let mut text = format!(
        "Dear {},\n\nYour appointment has been confirmed.\n\n",
        d.patient_name
    );
    for (k, v) in &rows {
        text.push_str(&format!("{k}: {v}\n"));
    }
    text.push_str("\nReminders:\n");
    for i in &instructions {
        text.push_str(&format!("- {i}\n"));
    }
    if d.qr_png.is_some() {
        text.push_str("\nYour QR code is attached to this email.\n");
    }
    text.push_str("\nCity Health Office of Koronadal\n");

    let table: String = rows
        .iter()
        .map(|(k, v)| {
            format!(
                "<tr><td style=\"padding:4px 12px 4px 0\"><strong>{}</strong></td><td>{}</td></tr>",
                escape_html(k),
                escape_html(v)
            )
        })
        .collect();
    let list: String = instructions
        .iter()
        .map(|i| format!("<li>{}</li>", escape_html(i)))
        .collect();
    let qr_block = d
        .qr_png
        .as_ref()
        .map(|png| {
            format!(
                "<p style=\"text-align:center\"><img alt=\"Appointment QR code\" width=\"200\" height=\"200\" src=\"data:image/png;base64,{}\"></p>",
                STANDARD.encode(png)
            )
        })
        .unwrap_or_default();

    let html = format!(
        "<html><body style=\"font-family:Arial,sans-serif;color:#333\">\
         <h2 style=\"color:#0077b6\">Appointment Confirmed</h2>\
         <p>Dear {name},</p><p>Your appointment has been confirmed.</p>\
         <table>{table}</table>{qr_block}\
         <h3>Reminders</h3><ul>{list}</ul>\
         <p>City Health Office of Koronadal</p></body></html>",
        name = escape_html(&d.patient_name),
    );

    OutgoingEmail {
        to_name: d.patient_name.clone(),
        to_address: d.patient_email.clone(),
        subject: format!("Appointment Confirmation - {}", d.appointment_num),
        html,
        text,
        attachment: d.qr_png.as_ref().map(|png| EmailAttachment {
            filename: format!("{}-qr.png", d.appointment_num),
            content_type: "image/png".into(),
            bytes: png.clone(),
        }),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn details(qr: Option<Vec<u8>>, queue: Option<i32>) -> ConfirmationDetails {
        ConfirmationDetails {
            patient_name: "Juan Dela Cruz".into(),
            patient_email: "juan@example.org".into(),
            appointment_num: "APT-20261019-00042".into(),
            facility_name: "City Health Office".into(),
            service_name: "Primary Care".into(),
            scheduled_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            scheduled_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            queue_number: queue,
            referral_num: None,
            qr_png: qr,
        }
    }

    #[test]
    fn test_confirmation_without_qr_or_queue() {
        let mail = confirmation_email(&details(None, None));
        assert_eq!(mail.subject, "Appointment Confirmation - APT-20261019-00042");
        assert!(mail.text.contains("Date: Tuesday, October 20, 2026"));
        assert!(mail.text.contains("Time: 9:00 AM"));
        assert!(!mail.text.contains("Queue Number"));
        assert!(!mail.html.contains("data:image/png"));
        assert!(mail.attachment.is_none());
    }

    #[test]
    fn test_confirmation_embeds_qr_inline_and_attached() {
        let mail = confirmation_email(&details(Some(vec![1, 2, 3]), Some(12)));
        assert!(mail.text.contains("Queue Number: #12"));
        assert!(mail.html.contains("data:image/png;base64,AQID"));
        let att = mail.attachment.expect("attachment");
        assert_eq!(att.filename, "APT-20261019-00042-qr.png");
        assert_eq!(att.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_build_message_carries_attachment() {
        let from: Mailbox = "CHO Koronadal <noreply@example.org>".parse().unwrap();
        let mail = confirmation_email(&details(Some(vec![9; 16]), None));
        let msg = build_message(&from, &mail).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("attachment; filename=\"APT-20261019-00042-qr.png\""));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let from: Mailbox = "noreply@example.org".parse().unwrap();
        let mut mail = confirmation_email(&details(None, None));
        mail.to_address = "not-an-address".into();
        assert!(matches!(build_message(&from, &mail), Err(MailError::Address(_))));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[tokio::test]
    async fn test_disabled_mailer_logs_instead_of_sending() {
        let cfg = SmtpConfig {
            host: "localhost".into(),
            port: 25,
            username: String::new(),
            password: "disabled".into(),
            from: "CHO <noreply@example.org>".into(),
        };
        let mailer = SmtpMailer::from_config(&cfg).unwrap();
        let outcome = mailer.send(confirmation_email(&details(None, None))).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Disabled(_)));
    }
}
