// src/gateway.rs
//
// Outbound delivery collaborators. The dispatcher depends only on these
// traits; the shipped implementations log the payload and succeed, which is
// what development and staging run with (GATEWAY_MODE=log). Production wires
// in a vendor client behind the same contract.

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct GatewayError(pub String);

/// Upgrade a stored 10-digit US number to E.164 for the provider.
pub fn to_e164(phone: &str) -> String {
    let trimmed = phone.trim();
    if trimmed.len() == 10 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("+1{trimmed}")
    } else if trimmed.len() == 11
        && trimmed.starts_with('1')
        && trimmed.chars().all(|c| c.is_ascii_digit())
    {
        format!("+{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Send a plain-text SMS. Returns the provider message id.
    async fn send(&self, to: &str, body: &str) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct EmailPayload {
    pub subject: String,
    pub html_body: String,
    pub to: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, message: &EmailPayload) -> Result<(), GatewayError>;
}

/* -------------------------
   Log-only implementations
--------------------------*/

pub struct LogSmsGateway;

#[async_trait]
impl SmsGateway for LogSmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<String, GatewayError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        tracing::info!(to = %to_e164(to), %message_id, body, "sms (log gateway)");
        Ok(message_id)
    }
}

pub struct LogEmailGateway {
    pub from_name: String,
    pub from_email: String,
}

#[async_trait]
impl EmailGateway for LogEmailGateway {
    async fn send(&self, message: &EmailPayload) -> Result<(), GatewayError> {
        tracing::info!(
            from = %format!("{} <{}>", self.from_name, self.from_email),
            to = %message.to,
            cc = ?message.cc,
            bcc = ?message.bcc,
            subject = %message.subject,
            body = %message.html_body,
            "email (log gateway)"
        );
        Ok(())
    }
}
