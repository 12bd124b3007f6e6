//! SMTP sender for mailbus
//!
//! Builds outgoing mail with lettre, delivers it over plain, STARTTLS or
//! implicit TLS connections, and publishes the outcome of every attempt.

mod client;
mod config;
mod error;

pub use client::{build_message, Delivery, SmtpDelivery, SmtpMailSender};
pub use config::{ConnectionMode, SenderConfig};
pub use error::{SmtpError, SmtpResult};
