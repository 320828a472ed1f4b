//! External service integrations

pub mod crm;
pub mod oracle;
