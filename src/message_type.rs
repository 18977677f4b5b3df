use crate::config::ClientOptions;
use crate::engine::MessageType;

/// Inputs that decide the wire message type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub server_command: bool,
    pub nat_local: bool,
    pub nat_access: bool,
    pub client_timeout: bool,
}

impl MessageFlags {
    pub fn from_options(opts: &ClientOptions) -> Self {
        Self {
            server_command: opts.server_command.is_some(),
            nat_local: opts.nat_local,
            nat_access: opts.nat_access.is_some(),
            client_timeout: opts.fw_timeout.is_some(),
        }
    }
}

/// First matching row wins: command, then local NAT, then NAT, then access.
pub fn select(flags: MessageFlags) -> MessageType {
    match flags {
        MessageFlags { server_command: true, .. } => MessageType::Command,
        MessageFlags { nat_local: true, client_timeout: true, .. } => {
            MessageType::LocalNatAccessWithTimeout
        }
        MessageFlags { nat_local: true, .. } => MessageType::LocalNatAccess,
        MessageFlags { nat_access: true, client_timeout: true, .. } => {
            MessageType::NatAccessWithTimeout
        }
        MessageFlags { nat_access: true, .. } => MessageType::NatAccess,
        MessageFlags { client_timeout: true, .. } => MessageType::AccessWithTimeout,
        _ => MessageType::Access,
    }
}

pub fn select_for(opts: &ClientOptions) -> MessageType {
    select(MessageFlags::from_options(opts))
}
