// Copyright (C) 2025 Kevin Exton
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Scylla,
}

/// Command line, with every flag also readable from the environment.
#[derive(Debug, Parser)]
#[command(name = "slotboard")]
#[command(about = "Slotboard membership and availability board")]
pub struct Cli {
    #[arg(long, env = "SLOTBOARD_ADDR", default_value = "127.0.0.1:4000")]
    pub addr: SocketAddr,

    /// Prefix for links sent by email.
    #[arg(long, env = "SLOTBOARD_BASE_URL", default_value = "http://localhost:4000")]
    pub base_url: String,

    /// Log links instead of mailing them and drop the Secure cookie flag.
    #[arg(long, env = "SLOTBOARD_DEV")]
    pub dev: bool,

    #[arg(long, env = "SLOTBOARD_PERMITTED_DOMAIN", default_value = "oregonstate.edu")]
    pub permitted_domain: String,

    #[arg(long, env = "SLOTBOARD_STORE", value_enum, default_value = "memory")]
    pub store: StoreKind,

    #[arg(long, env = "SCYLLA_NODES", value_delimiter = ',', default_value = "127.0.0.1:9042")]
    pub scylla_nodes: Vec<String>,

    #[arg(long, env = "SCYLLA_KEYSPACE", default_value = "slotboard")]
    pub scylla_keyspace: String,

    #[arg(long, env = "SLOTBOARD_SESSION_LIFETIME_HOURS", default_value_t = 12)]
    pub session_lifetime_hours: u32,

    #[arg(long, env = "SLOTBOARD_TOKEN_TTL_HOURS", default_value_t = 24)]
    pub token_ttl_hours: u32,

    #[arg(long, env = "SLOTBOARD_RESEND_COOLDOWN_SECS", default_value_t = 300)]
    pub resend_cooldown_secs: u64,

    #[arg(long, env = "SLOTBOARD_STORE_TIMEOUT_MS", default_value_t = 5000)]
    pub store_timeout_ms: u64,

    /// 0 disables the sweep.
    #[arg(long, env = "SLOTBOARD_SWEEP_INTERVAL_SECS", default_value_t = 600)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    #[arg(long, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    #[arg(long, env = "SMTP_USE_TLS", default_value_t = true, action = clap::ArgAction::Set)]
    pub smtp_use_tls: bool,

    #[arg(long, env = "MAIL_FROM")]
    pub mail_from: Option<String>,

    #[arg(long, env = "MAIL_FROM_NAME")]
    pub mail_from_name: Option<String>,

    #[arg(long, env = "ARGON2_M_COST")]
    pub argon2_m_cost: Option<u32>,

    #[arg(long, env = "ARGON2_T_COST")]
    pub argon2_t_cost: Option<u32>,

    #[arg(long, env = "ARGON2_P_COST")]
    pub argon2_p_cost: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SMTP_HOST is required outside development mode")]
    MailTransportMissing,

    #[error("Missing from address: MAIL_FROM is required when SMTP is configured")]
    MissingFromAddress,

    #[error("Invalid base URL: {0}. Expected an http:// or https:// origin")]
    InvalidBaseUrl(String),

    #[error("Invalid permitted domain: {0}")]
    InvalidDomain(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Invalid argon2 parameters: {0}")]
    InvalidArgon2(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailSettings {
    Smtp(SmtpSettings),
    Log,
}

/// Validated settings the rest of the service is built from.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub base_url: String,
    pub dev: bool,
    pub permitted_domain: String,
    pub store: StoreKind,
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    pub session_lifetime: chrono::Duration,
    pub token_ttl: chrono::Duration,
    pub resend_cooldown: chrono::Duration,
    pub store_timeout: Duration,
    pub sweep_interval: Option<Duration>,
    pub mail: MailSettings,
    pub argon2: argon2::Params,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let base_url = cli.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(cli.base_url));
        }

        let permitted_domain = cli.permitted_domain.trim().trim_start_matches('@').to_lowercase();
        if permitted_domain.is_empty() || permitted_domain.contains('@') {
            return Err(ConfigError::InvalidDomain(cli.permitted_domain));
        }

        if cli.session_lifetime_hours == 0 {
            return Err(ConfigError::ZeroDuration("session-lifetime-hours"));
        }
        if cli.token_ttl_hours == 0 {
            return Err(ConfigError::ZeroDuration("token-ttl-hours"));
        }
        if cli.store_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("store-timeout-ms"));
        }

        let mail = match cli.smtp_host {
            Some(host) => MailSettings::Smtp(SmtpSettings {
                host,
                port: cli.smtp_port,
                username: cli.smtp_username,
                password: cli.smtp_password,
                use_tls: cli.smtp_use_tls,
                from_address: cli.mail_from.ok_or(ConfigError::MissingFromAddress)?,
                from_name: cli.mail_from_name,
            }),
            None if cli.dev => MailSettings::Log,
            None => return Err(ConfigError::MailTransportMissing),
        };

        let argon2 = argon2::Params::new(
            cli.argon2_m_cost.unwrap_or(argon2::Params::DEFAULT_M_COST),
            cli.argon2_t_cost.unwrap_or(argon2::Params::DEFAULT_T_COST),
            cli.argon2_p_cost.unwrap_or(argon2::Params::DEFAULT_P_COST),
            None,
        )
        .map_err(|e| ConfigError::InvalidArgon2(e.to_string()))?;

        Ok(Self {
            addr: cli.addr,
            base_url,
            dev: cli.dev,
            permitted_domain,
            store: cli.store,
            scylla_nodes: cli.scylla_nodes,
            scylla_keyspace: cli.scylla_keyspace,
            session_lifetime: chrono::Duration::hours(i64::from(cli.session_lifetime_hours)),
            token_ttl: chrono::Duration::hours(i64::from(cli.token_ttl_hours)),
            resend_cooldown: chrono::Duration::seconds(cli.resend_cooldown_secs as i64),
            store_timeout: Duration::from_millis(cli.store_timeout_ms),
            sweep_interval: (cli.sweep_interval_secs > 0)
                .then(|| Duration::from_secs(cli.sweep_interval_secs)),
            mail,
            argon2,
        })
    }
}
