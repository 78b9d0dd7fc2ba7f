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
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod accounts;
mod clock;
mod config;
mod crypto;
mod gate;
mod http_server;
mod mailer;
mod memory_store;
mod scylla_connector;
mod session;
mod store;
mod sweeper;
mod user;
mod user_manager;
mod validator;
mod verification;

use accounts::{AccountPolicy, Accounts};
use clock::{Clock, SystemClock};
use config::{AppConfig, Cli, MailSettings, StoreKind};
use gate::Gate;
use http_server::{AppState, JsonRenderer};
use mailer::{LogMailer, MailDispatcher, Mailer, SmtpMailer};
use memory_store::MemoryStore;
use scylla_connector::ScyllaStore;
use session::{SessionManager, SessionRepository};
use sweeper::Sweeper;
use user::password::PasswordHasher;
use user::UserRepository;
use user_manager::UserManager;
use verification::{TokenRepository, VerificationStore};

const MAIL_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One backend seen through each of the three repository seams.
struct Repositories {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl Repositories {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository + TokenRepository + SessionRepository + 'static,
    {
        Self { users: store.clone(), tokens: store.clone(), sessions: store }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slotboard=info")),
        )
        .init();

    let config = AppConfig::from_cli(Cli::parse()).context("Invalid configuration")?;

    let repos = match config.store {
        StoreKind::Memory => {
            tracing::warn!("using the in-memory store; nothing survives a restart");
            Repositories::from_store(Arc::new(MemoryStore::new()))
        }
        StoreKind::Scylla => {
            tracing::info!(nodes = ?config.scylla_nodes, "connecting to ScyllaDB");
            let store = ScyllaStore::connect(&config.scylla_nodes, &config.scylla_keyspace).await?;
            Repositories::from_store(Arc::new(store))
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.mail {
        MailSettings::Smtp(smtp) => {
            Arc::new(SmtpMailer::new(smtp).context("Failed to build SMTP transport")?)
        }
        MailSettings::Log => {
            tracing::warn!("development mode: verification links are logged, not mailed");
            Arc::new(LogMailer)
        }
    };
    let (outbox, mail_worker) = MailDispatcher::spawn(mailer);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let users = UserManager::new(
        repos.users,
        PasswordHasher::new(config.argon2.clone()),
        clock.clone(),
        config.store_timeout,
    );
    let tokens = VerificationStore::new(
        repos.tokens,
        clock.clone(),
        config.token_ttl,
        config.store_timeout,
    );
    let sessions = SessionManager::new(
        repos.sessions,
        clock.clone(),
        config.session_lifetime,
        config.store_timeout,
        !config.dev,
    );

    if let Some(every) = config.sweep_interval {
        Sweeper::new(tokens.clone(), sessions.clone()).spawn(every);
    }

    let accounts = Accounts::new(
        users.clone(),
        tokens,
        Arc::new(outbox),
        clock,
        AccountPolicy {
            base_url: config.base_url.clone(),
            permitted_domain: config.permitted_domain.clone(),
            resend_cooldown: config.resend_cooldown,
        },
    );

    let state = AppState {
        accounts,
        sessions,
        gate: Gate::new(users),
        renderer: Arc::new(JsonRenderer),
    };

    // The router owned the last dispatcher, so the worker stops once the queue is empty.
    http_server::run_server(state, config.addr).await?;
    MailDispatcher::drain(mail_worker, MAIL_DRAIN_TIMEOUT).await;
    Ok(())
}
