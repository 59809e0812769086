//! 按迁移方向解析源端与目标端
//!
//! pull: 远端为源、本站为目标；push: 本站为源、远端为目标。
//! 解析只在构造时做一次，之后的同步代码只关心 source / target。

use crate::models::{BasicAuth, ConnectionType, Direction, Job, Migration};
use crate::settings::Settings;
use crate::utils::crypto;

pub const SERVICE_PATH: &str = "/wpsynchro";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Local,
    Remote,
}

/// 一端站点的连接信息
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub role: Role,
    pub base_url: String,
    pub access_key: String,
    pub verify_ssl: bool,
    pub basic_auth: Option<BasicAuth>,
    /// 出示给对端的令牌摘要，初始化完成前为空
    pub token: Option<String>,
}

impl Endpoint {
    pub fn local(settings: &Settings, access_key: &str) -> Self {
        Self {
            role: Role::Local,
            base_url: settings.site_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            verify_ssl: false,
            basic_auth: settings.local_basic_auth.clone(),
            token: None,
        }
    }

    pub fn remote(migration: &Migration) -> Self {
        let basic_auth = match migration.connection_type {
            ConnectionType::BasicAuth => migration.basic_auth.clone(),
            ConnectionType::Direct => None,
        };
        Self {
            role: Role::Remote,
            base_url: migration.site_url.trim_end_matches('/').to_string(),
            access_key: migration.access_key.clone(),
            verify_ssl: migration.verify_ssl,
            basic_auth,
            token: None,
        }
    }

    /// 由对端签发的原始令牌计算出示用的摘要
    pub fn with_transfer_token(mut self, raw_token: &str) -> Self {
        self.token = if raw_token.is_empty() {
            None
        } else {
            Some(crypto::token_hash(raw_token, &self.access_key))
        };
        self
    }

    pub fn is_local(&self) -> bool {
        self.role == Role::Local
    }

    /// 错误信息里标识站点的前缀
    pub fn label(&self) -> &'static str {
        match self.role {
            Role::Local => "Local site",
            Role::Remote => "Remote site",
        }
    }

    pub fn service_url(&self, action: &str) -> String {
        let mut url = format!(
            "{}{}?action={}",
            self.base_url,
            SERVICE_PATH,
            urlencoding::encode(action)
        );
        if let Some(token) = &self.token {
            url.push_str("&token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

/// 一次迁移中已解析的两端
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub direction: Direction,
    pub source: Endpoint,
    pub target: Endpoint,
}

impl Endpoints {
    pub fn resolve(migration: &Migration, job: &Job, settings: &Settings, local_access_key: &str) -> Self {
        let local = Endpoint::local(settings, local_access_key).with_transfer_token(&job.local_transfer_token);
        let remote = Endpoint::remote(migration).with_transfer_token(&job.remote_transfer_token);

        let (source, target) = match migration.direction {
            Direction::Pull => (remote, local),
            Direction::Push => (local, remote),
        };

        Self {
            direction: migration.direction,
            source,
            target,
        }
    }

    pub fn local(&self) -> &Endpoint {
        if self.source.is_local() { &self.source } else { &self.target }
    }

    pub fn remote(&self) -> &Endpoint {
        if self.source.is_local() { &self.target } else { &self.source }
    }
}
