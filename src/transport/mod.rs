pub mod client;
pub mod destination;
pub mod envelope;
#[cfg(test)]
pub mod mock;

pub use client::{CallOptions, HttpTransport, RemoteResult, RemoteTransport};
pub use destination::{Endpoint, Endpoints, Role, SERVICE_PATH};
pub use envelope::{Attachment, Envelope};

/// 服务端支持的 action
pub mod actions {
    pub const INITIATE: &str = "wpsynchro_initiate";
    pub const MASTERDATA: &str = "wpsynchro_masterdata";
    pub const DB_SYNC: &str = "wpsynchro_db_sync";
    pub const BACKUP_DATABASE: &str = "wpsynchro_backupdatabase";
    pub const EXECUTE_ACTION: &str = "wpsynchro_execute_action";
    pub const RUN_SYNCHRONIZE: &str = "wpsynchro_run_synchronize";
    pub const RUN_STATUS: &str = "wpsynchro_run_status";
    pub const SAVE_MIGRATION: &str = "wpsynchro_save_migration";
    pub const TEST: &str = "wpsynchro_test";
}
