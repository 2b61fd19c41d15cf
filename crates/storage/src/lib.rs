/// Easy Container Cloud - 存储驱动库
///
/// 存储驱动接口、后端类型查找表、各后端实现以及驱动实例管理器

pub mod backends;
pub mod command;
pub mod config;
pub mod driver;
pub mod kind;
pub mod manager;

pub use driver::{DriverSettings, DriverState, StorageDriver};
pub use kind::{DriverKind, SUPPORTED_DRIVERS};
pub use manager::StorageManager;
