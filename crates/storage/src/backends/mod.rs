/// 存储后端实现

pub mod btrfs;
pub mod ceph;
pub mod dir;
pub mod lvm;
pub mod mock;
