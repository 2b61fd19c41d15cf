/// 设备配置
///
/// 设备是挂在容器或 profile 上的扁平字符串映射，以 `type` 区分种类。
/// 存储核心只读取 `type`，以及 disk 设备的 `pool` 和 `source`

use std::collections::HashMap;
use std::path::Path;

/// 单个设备
pub type Device = HashMap<String, String>;

/// 设备名 -> 设备
pub type Devices = HashMap<String, Device>;

pub const DEVICE_TYPE_DISK: &str = "disk";

pub fn is_disk(device: &Device) -> bool {
    device.get("type").map(String::as_str) == Some(DEVICE_TYPE_DISK)
}

/// disk 设备所在的存储池
pub fn disk_pool(device: &Device) -> Option<&str> {
    if !is_disk(device) {
        return None;
    }
    device.get("pool").map(String::as_str).filter(|p| !p.is_empty())
}

/// disk 设备的 source 为绝对路径时是宿主机 bind-mount，不是存储卷
pub fn is_host_path(device: &Device) -> bool {
    device
        .get("source")
        .map(|s| Path::new(s).is_absolute())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(pairs: &[(&str, &str)]) -> Device {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_disk_pool() {
        assert_eq!(disk_pool(&device(&[("type", "disk"), ("pool", "p1")])), Some("p1"));
        assert_eq!(disk_pool(&device(&[("type", "disk"), ("pool", "")])), None);
        assert_eq!(disk_pool(&device(&[("type", "nic"), ("pool", "p1")])), None);
        assert_eq!(disk_pool(&device(&[("pool", "p1")])), None);
    }

    #[test]
    fn test_is_host_path() {
        assert!(is_host_path(&device(&[("type", "disk"), ("source", "/srv/data")])));
        assert!(!is_host_path(&device(&[("type", "disk"), ("source", "custom/data")])));
        assert!(!is_host_path(&device(&[("type", "disk")])));
    }
}
