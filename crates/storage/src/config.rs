/// 驱动配置校验
///
/// 每个后端用一张 (键, 校验函数) 表描述自己接受的配置项。
/// `user.*` 键总是放行，其余未知键一律拒绝

use common::models::constants::USER_CONFIG_PREFIX;
use common::utils::parse_byte_size;
use common::{ConfigMap, Error, Result};

pub type KeyValidator = fn(&str) -> std::result::Result<(), String>;

pub type KeyRules = &'static [(&'static str, KeyValidator)];

pub const SUPPORTED_FILESYSTEMS: [&str; 3] = ["ext4", "xfs", "btrfs"];

/// 按规则表校验配置，空值不做值校验
pub fn validate_config(config: &ConfigMap, scope: &str, rules: KeyRules) -> Result<()> {
    for (key, value) in config {
        if key.starts_with(USER_CONFIG_PREFIX) {
            continue;
        }

        let (_, validator) = rules
            .iter()
            .find(|(name, _)| *name == key.as_str())
            .ok_or_else(|| Error::InvalidArgument(format!("{}不支持配置项 \"{}\"", scope, key)))?;

        if value.is_empty() {
            continue;
        }

        validator(value).map_err(|msg| {
            Error::InvalidArgument(format!("{}配置项 \"{}\" 的值 \"{}\" 无效: {}", scope, key, value, msg))
        })?;
    }
    Ok(())
}

/// 变化的键必须是 `user.*` 或在可更新列表中
pub fn check_updatable(changed: &[String], updatable: &[&str], scope: &str) -> Result<()> {
    match changed
        .iter()
        .find(|key| !key.starts_with(USER_CONFIG_PREFIX) && !updatable.contains(&key.as_str()))
    {
        Some(key) => Err(Error::InvalidArgument(format!("{}配置项 \"{}\" 不支持修改", scope, key))),
        None => Ok(()),
    }
}

/// 键缺失或为空时写入默认值
pub fn set_default(config: &mut ConfigMap, key: &str, value: &str) {
    let entry = config.entry(key.to_string()).or_default();
    if entry.is_empty() {
        *entry = value.to_string();
    }
}

/// 读取配置项，空值视为缺失
pub fn get<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

pub fn is_any(_value: &str) -> std::result::Result<(), String> {
    Ok(())
}

pub fn is_size(value: &str) -> std::result::Result<(), String> {
    match parse_byte_size(value) {
        Ok(0) => Err("大小必须大于 0".to_string()),
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn is_positive_integer(value: &str) -> std::result::Result<(), String> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err("必须是正整数".to_string()),
    }
}

pub fn is_bool(value: &str) -> std::result::Result<(), String> {
    match value {
        "true" | "false" => Ok(()),
        _ => Err("必须是 true 或 false".to_string()),
    }
}

pub fn is_filesystem(value: &str) -> std::result::Result<(), String> {
    if SUPPORTED_FILESYSTEMS.contains(&value) {
        Ok(())
    } else {
        Err(format!("支持的文件系统: {}", SUPPORTED_FILESYSTEMS.join(", ")))
    }
}

pub fn is_absolute_path(value: &str) -> std::result::Result<(), String> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err("必须是绝对路径".to_string())
    }
}

/// LVM 卷组 / 逻辑卷名：`[A-Za-z0-9+_.-]`，不能以 `-` 开头
pub fn is_lvm_name(value: &str) -> std::result::Result<(), String> {
    if value.starts_with('-') {
        return Err("不能以 '-' 开头".to_string());
    }
    if value == "." || value == ".." {
        return Err("不能是 '.' 或 '..'".to_string());
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+_.-".contains(c))
    {
        Ok(())
    } else {
        Err("只能包含字母、数字和 +_.-".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: KeyRules = &[("size", is_size), ("source", is_any)];

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&config(&[("size", "10GB"), ("user.note", "x")]), "test", RULES).is_ok());
        assert!(validate_config(&config(&[("size", "")]), "test", RULES).is_ok());
        assert!(validate_config(&config(&[("size", "ten")]), "test", RULES).is_err());
        assert!(validate_config(&config(&[("size", "0")]), "test", RULES).is_err());

        let err = validate_config(&config(&[("bogus", "1")]), "test", RULES).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_check_updatable() {
        let changed = vec!["user.a".to_string(), "size".to_string()];
        assert!(check_updatable(&changed, &["size"], "test").is_ok());
        assert!(check_updatable(&changed, &[], "test").is_err());
        assert!(check_updatable(&[], &[], "test").is_ok());
    }

    #[test]
    fn test_set_default() {
        let mut cfg = config(&[("size", ""), ("source", "/dev/sdb")]);
        set_default(&mut cfg, "size", "15GB");
        set_default(&mut cfg, "source", "/dev/sdc");
        set_default(&mut cfg, "volume.size", "10GB");
        assert_eq!(cfg["size"], "15GB");
        assert_eq!(cfg["source"], "/dev/sdb");
        assert_eq!(cfg["volume.size"], "10GB");
    }

    #[test]
    fn test_is_lvm_name() {
        assert!(is_lvm_name("vg0").is_ok());
        assert!(is_lvm_name("Storage_Thin.Pool+1").is_ok());
        assert!(is_lvm_name("-vg").is_err());
        assert!(is_lvm_name("vg/0").is_err());
        assert!(is_lvm_name("..").is_err());
    }

    #[test]
    fn test_value_validators() {
        assert!(is_filesystem("xfs").is_ok());
        assert!(is_filesystem("zfs").is_err());
        assert!(is_positive_integer("32").is_ok());
        assert!(is_positive_integer("0").is_err());
        assert!(is_bool("true").is_ok());
        assert!(is_bool("yes").is_err());
        assert!(is_absolute_path("/srv").is_ok());
        assert!(is_absolute_path("srv").is_err());
    }
}
