/// 工具函数集合

use std::collections::BTreeSet;

use crate::errors::{Error, Result};
use crate::models::constants::USER_CONFIG_PREFIX;
use crate::models::ConfigMap;

/// 两份配置之间的差异
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// 值发生变化的键（键的增删也算变化），按字典序排列
    pub changed: Vec<String>,
    /// 所有变化的键都以 `user.` 开头
    pub user_only: bool,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changed.iter().any(|k| k == key)
    }
}

/// 计算配置差异，缺失的键视为空字符串
pub fn config_diff(old: &ConfigMap, new: &ConfigMap) -> ConfigDiff {
    fn value<'a>(map: &'a ConfigMap, key: &str) -> &'a str {
        map.get(key).map(String::as_str).unwrap_or("")
    }

    let changed: BTreeSet<&String> = old
        .keys()
        .chain(new.keys())
        .filter(|key| value(old, key.as_str()) != value(new, key.as_str()))
        .collect();

    let user_only = changed.iter().all(|key| key.starts_with(USER_CONFIG_PREFIX));

    ConfigDiff {
        changed: changed.into_iter().cloned().collect(),
        user_only,
    }
}

/// 校验存储池 / 存储卷名称
///
/// 名称会出现在文件路径和后端对象名中，不能为空、不能含 `/`，
/// 也不能是 `.` 或 `..`
pub fn validate_storage_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("名称不能为空".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidArgument(format!("名称不能包含 '/': {}", name)));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!("无效的名称: {}", name)));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidArgument(format!("名称不能包含空白字符: {}", name)));
    }
    Ok(())
}

/// 纯词法的路径规范化（不访问文件系统）
///
/// 合并重复的 `/`，去掉 `.`，回退 `..`；空路径返回 `.`
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// 解析字节大小字符串，例如 `15GB`、`512MiB`、`1024`
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, suffix) = input.split_at(split);

    if number.is_empty() {
        return Err(Error::InvalidArgument(format!("无效的大小: {}", input)));
    }
    let number: u64 = number
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("无效的大小: {}", input)))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "kB" | "KB" => 1000,
        "MB" => 1000u64.pow(2),
        "GB" => 1000u64.pow(3),
        "TB" => 1000u64.pow(4),
        "PB" => 1000u64.pow(5),
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        "PiB" => 1 << 50,
        other => {
            return Err(Error::InvalidArgument(format!("无效的大小单位: {}", other)));
        }
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidArgument(format!("大小溢出: {}", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_config_diff_user_only() {
        let diff = config_diff(&config(&[("a", "1")]), &config(&[("a", "1"), ("user.x", "y")]));
        assert_eq!(diff.changed, vec!["user.x".to_string()]);
        assert!(diff.user_only);
    }

    #[test]
    fn test_config_diff_backend_key() {
        let diff = config_diff(&config(&[("a", "1")]), &config(&[("a", "2")]));
        assert_eq!(diff.changed, vec!["a".to_string()]);
        assert!(!diff.user_only);
    }

    #[test]
    fn test_config_diff_no_change() {
        let old = config(&[("a", "1"), ("user.x", "y")]);
        let diff = config_diff(&old, &old.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_config_diff_absent_equals_empty() {
        let diff = config_diff(&config(&[("a", "")]), &config(&[]));
        assert!(diff.is_empty());

        let diff = config_diff(&config(&[("size", "10GB")]), &config(&[]));
        assert_eq!(diff.changed, vec!["size".to_string()]);
        assert!(!diff.user_only);
    }

    #[test]
    fn test_config_diff_mixed_keys_sorted() {
        let diff = config_diff(
            &config(&[("user.b", "1"), ("size", "1GB")]),
            &config(&[("user.a", "1"), ("size", "2GB")]),
        );
        assert_eq!(diff.changed, vec!["size", "user.a", "user.b"]);
        assert!(!diff.user_only);
        assert!(diff.contains("size"));
        assert!(!diff.contains("driver"));
    }

    #[test]
    fn test_validate_storage_name() {
        assert!(validate_storage_name("default").is_ok());
        assert!(validate_storage_name("pool-1.data_x").is_ok());
        assert!(validate_storage_name("").is_err());
        assert!(validate_storage_name("a/b").is_err());
        assert!(validate_storage_name("..").is_err());
        assert!(validate_storage_name("my pool").is_err());
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("custom////data"), "custom/data");
        assert_eq!(clean_path("./data/"), "data");
        assert_eq!(clean_path("custom/../data"), "data");
        assert_eq!(clean_path("../data"), "../data");
        assert_eq!(clean_path("/srv//data/."), "/srv/data");
        assert_eq!(clean_path("/.."), "/");
        assert_eq!(clean_path(""), ".");
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
        assert_eq!(parse_byte_size("15GB").unwrap(), 15_000_000_000);
        assert_eq!(parse_byte_size("512MiB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size("10 GB").unwrap(), 10_000_000_000);
        assert!(parse_byte_size("GB").is_err());
        assert!(parse_byte_size("10XB").is_err());
        assert!(parse_byte_size("").is_err());
    }
}
