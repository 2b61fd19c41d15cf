/// 存储卷类型注册表
///
/// 类型枚举、类型名、API 路径段、数据库编码四者之间的双向映射，
/// 任何不在枚举范围内的输入都返回错误，不会回退到 custom

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Container,
    Image,
    Custom,
}

pub const SUPPORTED_VOLUME_TYPES: [VolumeType; 3] =
    [VolumeType::Container, VolumeType::Image, VolumeType::Custom];

impl VolumeType {
    /// 类型名
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::Container => "container",
            VolumeType::Image => "image",
            VolumeType::Custom => "custom",
        }
    }

    /// API 路径段
    pub fn api_endpoint(&self) -> &'static str {
        match self {
            VolumeType::Container => "containers",
            VolumeType::Image => "images",
            VolumeType::Custom => "custom",
        }
    }

    /// 数据库中的整型编码
    pub fn code(&self) -> i32 {
        match self {
            VolumeType::Container => 0,
            VolumeType::Image => 1,
            VolumeType::Custom => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(VolumeType::Container),
            1 => Ok(VolumeType::Image),
            2 => Ok(VolumeType::Custom),
            _ => Err(Error::InvalidArgument(format!("无效的存储卷类型编码: {}", code))),
        }
    }

    pub fn from_api_endpoint(endpoint: &str) -> Result<Self> {
        match endpoint {
            "containers" => Ok(VolumeType::Container),
            "images" => Ok(VolumeType::Image),
            "custom" => Ok(VolumeType::Custom),
            _ => Err(Error::InvalidArgument(format!("无效的存储卷 API 路径: {}", endpoint))),
        }
    }

    /// 将类型名直接翻译为 API 路径段
    pub fn name_to_api_endpoint(name: &str) -> Result<&'static str> {
        name.parse::<VolumeType>().map(|t| t.api_endpoint())
    }
}

impl FromStr for VolumeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container" => Ok(VolumeType::Container),
            "image" => Ok(VolumeType::Image),
            "custom" => Ok(VolumeType::Custom),
            _ => Err(Error::InvalidArgument(format!("无效的存储卷类型: {}", s))),
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_types() {
        for t in SUPPORTED_VOLUME_TYPES {
            assert_eq!(t.as_str().parse::<VolumeType>().unwrap(), t);
            assert_eq!(VolumeType::from_api_endpoint(t.api_endpoint()).unwrap(), t);
            assert_eq!(VolumeType::from_code(t.code()).unwrap(), t);
            assert_eq!(VolumeType::name_to_api_endpoint(t.as_str()).unwrap(), t.api_endpoint());
        }
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(VolumeType::Container.api_endpoint(), "containers");
        assert_eq!(VolumeType::Image.api_endpoint(), "images");
        assert_eq!(VolumeType::Custom.api_endpoint(), "custom");
    }

    #[test]
    fn test_unknown_inputs_fail() {
        assert!("".parse::<VolumeType>().is_err());
        assert!("Custom".parse::<VolumeType>().is_err());
        assert!("containers".parse::<VolumeType>().is_err());
        assert!(VolumeType::from_api_endpoint("container").is_err());
        assert!(VolumeType::from_api_endpoint("profiles").is_err());
        assert!(VolumeType::from_code(3).is_err());
        assert!(VolumeType::from_code(-1).is_err());
        assert!(VolumeType::name_to_api_endpoint("volume").is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&VolumeType::Image).unwrap();
        assert_eq!(json, "\"image\"");
        assert!(serde_json::from_str::<VolumeType>("\"block\"").is_err());
    }
}
