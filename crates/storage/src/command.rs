/// 宿主机存储工具调用

use common::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// 执行命令并返回 stdout，非零退出码转换为存储错误（带 stderr）
pub async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    debug!("执行命令: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Storage(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Storage(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// 命令执行成功即返回 true，用于存在性探测
pub async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
