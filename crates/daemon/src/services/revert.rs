/// 补偿操作栈
///
/// 工作流每完成一个有副作用的步骤就压入对应的撤销操作。
/// 成功时调用 `success()` 清空；失败时 `fail()` 按后进先出顺序执行全部撤销。
/// 补偿失败只记录日志，不会覆盖原始错误

use common::Result;
use futures::future::BoxFuture;
use std::future::Future;
use tracing::{error, warn};

struct Compensation {
    description: String,
    action: BoxFuture<'static, Result<()>>,
}

#[derive(Default)]
pub struct Reverter {
    steps: Vec<Compensation>,
}

impl Reverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 压入一个撤销操作，future 在真正回滚之前不会被执行
    pub fn add<F>(&mut self, description: impl Into<String>, action: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push(Compensation {
            description: description.into(),
            action: Box::pin(action),
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 提交：丢弃所有撤销操作
    pub fn success(&mut self) {
        self.steps.clear();
    }

    /// 回滚：逆序执行所有撤销操作
    pub async fn fail(&mut self) {
        run_all(std::mem::take(&mut self.steps)).await;
    }
}

async fn run_all(mut steps: Vec<Compensation>) {
    while let Some(step) = steps.pop() {
        if let Err(e) = step.action.await {
            error!("回滚步骤失败 ({}): {}", step.description, e);
        }
    }
}

impl Drop for Reverter {
    fn drop(&mut self) {
        if self.steps.is_empty() {
            return;
        }

        let steps = std::mem::take(&mut self.steps);
        warn!("工作流未完成即被丢弃，后台执行 {} 个回滚步骤", steps.len());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_all(steps));
            }
            Err(_) => error!("没有可用的 tokio runtime，{} 个回滚步骤被放弃", steps.len()),
        }
    }
}
