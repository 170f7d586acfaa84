use crate::error::AppError;

/// 分离分发的结果出口
///
/// 后台任务没有返回通道，处理器的成败只能经由此处上报（日志、指标等）。
pub trait DispatchObserver: Send + Sync {
    fn on_completed(&self, command: &'static str, command_id: &str, result: &Result<(), AppError>);
}

/// 默认观察者：以 `tracing` 记录结果
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_completed(&self, command: &'static str, command_id: &str, result: &Result<(), AppError>) {
        match result {
            Ok(()) => tracing::debug!(command, command_id, "detached command completed"),
            Err(err) => tracing::error!(
                command,
                command_id,
                error = %err,
                never_executed = err.never_executed(),
                "detached command failed"
            ),
        }
    }
}
