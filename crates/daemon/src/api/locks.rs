/// 按名称串行化的操作锁
///
/// 存储池操作独占 `pool/<pool>`。存储卷操作共享 `pool/<pool>`，
/// 并独占 `volume/<pool>/<type>/<volume>`，所以同一存储池上的卷操作可以并行，
/// 但和该存储池的创建、更新、删除互斥。
/// 总是先取存储池锁再取存储卷锁。锁按需创建，最后一个持有者释放后移除

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

type LockMap = HashMap<String, Arc<RwLock<()>>>;

#[derive(Clone, Default)]
pub struct OperationLocks {
    locks: Arc<Mutex<LockMap>>,
}

enum Held {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// 持有期间占用对应名称
pub struct OperationGuard {
    locks: Arc<Mutex<LockMap>>,
    held: Vec<(String, Held)>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_key(pool: &str) -> String {
        format!("pool/{}", pool)
    }

    pub fn volume_key(pool: &str, volume_type: &str, volume: &str) -> String {
        format!("volume/{}/{}/{}", pool, volume_type, volume)
    }

    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    async fn acquire(&self, guard: &mut OperationGuard, key: String, exclusive: bool) {
        let lock = self.entry(&key);
        debug!("等待操作锁 {} (exclusive: {})", key, exclusive);
        let held = if exclusive {
            Held::Exclusive(lock.write_owned().await)
        } else {
            Held::Shared(lock.read_owned().await)
        };
        guard.held.push((key, held));
    }

    fn empty_guard(&self) -> OperationGuard {
        OperationGuard {
            locks: self.locks.clone(),
            held: Vec::new(),
        }
    }

    /// 存储池的创建、更新、删除
    pub async fn lock_pool(&self, pool: &str) -> OperationGuard {
        let mut guard = self.empty_guard();
        self.acquire(&mut guard, Self::pool_key(pool), true).await;
        guard
    }

    /// 存储卷的创建、更新、删除，同时以共享方式持有所在存储池
    pub async fn lock_volume(&self, pool: &str, volume_type: &str, volume: &str) -> OperationGuard {
        let mut guard = self.empty_guard();
        self.acquire(&mut guard, Self::pool_key(pool), false).await;
        self.acquire(&mut guard, Self::volume_key(pool, volume_type, volume), true)
            .await;
        guard
    }

    /// 当前存在的锁（持有中或有人等待）
    pub fn active_keys(&self) -> Vec<String> {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = locks.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        while let Some((key, held)) = self.held.pop() {
            drop(held);
            // 只剩表里的一份引用，说明没有其他持有者或等待者
            if locks
                .get(&key)
                .map(|lock| Arc::strong_count(lock) == 1)
                .unwrap_or(false)
            {
                locks.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_keys() {
        assert_eq!(OperationLocks::pool_key("p1"), "pool/p1");
        assert_eq!(OperationLocks::volume_key("p1", "custom", "v1"), "volume/p1/custom/v1");
    }

    #[tokio::test]
    async fn test_same_name_serialized() {
        let locks = OperationLocks::new();
        let guard = locks.lock_pool("p1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_pool("p1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_volume_waits_for_pool_operation() {
        let locks = OperationLocks::new();
        let pool = locks.lock_pool("p1").await;

        // 存储池被独占时，卷操作必须等待
        assert!(tokio::time::timeout(
            Duration::from_millis(50),
            locks.lock_volume("p1", "custom", "v1"),
        )
        .await
        .is_err());

        // 其他存储池不受影响
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock_volume("p2", "custom", "v1"),
        )
        .await
        .unwrap();
        drop(other);

        drop(pool);
        let volume = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock_volume("p1", "custom", "v1"),
        )
        .await
        .unwrap();
        assert_eq!(locks.active_keys(), vec!["pool/p1", "volume/p1/custom/v1"]);
        drop(volume);
        assert!(locks.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_pool_operation_waits_for_volumes() {
        let locks = OperationLocks::new();
        let v1 = locks.lock_volume("p1", "custom", "v1").await;

        // 同一存储池上的不同卷可以并行
        let v2 = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock_volume("p1", "custom", "v2"),
        )
        .await
        .unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_pool("p1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(v1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(v2);
        waiter.await.unwrap();
        assert!(locks.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_same_volume_serialized() {
        let locks = OperationLocks::new();
        let guard = locks.lock_volume("p1", "custom", "v1").await;

        assert!(tokio::time::timeout(
            Duration::from_millis(50),
            locks.lock_volume("p1", "custom", "v1"),
        )
        .await
        .is_err());

        drop(guard);
        assert!(locks.active_keys().is_empty());
    }
}
