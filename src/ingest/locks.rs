//! 스코프 단위 직렬화
//!
//! 같은 스코프의 수집/정리 작업은 한 번에 하나만 실행됩니다.
//! 다른 스코프끼리는 서로 막지 않습니다.
//! 대기자가 없는 락은 해제 시 테이블에서 제거됩니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 스코프별 비동기 락 테이블
#[derive(Default)]
pub struct ScopeLocks {
    locks: Arc<Mutex<LockTable>>,
}

/// 스코프 락 가드 (drop 시 해제)
pub struct ScopeGuard {
    scope: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockTable>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = lock_table(&self.locks);
        // 테이블만 참조하고 있으면 대기자 없음
        let idle = locks
            .get(&self.scope)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(&self.scope);
        }
    }
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 스코프 락 획득 (가드가 살아 있는 동안 유지)
    pub async fn acquire(&self, scope: &str) -> ScopeGuard {
        let lock = lock_table(&self.locks)
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        if lock.try_lock().is_err() {
            tracing::debug!("Waiting for running job on scope {}", scope);
        }

        ScopeGuard {
            scope: scope.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// 현재 작업이 실행 중인지 여부
    pub fn is_busy(&self, scope: &str) -> bool {
        lock_table(&self.locks)
            .get(scope)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// 테이블에 남아 있는 스코프 수
    pub fn tracked_scopes(&self) -> usize {
        lock_table(&self.locks).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_scope_serializes() {
        let locks = Arc::new(ScopeLocks::new());
        let guard = locks.acquire("villajoyosa").await;
        assert!(locks.is_busy("villajoyosa"));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("villajoyosa").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!locks.is_busy("villajoyosa"));
        assert_eq!(locks.tracked_scopes(), 0);
    }

    #[tokio::test]
    async fn test_released_entry_kept_while_waiting() {
        let locks = Arc::new(ScopeLocks::new());
        let first = locks.acquire("villajoyosa").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("villajoyosa").await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 대기자가 있으므로 해제 후에도 유지
        drop(first);
        assert_eq!(locks.tracked_scopes(), 1);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locks.tracked_scopes(), 0);
    }

    #[tokio::test]
    async fn test_other_scopes_independent() {
        let locks = ScopeLocks::new();
        let _a = locks.acquire("villajoyosa").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("benidorm")).await;
        assert!(b.is_ok());
    }
}
