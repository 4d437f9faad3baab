use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use evalctl_types::{limits, ErrorKind, EvalId, Priority};
use uuid::Uuid;

use crate::backoff::backoff_seconds;
use crate::error::QueueError;
use crate::item::{AttemptRecord, Claim, DeadLetter, QueueItem};
use crate::queue::TaskQueue;

/// Every `FAIRNESS_PERIOD`th claim is drawn in reverse-priority order, so
/// a flood of `high` work can't starve `low` forever (§4.4 "small periodic
/// fairness step").
const FAIRNESS_PERIOD: u64 = 5;

struct Lanes {
    high: VecDeque<QueueItem>,
    normal: VecDeque<QueueItem>,
    low: VecDeque<QueueItem>,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<QueueItem> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

struct InFlight {
    claim: Claim,
    revoked: bool,
}

/// Single-process reference implementation of [`TaskQueue`].
pub struct InMemoryQueue {
    lanes: Mutex<Lanes>,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
    dlq: Mutex<Vec<DeadLetter>>,
    claim_count: AtomicU64,
    retry_max_attempts: u32,
    retry_base_seconds: u64,
    retry_cap_seconds: u64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_retry_policy(
            limits::RETRY_MAX_ATTEMPTS,
            limits::RETRY_BASE_SECONDS,
            limits::RETRY_CAP_SECONDS,
        )
    }

    pub fn with_retry_policy(retry_max_attempts: u32, retry_base_seconds: u64, retry_cap_seconds: u64) -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                low: VecDeque::new(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            dlq: Mutex::new(Vec::new()),
            claim_count: AtomicU64::new(0),
            retry_max_attempts,
            retry_base_seconds,
            retry_cap_seconds,
        }
    }

    fn drain_order(&self) -> [Priority; 3] {
        let count = self.claim_count.fetch_add(1, Ordering::Relaxed);
        if count % FAIRNESS_PERIOD == FAIRNESS_PERIOD - 1 {
            [Priority::Low, Priority::Normal, Priority::High]
        } else {
            [Priority::High, Priority::Normal, Priority::Low]
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, item: QueueItem) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().expect("queue lock poisoned");
        lanes.lane_mut(item.priority).push_back(item);
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Claim>, QueueError> {
        let order = self.drain_order();
        let now = Utc::now();
        let mut lanes = self.lanes.lock().expect("queue lock poisoned");
        for priority in order {
            let lane = lanes.lane_mut(priority);
            if let Some(pos) = lane.iter().position(|item| item.not_before <= now) {
                let item = lane.remove(pos).expect("position was just checked");
                let claim = Claim {
                    item,
                    delivery_id: Uuid::new_v4(),
                };
                self.in_flight.lock().expect("in-flight lock poisoned").insert(
                    claim.delivery_id,
                    InFlight {
                        claim: claim.clone(),
                        revoked: false,
                    },
                );
                return Ok(Some(claim));
            }
        }
        Ok(None)
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<(), QueueError> {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&delivery_id)
            .map(|_| ())
            .ok_or(QueueError::UnknownClaim(delivery_id))
    }

    async fn nack(&self, delivery_id: Uuid, error: ErrorKind) -> Result<(), QueueError> {
        let in_flight = self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&delivery_id)
            .ok_or(QueueError::UnknownClaim(delivery_id))?;

        let mut item = in_flight.claim.item;
        if item.attempt + 1 >= self.retry_max_attempts {
            let dlq_entry = DeadLetter {
                attempts: (0..=item.attempt)
                    .map(|attempt| AttemptRecord {
                        attempt,
                        error,
                        at: Utc::now(),
                    })
                    .collect(),
                item: item.clone(),
                final_error: error,
            };
            self.dlq.lock().expect("dlq lock poisoned").push(dlq_entry);
            return Ok(());
        }

        item.attempt += 1;
        let delay = backoff_seconds(item.attempt - 1, self.retry_base_seconds, self.retry_cap_seconds, 0.20);
        item.not_before = Utc::now() + chrono::Duration::seconds(delay as i64);
        self.lanes
            .lock()
            .expect("queue lock poisoned")
            .lane_mut(item.priority)
            .push_back(item);
        Ok(())
    }

    async fn revoke(&self, eval_id: &EvalId) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().expect("queue lock poisoned");
        for lane in [&mut lanes.high, &mut lanes.normal, &mut lanes.low] {
            lane.retain(|item| &item.eval_id != eval_id);
        }
        drop(lanes);

        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        for entry in in_flight.values_mut() {
            if &entry.claim.item.eval_id == eval_id {
                entry.revoked = true;
            }
        }
        Ok(())
    }

    async fn is_revoked(&self, eval_id: &EvalId) -> Result<bool, QueueError> {
        Ok(self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .values()
            .any(|entry| &entry.claim.item.eval_id == eval_id && entry.revoked))
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.dlq.lock().expect("dlq lock poisoned").clone())
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use evalctl_types::EvalId;
    use serde_json::json;

    use super::*;

    fn item(priority: Priority) -> QueueItem {
        QueueItem::new(EvalId::generate(), priority, json!({}))
    }

    #[tokio::test]
    async fn high_priority_drains_before_normal_and_low() {
        let queue = InMemoryQueue::new();
        queue.enqueue(item(Priority::Low)).await.unwrap();
        queue.enqueue(item(Priority::Normal)).await.unwrap();
        queue.enqueue(item(Priority::High)).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.item.priority, Priority::High);
    }

    #[tokio::test]
    async fn exhausted_retries_move_the_item_to_the_dlq() {
        let queue = InMemoryQueue::with_retry_policy(2, 0, 1);
        queue.enqueue(item(Priority::Normal)).await.unwrap();

        let first = queue.claim().await.unwrap().unwrap();
        queue.nack(first.delivery_id, ErrorKind::ClusterUnavailable).await.unwrap();

        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.item.attempt, 1);
        queue.nack(second.delivery_id, ErrorKind::ClusterUnavailable).await.unwrap();

        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revoking_a_claimed_task_marks_it_revoked() {
        let queue = InMemoryQueue::new();
        let eval_id = EvalId::generate();
        queue.enqueue(QueueItem::new(eval_id.clone(), Priority::Normal, json!({}))).await.unwrap();
        queue.claim().await.unwrap();

        queue.revoke(&eval_id).await.unwrap();
        assert!(queue.is_revoked(&eval_id).await.unwrap());
    }
}
