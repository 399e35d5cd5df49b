//! Shared state of the simulated cluster.
//!
//! Everything the simulated brokers know lives in one [`SimState`] behind a
//! mutex: broker liveness and registration, partition logs, transaction
//! coordinator state and consumer group offsets. Client tasks only ever
//! touch it through the methods below, one short critical section at a time.
//!
//! # Transactions
//!
//! Records written inside a transaction carry its id. While the transaction
//! is open it pins the partition's last stable offset (LSO) at its first
//! record, so read-committed fetches stop there. Committing publishes the
//! records and the group offset in one step; aborting leaves the records in
//! the log where read-committed fetches skip them.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use eos_core::{NodeId, TransactionalId};
use tokio::time::Instant;

use super::error::{SimError, SimResult};

/// First pid handed to a simulated broker process.
const PID_BASE: u32 = 10_000;

/// Outcome of an idempotent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was written at this offset.
    Appended(u64),
    /// The sequence was already written at this offset; nothing changed.
    Duplicate(u64),
}

impl AppendOutcome {
    /// Offset the record lives at.
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::Appended(offset) | Self::Duplicate(offset) => offset,
        }
    }
}

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Records written, outcome pending.
    Open,
    /// Records visible to read-committed consumers.
    Committed,
    /// Records skipped by read-committed consumers.
    Aborted,
}

/// Records returned by a fetch.
#[derive(Debug, Clone, Default)]
pub struct Fetch {
    /// `(offset, payload)` pairs in log order.
    pub records: Vec<(u64, Bytes)>,
    /// Offset to fetch from next.
    pub next_offset: u64,
}

/// Consumer group offset commit carried by a transaction.
#[derive(Debug, Clone)]
pub struct OffsetCommit {
    /// Consumer group.
    pub group: String,
    /// Input topic.
    pub topic: String,
    /// Input partition.
    pub partition: u32,
    /// Next offset to consume.
    pub offset: u64,
}

#[derive(Debug)]
struct Record {
    payload: Bytes,
    txn: Option<usize>,
}

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<Record>,
    /// First offset of every open transaction with records here.
    open: BTreeMap<usize, u64>,
}

impl PartitionLog {
    fn end_offset(&self) -> u64 {
        self.records.len() as u64
    }

    fn last_stable_offset(&self) -> u64 {
        self.open
            .values()
            .min()
            .copied()
            .unwrap_or_else(|| self.end_offset())
    }
}

#[derive(Debug)]
struct Transaction {
    coordinator: NodeId,
    status: TxnStatus,
    partitions: Vec<(String, u32)>,
}

#[derive(Debug, Default)]
struct TxnProducer {
    epoch: u64,
    open: Option<usize>,
}

#[derive(Debug, Default)]
struct Broker {
    pid: Option<u32>,
    registered: bool,
    /// Set by a hard stop: the membership view drops the broker here.
    deregister_at: Option<Instant>,
}

/// State of the whole simulated cluster.
#[derive(Debug)]
pub struct SimState {
    brokers: BTreeMap<NodeId, Broker>,
    min_insync: usize,
    topics: HashMap<String, Vec<PartitionLog>>,
    transactions: Vec<Transaction>,
    producers: HashMap<TransactionalId, TxnProducer>,
    group_offsets: HashMap<(String, String, u32), u64>,
    /// Last `(sequence, offset)` per idempotent producer and partition.
    sequences: HashMap<(u64, String, u32), (u64, u64)>,
    next_pid: u32,
    next_producer_id: u64,
}

impl SimState {
    /// Creates a cluster of stopped brokers `1..=num_brokers`.
    #[must_use]
    pub fn new(num_brokers: u32, min_insync: u32) -> Self {
        let brokers = (1..=u64::from(num_brokers))
            .map(|id| (NodeId::new(id), Broker::default()))
            .collect();
        Self {
            brokers,
            min_insync: min_insync as usize,
            topics: HashMap::new(),
            transactions: Vec::new(),
            producers: HashMap::new(),
            group_offsets: HashMap::new(),
            sequences: HashMap::new(),
            next_pid: PID_BASE,
            next_producer_id: 1,
        }
    }

    // -------------------------------------------------------------------------
    // Brokers
    // -------------------------------------------------------------------------

    /// Returns every broker id in order.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        self.brokers.keys().copied().collect()
    }

    /// Starts a broker, assigning it a fresh pid.
    ///
    /// # Errors
    ///
    /// Returns `UnknownBroker` if the id is not part of the cluster.
    pub fn start_broker(&mut self, node: NodeId) -> SimResult<u32> {
        let pid = self.next_pid;
        let broker = self
            .brokers
            .get_mut(&node)
            .ok_or(SimError::UnknownBroker(node))?;
        if let Some(pid) = broker.pid {
            return Ok(pid);
        }
        self.next_pid += 1;
        broker.pid = Some(pid);
        broker.registered = true;
        broker.deregister_at = None;
        Ok(pid)
    }

    /// Stops a broker.
    ///
    /// A clean stop deregisters at once and hands open transactions to
    /// another coordinator. A hard stop leaves the registration until
    /// `session_timeout` has passed and aborts every open transaction the
    /// broker coordinated. Returns the identities whose transactions were
    /// aborted.
    ///
    /// # Errors
    ///
    /// Returns `UnknownBroker` if the id is not part of the cluster.
    pub fn stop_broker(
        &mut self,
        node: NodeId,
        clean: bool,
        now: Instant,
        session_timeout: Duration,
    ) -> SimResult<Vec<TransactionalId>> {
        let broker = self
            .brokers
            .get_mut(&node)
            .ok_or(SimError::UnknownBroker(node))?;
        broker.pid = None;
        if clean {
            broker.registered = false;
            broker.deregister_at = None;
        } else if broker.registered {
            broker.deregister_at = Some(now + session_timeout);
        }

        let mut aborted = Vec::new();
        let open: Vec<(TransactionalId, usize)> = self
            .producers
            .iter()
            .filter_map(|(id, producer)| producer.open.map(|txn| (id.clone(), txn)))
            .collect();
        for (transactional_id, txn) in open {
            if self.transactions[txn].status != TxnStatus::Open
                || self.transactions[txn].coordinator != node
            {
                continue;
            }
            if clean {
                if let Some(coordinator) = self.coordinator_for(&transactional_id) {
                    self.transactions[txn].coordinator = coordinator;
                }
            } else {
                self.finish(txn, TxnStatus::Aborted);
                aborted.push(transactional_id);
            }
        }
        Ok(aborted)
    }

    /// Returns true while the membership view lists the broker.
    #[must_use]
    pub fn is_registered(&self, node: NodeId, now: Instant) -> bool {
        self.brokers.get(&node).is_some_and(|broker| {
            broker.registered && broker.deregister_at.map_or(true, |at| now < at)
        })
    }

    /// Returns the running process ids of the broker.
    #[must_use]
    pub fn pids(&self, node: NodeId) -> Vec<u32> {
        self.brokers
            .get(&node)
            .and_then(|broker| broker.pid)
            .into_iter()
            .collect()
    }

    /// Returns the number of running brokers.
    #[must_use]
    pub fn running_brokers(&self) -> usize {
        self.brokers.values().filter(|b| b.pid.is_some()).count()
    }

    /// Stops every broker cleanly.
    pub fn stop_all(&mut self) {
        for broker in self.brokers.values_mut() {
            broker.pid = None;
            broker.registered = false;
            broker.deregister_at = None;
        }
    }

    fn check_available(&self) -> SimResult<()> {
        let running = self.running_brokers();
        if running < self.min_insync {
            return Err(SimError::NotEnoughReplicas {
                running,
                required: self.min_insync,
            });
        }
        Ok(())
    }

    /// The running broker coordinating `transactional_id`.
    fn coordinator_for(&self, transactional_id: &TransactionalId) -> Option<NodeId> {
        let nodes = self.nodes();
        if nodes.is_empty() {
            return None;
        }
        let hash = transactional_id
            .as_str()
            .bytes()
            .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
        let start = usize::try_from(hash % nodes.len() as u64).unwrap_or(0);
        (0..nodes.len())
            .map(|i| nodes[(start + i) % nodes.len()])
            .find(|node| self.brokers[node].pid.is_some())
    }

    // -------------------------------------------------------------------------
    // Topics
    // -------------------------------------------------------------------------

    /// Creates a topic. Creating an existing topic is a no-op.
    pub fn create_topic(&mut self, name: &str, partitions: u32) {
        self.topics.entry(name.to_string()).or_insert_with(|| {
            (0..partitions).map(|_| PartitionLog::default()).collect()
        });
    }

    /// Returns the partition count of a topic.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTopic` if the topic does not exist.
    pub fn partition_count(&self, topic: &str) -> SimResult<u32> {
        self.topics
            .get(topic)
            .map(|p| u32::try_from(p.len()).unwrap_or(u32::MAX))
            .ok_or_else(|| SimError::UnknownTopic(topic.to_string()))
    }

    fn log(&self, topic: &str, partition: u32) -> SimResult<&PartitionLog> {
        self.topics
            .get(topic)
            .ok_or_else(|| SimError::UnknownTopic(topic.to_string()))?
            .get(partition as usize)
            .ok_or_else(|| SimError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    fn log_mut(&mut self, topic: &str, partition: u32) -> SimResult<&mut PartitionLog> {
        self.topics
            .get_mut(topic)
            .ok_or_else(|| SimError::UnknownTopic(topic.to_string()))?
            .get_mut(partition as usize)
            .ok_or_else(|| SimError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    /// Offset one past the last record of the partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition does not exist.
    pub fn end_offset(&self, topic: &str, partition: u32) -> SimResult<u64> {
        Ok(self.log(topic, partition)?.end_offset())
    }

    /// First offset read-committed consumers may not read yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition does not exist.
    pub fn last_stable_offset(&self, topic: &str, partition: u32) -> SimResult<u64> {
        Ok(self.log(topic, partition)?.last_stable_offset())
    }

    /// Reads up to `max` records starting at `from`.
    ///
    /// Read-committed fetches stop at the LSO and skip aborted records.
    /// Read-uncommitted fetches return everything up to the log end.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition does not exist or too few brokers
    /// are running.
    pub fn fetch(
        &self,
        topic: &str,
        partition: u32,
        from: u64,
        max: usize,
        read_committed: bool,
    ) -> SimResult<Fetch> {
        self.check_available()?;
        let log = self.log(topic, partition)?;
        let upper = if read_committed {
            log.last_stable_offset()
        } else {
            log.end_offset()
        };

        let mut fetch = Fetch {
            records: Vec::new(),
            next_offset: from,
        };
        while fetch.next_offset < upper && fetch.records.len() < max {
            let offset = fetch.next_offset;
            let record = &log.records[usize::try_from(offset).unwrap_or(usize::MAX)];
            let aborted = record
                .txn
                .is_some_and(|txn| self.transactions[txn].status == TxnStatus::Aborted);
            if !(read_committed && aborted) {
                fetch.records.push((offset, record.payload.clone()));
            }
            fetch.next_offset += 1;
        }
        Ok(fetch)
    }

    // -------------------------------------------------------------------------
    // Idempotent producers
    // -------------------------------------------------------------------------

    /// Hands out a new idempotent producer id.
    pub fn allocate_producer_id(&mut self) -> u64 {
        let id = self.next_producer_id;
        self.next_producer_id += 1;
        id
    }

    /// Appends a record unless its sequence was already written.
    ///
    /// Sequences start at 0 per producer and partition. A retry of the last
    /// written sequence returns its original offset.
    ///
    /// # Errors
    ///
    /// Returns an error if too few brokers are running, the partition does
    /// not exist, or the sequence skips ahead.
    pub fn append(
        &mut self,
        producer_id: u64,
        topic: &str,
        partition: u32,
        sequence: u64,
        payload: Bytes,
    ) -> SimResult<AppendOutcome> {
        self.check_available()?;
        let key = (producer_id, topic.to_string(), partition);
        let expected = match self.sequences.get(&key) {
            Some(&(last, offset)) if sequence == last => return Ok(AppendOutcome::Duplicate(offset)),
            Some(&(last, _)) => last + 1,
            None => 0,
        };
        if sequence != expected {
            return Err(SimError::OutOfOrderSequence {
                expected,
                received: sequence,
            });
        }

        let log = self.log_mut(topic, partition)?;
        let offset = log.end_offset();
        log.records.push(Record { payload, txn: None });
        self.sequences.insert(key, (sequence, offset));
        Ok(AppendOutcome::Appended(offset))
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Registers a transactional producer and returns its new epoch.
    ///
    /// Any transaction left open by a previous instance with the same id is
    /// aborted, and that instance is fenced from then on.
    ///
    /// # Errors
    ///
    /// Returns `NotEnoughReplicas` if no coordinator can be reached.
    pub fn init_transactions(&mut self, transactional_id: &TransactionalId) -> SimResult<u64> {
        self.check_available()?;
        let producer = self.producers.entry(transactional_id.clone()).or_default();
        producer.epoch += 1;
        let epoch = producer.epoch;
        if let Some(txn) = producer.open.take() {
            if self.transactions[txn].status == TxnStatus::Open {
                self.finish(txn, TxnStatus::Aborted);
            }
        }
        Ok(epoch)
    }

    fn producer_mut(
        &mut self,
        transactional_id: &TransactionalId,
        epoch: u64,
    ) -> SimResult<&mut TxnProducer> {
        let producer = self
            .producers
            .get_mut(transactional_id)
            .ok_or_else(|| SimError::NotInitialized(transactional_id.clone()))?;
        if producer.epoch != epoch {
            return Err(SimError::ProducerFenced {
                transactional_id: transactional_id.clone(),
                epoch,
                current: producer.epoch,
            });
        }
        Ok(producer)
    }

    /// Writes a record inside the producer's transaction, beginning one if
    /// none is open.
    ///
    /// # Errors
    ///
    /// Returns `ProducerFenced` for a stale epoch, `TransactionAborted` if
    /// the coordinator aborted the open transaction, or an availability or
    /// partition error.
    pub fn append_transactional(
        &mut self,
        transactional_id: &TransactionalId,
        epoch: u64,
        topic: &str,
        partition: u32,
        payload: Bytes,
    ) -> SimResult<u64> {
        self.check_available()?;
        self.log(topic, partition)?;
        let open = self.producer_mut(transactional_id, epoch)?.open;

        let txn = match open {
            Some(txn) if self.transactions[txn].status == TxnStatus::Aborted => {
                return Err(SimError::TransactionAborted(transactional_id.clone()));
            }
            Some(txn) => txn,
            None => {
                let coordinator = self
                    .coordinator_for(transactional_id)
                    .ok_or(SimError::NotEnoughReplicas {
                        running: 0,
                        required: self.min_insync,
                    })?;
                self.transactions.push(Transaction {
                    coordinator,
                    status: TxnStatus::Open,
                    partitions: Vec::new(),
                });
                let txn = self.transactions.len() - 1;
                self.producer_mut(transactional_id, epoch)?.open = Some(txn);
                txn
            }
        };

        let first_in_partition = !self.transactions[txn]
            .partitions
            .iter()
            .any(|(t, p)| t == topic && *p == partition);
        if first_in_partition {
            self.transactions[txn]
                .partitions
                .push((topic.to_string(), partition));
        }

        let log = self.log_mut(topic, partition)?;
        let offset = log.end_offset();
        log.records.push(Record {
            payload,
            txn: Some(txn),
        });
        if first_in_partition {
            log.open.insert(txn, offset);
        }
        Ok(offset)
    }

    /// Commits the producer's transaction together with a group offset.
    ///
    /// Committing with no open transaction still commits the offset.
    ///
    /// # Errors
    ///
    /// Returns `ProducerFenced` for a stale epoch, `TransactionAborted` if
    /// the coordinator aborted the transaction, or `NotEnoughReplicas`.
    pub fn commit_transaction(
        &mut self,
        transactional_id: &TransactionalId,
        epoch: u64,
        offsets: Option<OffsetCommit>,
    ) -> SimResult<()> {
        self.check_available()?;
        let producer = self.producer_mut(transactional_id, epoch)?;
        let open = producer.open.take();

        if let Some(txn) = open {
            if self.transactions[txn].status == TxnStatus::Aborted {
                return Err(SimError::TransactionAborted(transactional_id.clone()));
            }
            self.finish(txn, TxnStatus::Committed);
        }
        if let Some(commit) = offsets {
            self.group_offsets
                .insert((commit.group, commit.topic, commit.partition), commit.offset);
        }
        Ok(())
    }

    /// Aborts the producer's open transaction, if any.
    ///
    /// # Errors
    ///
    /// Returns `ProducerFenced` for a stale epoch or `NotEnoughReplicas`.
    pub fn abort_transaction(
        &mut self,
        transactional_id: &TransactionalId,
        epoch: u64,
    ) -> SimResult<()> {
        self.check_available()?;
        let producer = self.producer_mut(transactional_id, epoch)?;
        if let Some(txn) = producer.open.take() {
            if self.transactions[txn].status == TxnStatus::Open {
                self.finish(txn, TxnStatus::Aborted);
            }
        }
        Ok(())
    }

    fn finish(&mut self, txn: usize, status: TxnStatus) {
        debug_assert_eq!(self.transactions[txn].status, TxnStatus::Open);
        self.transactions[txn].status = status;
        let partitions = std::mem::take(&mut self.transactions[txn].partitions);
        for (topic, partition) in &partitions {
            if let Ok(log) = self.log_mut(topic, *partition) {
                log.open.remove(&txn);
            }
        }
        self.transactions[txn].partitions = partitions;
    }

    /// Current epoch of a transactional id, if it ever initialized.
    #[must_use]
    pub fn epoch(&self, transactional_id: &TransactionalId) -> Option<u64> {
        self.producers.get(transactional_id).map(|p| p.epoch)
    }

    /// Status of the producer's current transaction, if it has one.
    #[must_use]
    pub fn transaction_status(&self, transactional_id: &TransactionalId) -> Option<TxnStatus> {
        self.producers
            .get(transactional_id)
            .and_then(|p| p.open)
            .map(|txn| self.transactions[txn].status)
    }

    /// Committed offset of a group on a partition, 0 if none.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.group_offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> SimState {
        let mut state = SimState::new(3, 2);
        for node in state.nodes() {
            state.start_broker(node).unwrap();
        }
        state.create_topic("in", 1);
        state.create_topic("out", 2);
        state
    }

    fn payload(value: u64) -> Bytes {
        Bytes::from(value.to_string())
    }

    fn committed_values(state: &SimState, topic: &str, partition: u32) -> Vec<Bytes> {
        state
            .fetch(topic, partition, 0, usize::MAX, true)
            .unwrap()
            .records
            .into_iter()
            .map(|(_, p)| p)
            .collect()
    }

    #[test]
    fn test_idempotent_retry_is_deduplicated() {
        let mut state = cluster();
        let producer = state.allocate_producer_id();

        let first = state.append(producer, "in", 0, 0, payload(7)).unwrap();
        let retry = state.append(producer, "in", 0, 0, payload(7)).unwrap();

        assert_eq!(first, AppendOutcome::Appended(0));
        assert_eq!(retry, AppendOutcome::Duplicate(0));
        assert_eq!(state.end_offset("in", 0).unwrap(), 1);
    }

    #[test]
    fn test_sequence_gap_is_rejected() {
        let mut state = cluster();
        let producer = state.allocate_producer_id();
        let err = state.append(producer, "in", 0, 3, payload(1)).unwrap_err();
        assert_eq!(
            err,
            SimError::OutOfOrderSequence {
                expected: 0,
                received: 3
            }
        );
    }

    #[test]
    fn test_open_transaction_pins_last_stable_offset() {
        let mut state = cluster();
        let id = TransactionalId::new("t1");
        let epoch = state.init_transactions(&id).unwrap();

        state.append_transactional(&id, epoch, "out", 0, payload(1)).unwrap();
        state.append_transactional(&id, epoch, "out", 0, payload(2)).unwrap();

        assert_eq!(state.end_offset("out", 0).unwrap(), 2);
        assert_eq!(state.last_stable_offset("out", 0).unwrap(), 0);
        assert!(committed_values(&state, "out", 0).is_empty());

        state.commit_transaction(&id, epoch, None).unwrap();
        assert_eq!(state.last_stable_offset("out", 0).unwrap(), 2);
        assert_eq!(committed_values(&state, "out", 0), vec![payload(1), payload(2)]);
    }

    #[test]
    fn test_aborted_records_are_skipped() {
        let mut state = cluster();
        let id = TransactionalId::new("t1");
        let epoch = state.init_transactions(&id).unwrap();

        state.append_transactional(&id, epoch, "out", 1, payload(1)).unwrap();
        state.abort_transaction(&id, epoch).unwrap();
        state.append_transactional(&id, epoch, "out", 1, payload(1)).unwrap();
        state.commit_transaction(&id, epoch, None).unwrap();

        assert_eq!(state.end_offset("out", 1).unwrap(), 2);
        assert_eq!(committed_values(&state, "out", 1), vec![payload(1)]);
        // Read-uncommitted sees both attempts.
        let all = state.fetch("out", 1, 0, 10, false).unwrap();
        assert_eq!(all.records.len(), 2);
    }

    #[test]
    fn test_reinit_fences_and_aborts_previous_instance() {
        let mut state = cluster();
        let id = TransactionalId::new("t1");
        let old = state.init_transactions(&id).unwrap();
        state.append_transactional(&id, old, "out", 0, payload(1)).unwrap();

        let new = state.init_transactions(&id).unwrap();
        assert!(new > old);
        assert_eq!(state.last_stable_offset("out", 0).unwrap(), 1);

        let err = state.commit_transaction(&id, old, None).unwrap_err();
        assert!(err.is_fenced());
        let err = state
            .append_transactional(&id, old, "out", 0, payload(2))
            .unwrap_err();
        assert!(err.is_fenced());
        assert!(committed_values(&state, "out", 0).is_empty());
    }

    #[test]
    fn test_commit_publishes_group_offset() {
        let mut state = cluster();
        let id = TransactionalId::new("t1");
        let epoch = state.init_transactions(&id).unwrap();
        state.append_transactional(&id, epoch, "out", 0, payload(1)).unwrap();

        assert_eq!(state.committed_offset("g", "in", 0), 0);
        state
            .commit_transaction(
                &id,
                epoch,
                Some(OffsetCommit {
                    group: "g".to_string(),
                    topic: "in".to_string(),
                    partition: 0,
                    offset: 1,
                }),
            )
            .unwrap();
        assert_eq!(state.committed_offset("g", "in", 0), 1);
    }

    #[test]
    fn test_hard_stop_of_coordinator_aborts_open_transaction() {
        let mut state = cluster();
        let id = TransactionalId::new("t1");
        let epoch = state.init_transactions(&id).unwrap();
        state.append_transactional(&id, epoch, "out", 0, payload(1)).unwrap();

        let coordinator = state.coordinator_for(&id).unwrap();
        let aborted = state
            .stop_broker(coordinator, false, Instant::now(), Duration::from_secs(6))
            .unwrap();

        assert_eq!(aborted, vec![id.clone()]);
        assert_eq!(state.transaction_status(&id), Some(TxnStatus::Aborted));
        let err = state.commit_transaction(&id, epoch, None).unwrap_err();
        assert_eq!(err, SimError::TransactionAborted(id));
    }

    #[test]
    fn test_clean_stop_moves_coordinator() {
        let mut state = cluster();
        let id = TransactionalId::new("t1");
        let epoch = state.init_transactions(&id).unwrap();
        state.append_transactional(&id, epoch, "out", 0, payload(1)).unwrap();

        let coordinator = state.coordinator_for(&id).unwrap();
        let aborted = state
            .stop_broker(coordinator, true, Instant::now(), Duration::from_secs(6))
            .unwrap();

        assert!(aborted.is_empty());
        state.commit_transaction(&id, epoch, None).unwrap();
        assert_eq!(committed_values(&state, "out", 0), vec![payload(1)]);
    }

    #[test]
    fn test_registration_outlives_hard_stop() {
        let mut state = cluster();
        let node = NodeId::new(2);
        let now = Instant::now();
        state
            .stop_broker(node, false, now, Duration::from_secs(6))
            .unwrap();

        assert!(state.pids(node).is_empty());
        assert!(state.is_registered(node, now + Duration::from_secs(5)));
        assert!(!state.is_registered(node, now + Duration::from_secs(6)));

        state.stop_broker(NodeId::new(3), true, now, Duration::from_secs(6)).unwrap();
        assert!(!state.is_registered(NodeId::new(3), now));
    }

    #[test]
    fn test_writes_need_min_insync_brokers() {
        let mut state = cluster();
        let now = Instant::now();
        state.stop_broker(NodeId::new(1), true, now, Duration::ZERO).unwrap();
        state.stop_broker(NodeId::new(2), true, now, Duration::ZERO).unwrap();

        let producer = state.allocate_producer_id();
        let err = state.append(producer, "in", 0, 0, payload(1)).unwrap_err();
        assert!(matches!(err, SimError::NotEnoughReplicas { running: 1, required: 2 }));

        state.start_broker(NodeId::new(1)).unwrap();
        assert!(state.append(producer, "in", 0, 0, payload(1)).is_ok());
    }

    #[test]
    fn test_restarted_broker_gets_new_pid() {
        let mut state = cluster();
        let node = NodeId::new(1);
        let before = state.pids(node);
        state.stop_broker(node, true, Instant::now(), Duration::ZERO).unwrap();
        state.start_broker(node).unwrap();
        assert_ne!(state.pids(node), before);
        assert_eq!(state.pids(node).len(), 1);
    }
}
