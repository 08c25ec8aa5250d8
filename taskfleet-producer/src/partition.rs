use sha2::{Digest, Sha256};

/// Route a task name to its partition: the first eight bytes of the SHA-256
/// digest, big-endian, modulo the partition count.
///
/// This is the fleet-wide producer contract; changing it requires a fleet
/// restart. All instances of one task name land on one partition, which is
/// what gives per-task-name FIFO ordering.
pub fn partition_for_task(task_name: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(task_name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(partitions)) as u32
}
