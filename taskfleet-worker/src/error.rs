use thiserror::Error;

use taskfleet_common::queue::QueueError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("coordination error: {0}")]
    Coordination(#[from] taskfleet_common::Error),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("membership lease lost, self-evicting")]
    LeaseLost,

    #[error("internal error: {0}")]
    Internal(String),
}
