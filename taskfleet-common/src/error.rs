use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("worker {0} is already registered under an unexpired lease")]
    RegistrationConflict(String),

    #[error("lease keepalive lost")]
    LeaseLost,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
