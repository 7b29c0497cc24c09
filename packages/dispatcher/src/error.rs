use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher is shut down, job '{0}' was not accepted")]
    ShutDown(&'static str),
}
