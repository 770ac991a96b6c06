use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token is malformed")]
    Malformed,

    #[error("Token has expired")]
    Expired,

    #[error("Token signature is invalid")]
    InvalidSignature,
}
