use thiserror::Error;

#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
