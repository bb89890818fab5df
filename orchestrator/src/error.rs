use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("round {round_number} collected {got} OK responses, needed at least {needed}")]
    InsufficientQuorum {
        round_number: u32,
        got: usize,
        needed: usize,
    },
    #[error(transparent)]
    Shape(#[from] tensor::TensorError),
    #[error(transparent)]
    Aggregator(#[from] federated_learning::AggregatorError),
    #[error(transparent)]
    He(#[from] selective_he::HeError),
}
