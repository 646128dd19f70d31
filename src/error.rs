use thiserror::Error;

pub type Result<T> = std::result::Result<T, LevelError>;

#[derive(Error, Debug)]
pub enum LevelError {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("Feature generation error: {0}")]
    Feature(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Score vector has {got} entries, expected {expected}")]
    ScoreShape { expected: usize, got: usize },

    #[error(
        "Results must be fed in increasing time order, but received a timestamp \
         of {current}ms that was earlier than the oldest retained one of {oldest}ms"
    )]
    OutOfOrderTimestamp { current: i64, oldest: i64 },

    #[error("Result history is full ({capacity} records), latest result dropped")]
    ResultHistoryFull { capacity: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
