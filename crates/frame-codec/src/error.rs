use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame payload of {length} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { length: u64, max: usize },
}
